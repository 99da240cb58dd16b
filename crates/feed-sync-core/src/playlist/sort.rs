use feed_sync_models::{AudioFeatures, TrackMetadata};
use feed_sync_sources::{PlaylistStore, SourceError};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Artist,
    Duration,
    Tempo,
    Energy,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "name" | "title" => Ok(SortKey::Name),
            "artist" => Ok(SortKey::Artist),
            "duration" | "length" => Ok(SortKey::Duration),
            "tempo" | "bpm" => Ok(SortKey::Tempo),
            "energy" => Ok(SortKey::Energy),
            other => Err(format!(
                "unknown sort key '{}' (expected name, artist, duration, tempo or energy)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortedTrack {
    pub track: TrackMetadata,
    pub features: Option<AudioFeatures>,
}

impl SortedTrack {
    fn feature(&self, key: SortKey) -> Option<f32> {
        let features = self.features.as_ref()?;
        match key {
            SortKey::Tempo => Some(features.tempo),
            SortKey::Energy => Some(features.energy),
            _ => None,
        }
    }
}

/// Order tracks by `key`. Tracks without audio features sort after the
/// rest for feature keys, whatever the direction.
pub fn sort_tracks(
    tracks: Vec<TrackMetadata>,
    features: Vec<AudioFeatures>,
    key: SortKey,
    descending: bool,
) -> Vec<SortedTrack> {
    let mut by_id: HashMap<String, AudioFeatures> = features.into_iter().map(|f| (f.id.clone(), f)).collect();
    let mut sorted: Vec<SortedTrack> = tracks
        .into_iter()
        .map(|track| {
            let features = by_id.remove(&track.id);
            SortedTrack { track, features }
        })
        .collect();

    let direction = |ordering: Ordering| if descending { ordering.reverse() } else { ordering };
    sorted.sort_by(|a, b| match key {
        SortKey::Name => direction(a.track.name.to_lowercase().cmp(&b.track.name.to_lowercase())),
        SortKey::Artist => direction(
            primary_artist(&a.track)
                .cmp(&primary_artist(&b.track))
                .then_with(|| a.track.name.to_lowercase().cmp(&b.track.name.to_lowercase())),
        ),
        SortKey::Duration => direction(a.track.duration_ms.cmp(&b.track.duration_ms)),
        SortKey::Tempo | SortKey::Energy => match (a.feature(key), b.feature(key)) {
            (Some(x), Some(y)) => direction(x.total_cmp(&y)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    });
    sorted
}

fn primary_artist(track: &TrackMetadata) -> String {
    track.artists.first().map(|a| a.to_lowercase()).unwrap_or_default()
}

/// Fetch a playlist's tracks with metadata and audio features, then sort
pub async fn load_sorted(
    store: &dyn PlaylistStore,
    playlist_id: &str,
    key: SortKey,
    descending: bool,
) -> Result<Vec<SortedTrack>, SourceError> {
    let contents = store.playlist_contents(playlist_id).await?;
    let needs_features = matches!(key, SortKey::Tempo | SortKey::Energy);

    let (tracks, features) = if needs_features {
        futures::try_join!(store.tracks(&contents.track_ids), store.audio_features(&contents.track_ids))?
    } else {
        (store.tracks(&contents.track_ids).await?, Vec::new())
    };
    debug!(
        playlist_id,
        tracks = tracks.len(),
        features = features.len(),
        "Loaded playlist for sorting"
    );
    Ok(sort_tracks(tracks, features, key, descending))
}
