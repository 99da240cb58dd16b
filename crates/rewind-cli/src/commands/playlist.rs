use super::{load_config, load_credentials};
use crate::output::{new_table, Output};
use crate::PlaylistCommands;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use feed_sync_config::PathManager;
use feed_sync_core::playlist::load_sorted;
use feed_sync_core::{EngineOptions, JsonCache, MutationOutcome, MutationStatus, PlaylistEngine};
use feed_sync_models::TrackMetadata;
use feed_sync_sources::RelayPlaylistClient;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

pub async fn run_playlist(cmd: PlaylistCommands, output: &Output) -> Result<()> {
    let engine = connect().await?;
    let result = match cmd {
        PlaylistCommands::List => list(&engine, output).await,
        PlaylistCommands::Liked { offset } => liked(&engine, offset, output).await,
        PlaylistCommands::Add { playlist_id, track_id } => {
            let outcome = engine.add_track(&playlist_id, &track_id).await;
            report_outcome(&engine, &outcome, &format!("Added {} to {}", track_id, playlist_id), output)
        }
        PlaylistCommands::Unlike { track_id } => {
            let outcome = engine.remove_liked(&track_id).await;
            report_outcome(&engine, &outcome, &format!("Removed {} from liked tracks", track_id), output)
        }
        PlaylistCommands::Sort {
            playlist_id,
            by,
            descending,
        } => {
            let tracks = load_sorted(engine.store(), &playlist_id, by, descending)
                .await
                .map_err(|e| eyre!("Failed to load playlist {}: {}", playlist_id, e))?;
            let mut table = new_table(["#", "Title", "Artist", "Length", "Tempo", "Energy"]);
            let mut rows = Vec::new();
            for (index, sorted) in tracks.iter().enumerate() {
                let tempo = sorted.features.as_ref().map(|f| format!("{:.0}", f.tempo)).unwrap_or_default();
                let energy = sorted.features.as_ref().map(|f| format!("{:.2}", f.energy)).unwrap_or_default();
                table.add_row(vec![
                    (index + 1).to_string(),
                    sorted.track.name.clone(),
                    sorted.track.artists.join(", "),
                    format_duration(sorted.track.duration_ms),
                    tempo,
                    energy,
                ]);
                rows.push(json!({
                    "id": sorted.track.id,
                    "name": sorted.track.name,
                    "artists": sorted.track.artists,
                    "duration_ms": sorted.track.duration_ms,
                    "tempo": sorted.features.as_ref().map(|f| f.tempo),
                    "energy": sorted.features.as_ref().map(|f| f.energy),
                }));
            }
            if output.is_human() {
                output.table(&format!("{} sorted by {:?}", playlist_id, by), table);
            } else {
                output.json(&json!({ "playlist_id": playlist_id, "tracks": rows }));
            }
            Ok(())
        }
    };
    engine.shutdown();
    result
}

/// Engine bound to the relay's current user, seeded from that user's cached snapshot
async fn connect() -> Result<PlaylistEngine> {
    let path_manager = PathManager::default();
    let config = load_config(&path_manager)?;
    let creds = load_credentials(&path_manager)?;

    let playlists = config
        .playlists
        .as_ref()
        .ok_or_else(|| eyre!("No [playlists] section configured"))?;
    let token = creds
        .get_playlist_access_token()
        .ok_or_else(|| eyre!("No playlist access token configured (set REWIND_PLAYLIST_ACCESS_TOKEN)"))?;

    let store = Arc::new(RelayPlaylistClient::new(&playlists.relay_url, token));
    let mut engine = PlaylistEngine::new(store, EngineOptions::from_config(playlists));
    match JsonCache::new(path_manager.playlist_cache_dir()) {
        Ok(cache) => engine = engine.with_cache(cache),
        Err(e) => warn!(error = %e, "Playlist cache unavailable"),
    }

    engine
        .connect()
        .await
        .map_err(|e| eyre!("Failed to identify the playlist account: {}", e))?;
    engine.restore_snapshot();
    Ok(engine)
}

async fn list(engine: &PlaylistEngine, output: &Output) -> Result<()> {
    let report = engine.refresh().await.map_err(|e| eyre!("Refresh failed: {}", e))?;
    if !report.settled {
        output.warn("Library kept changing during refresh, showing the latest fetch");
    }

    let state = engine.snapshot();
    if !output.is_human() {
        output.json(&json!({
            "identity": engine.identity(),
            "playlists": state.playlists,
            "liked": state.liked_track_ids.len(),
        }));
        return Ok(());
    }

    let mut table = new_table(["Id", "Title", "Tracks"]);
    for playlist in &state.playlists {
        table.add_row(vec![playlist.id.clone(), playlist.title.clone(), playlist.track_count.to_string()]);
    }
    output.table(
        &format!("Playlists of {}", engine.identity().unwrap_or_default()),
        table,
    );
    output.info(format!("{} liked tracks", state.liked_track_ids.len()));
    Ok(())
}

async fn liked(engine: &PlaylistEngine, offset: u32, output: &Output) -> Result<()> {
    let page = match engine.load_liked_page(offset).await {
        Ok(Some(page)) => page,
        Ok(None) => return Ok(()),
        Err(e) => return Err(eyre!("Failed to load liked tracks: {}", e)),
    };
    let tracks = engine
        .store()
        .tracks(&page.track_ids)
        .await
        .map_err(|e| eyre!("Failed to load track details: {}", e))?;

    if !output.is_human() {
        output.json(&json!({
            "offset": page.offset,
            "total": page.total,
            "next_offset": page.next_offset,
            "tracks": tracks,
        }));
        return Ok(());
    }

    let mut table = new_table(["#", "Title", "Artist", "Length"]);
    for (index, track) in ordered_tracks(&page.track_ids, tracks).iter().enumerate() {
        table.add_row(vec![
            (page.offset as usize + index + 1).to_string(),
            track.name.clone(),
            track.artists.join(", "),
            format_duration(track.duration_ms),
        ]);
    }
    output.table(&format!("Liked tracks ({} total)", page.total), table);
    if let Some(next) = page.next_offset {
        output.info(format!("More: rewind playlist liked --offset {}", next));
    }
    Ok(())
}

fn report_outcome(engine: &PlaylistEngine, outcome: &MutationOutcome, done: &str, output: &Output) -> Result<()> {
    if !output.is_human() {
        output.json(&json!({
            "status": format!("{:?}", outcome.status),
            "success": outcome.success(),
            "message": outcome.message,
            "liked": engine.snapshot().liked_track_ids.len(),
        }));
    }
    match outcome.status {
        MutationStatus::Committed | MutationStatus::DeferredToRefresh => {
            if output.is_human() {
                output.success(done);
                output.info(format!("{} liked tracks", engine.snapshot().liked_track_ids.len()));
            }
            Ok(())
        }
        _ => Err(eyre!(
            "{}",
            outcome.message.clone().unwrap_or_else(|| format!("mutation {:?}", outcome.status))
        )),
    }
}

/// Metadata lookups may return in any order; keep the page order
fn ordered_tracks(ids: &[String], tracks: Vec<TrackMetadata>) -> Vec<TrackMetadata> {
    let mut by_id: std::collections::HashMap<String, TrackMetadata> =
        tracks.into_iter().map(|t| (t.id.clone(), t)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

fn format_duration(duration_ms: u64) -> String {
    let seconds = duration_ms / 1000;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str) -> TrackMetadata {
        TrackMetadata {
            id: id.to_string(),
            name: id.to_uppercase(),
            artists: vec!["Artist".to_string()],
            duration_ms: 200_000,
            preview_url: None,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(200_000), "3:20");
        assert_eq!(format_duration(59_999), "0:59");
    }

    #[test]
    fn test_ordered_tracks_follow_page_order() {
        let ids = vec!["b".to_string(), "a".to_string(), "missing".to_string()];
        let ordered = ordered_tracks(&ids, vec![track("a"), track("b")]);
        let names: Vec<&str> = ordered.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }
}
