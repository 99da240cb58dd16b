use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub id: String,
    pub title: String,
    pub track_count: u32,
}

/// Local mirror of the remote library
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistState {
    pub playlists: Vec<PlaylistSummary>,
    pub liked_track_ids: Vec<String>,
    pub playlist_membership: HashMap<String, HashSet<String>>,
}

impl PlaylistState {
    pub fn playlist(&self, playlist_id: &str) -> Option<&PlaylistSummary> {
        self.playlists.iter().find(|p| p.id == playlist_id)
    }

    pub fn contains(&self, playlist_id: &str, track_id: &str) -> bool {
        self.playlist_membership
            .get(playlist_id)
            .map(|tracks| tracks.contains(track_id))
            .unwrap_or(false)
    }

    pub fn is_liked(&self, track_id: &str) -> bool {
        self.liked_track_ids.iter().any(|id| id == track_id)
    }

    /// Insert a track into a playlist. The counter only moves when the
    /// membership set actually changed. Returns whether it changed.
    pub fn insert_track(&mut self, playlist_id: &str, track_id: &str) -> bool {
        let inserted = self
            .playlist_membership
            .entry(playlist_id.to_string())
            .or_default()
            .insert(track_id.to_string());
        if inserted {
            if let Some(summary) = self.playlists.iter_mut().find(|p| p.id == playlist_id) {
                summary.track_count += 1;
            }
        }
        inserted
    }

    /// Inverse of [`PlaylistState::insert_track`], with the same guard
    pub fn remove_track(&mut self, playlist_id: &str, track_id: &str) -> bool {
        let removed = self
            .playlist_membership
            .get_mut(playlist_id)
            .map(|tracks| tracks.remove(track_id))
            .unwrap_or(false);
        if removed {
            if let Some(summary) = self.playlists.iter_mut().find(|p| p.id == playlist_id) {
                summary.track_count = summary.track_count.saturating_sub(1);
            }
        }
        removed
    }

    pub fn unlike(&mut self, track_id: &str) -> bool {
        let before = self.liked_track_ids.len();
        self.liked_track_ids.retain(|id| id != track_id);
        self.liked_track_ids.len() != before
    }
}

/// Membership of one playlist together with its optimistic-concurrency token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistContents {
    pub revision: String,
    pub track_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffOp {
    Insert { track_id: String },
    Delete { track_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LikedPage {
    pub track_ids: Vec<String>,
    pub offset: u32,
    pub total: u32,
    pub next_offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackMetadata {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioFeatures {
    pub id: String,
    pub tempo: f32,
    pub energy: f32,
    pub danceability: f32,
    pub valence: f32,
}
