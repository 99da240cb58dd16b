use async_trait::async_trait;
use chrono::NaiveDate;
use feed_sync_models::{
    AudioFeatures, DiffOp, FeedDocument, LikedPage, PlaylistContents, PlaylistSummary, RatingIndex,
    RawCalendar, SeasonMetadata, TrackMetadata, WatchEvent, WatchStats,
};
use std::collections::HashMap;
use crate::error::SourceError;

/// Read side of the watch-history service
#[async_trait]
pub trait HistorySource: Send + Sync {
    fn source_name(&self) -> &str;

    /// Validate the session, refreshing credentials once if the probe is rejected
    async fn ensure_session(&mut self) -> Result<(), SourceError>;

    /// Most recent events first
    async fn history(&self, limit: u32) -> Result<Vec<WatchEvent>, SourceError>;
    async fn stats(&self) -> Result<WatchStats, SourceError>;
    async fn calendar(&self, start: NaiveDate, days: u32) -> Result<RawCalendar, SourceError>;
    async fn seasons(&self, show_slug: &str) -> Result<HashMap<u32, SeasonMetadata>, SourceError>;
    async fn ratings(&self) -> Result<RatingIndex, SourceError>;
}

/// Blob store holding the published feed document
#[async_trait]
pub trait FeedSink: Send + Sync {
    fn sink_name(&self) -> &str;

    /// Replace the stored document
    async fn publish(&self, document: &FeedDocument) -> Result<(), SourceError>;

    /// Missing or malformed content reads as `None`
    async fn read(&self) -> Result<Option<FeedDocument>, SourceError>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn put_secret(&self, name: &str, value: &str) -> Result<(), SourceError>;
}

/// Remote music library reached through the relay
#[async_trait]
pub trait PlaylistStore: Send + Sync {
    /// Identity of the account the access token belongs to
    async fn current_user(&self) -> Result<String, SourceError>;

    async fn list_playlists(&self) -> Result<Vec<PlaylistSummary>, SourceError>;
    async fn playlist_contents(&self, playlist_id: &str) -> Result<PlaylistContents, SourceError>;

    async fn playlist_revision(&self, playlist_id: &str) -> Result<String, SourceError> {
        Ok(self.playlist_contents(playlist_id).await?.revision)
    }

    /// Apply `ops` on top of `revision`. A stale revision yields
    /// [`SourceError::RevisionConflict`].
    async fn submit_diff(&self, playlist_id: &str, revision: &str, ops: &[DiffOp]) -> Result<(), SourceError>;

    async fn liked_page(&self, offset: u32, limit: u32) -> Result<LikedPage, SourceError>;
    async fn remove_liked(&self, track_id: &str) -> Result<(), SourceError>;

    async fn tracks(&self, ids: &[String]) -> Result<Vec<TrackMetadata>, SourceError>;
    async fn audio_features(&self, ids: &[String]) -> Result<Vec<AudioFeatures>, SourceError>;
}
