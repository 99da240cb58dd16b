use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::media::{MovieRef, ShowRef};

/// A single raw history entry, newest first as delivered by the source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchEvent {
    Movie {
        watched_at: DateTime<Utc>,
        movie: MovieRef,
    },
    Episode {
        watched_at: DateTime<Utc>,
        show: ShowRef,
        season: u32,
        number: u32,
    },
}

impl WatchEvent {
    pub fn watched_at(&self) -> DateTime<Utc> {
        match self {
            WatchEvent::Movie { watched_at, .. } | WatchEvent::Episode { watched_at, .. } => *watched_at,
        }
    }
}
