use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::media::{MovieRef, ShowRef};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupedRecord {
    Movie {
        watched_at: DateTime<Utc>,
        movie: MovieRef,
    },
    Season(SeasonGroup),
}

/// A run of consecutive episodes of one show and season.
///
/// `watched_at` belongs to the event that opened the group (the most recent
/// one) and is never moved by later merges. `episodes` keeps the numbers in
/// the order they were encountered, duplicates included.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeasonGroup {
    pub show: ShowRef,
    pub season: u32,
    pub episodes: Vec<u32>,
    pub watched_at: DateTime<Utc>,
}

impl SeasonGroup {
    pub fn new(show: ShowRef, season: u32, episode: u32, watched_at: DateTime<Utc>) -> Self {
        Self {
            show,
            season,
            episodes: vec![episode],
            watched_at,
        }
    }

    pub fn matches(&self, show: &ShowRef, season: u32) -> bool {
        self.show.trakt_id == show.trakt_id && self.season == season
    }

    pub fn is_single_episode(&self) -> bool {
        self.episodes.len() == 1
    }
}

impl GroupedRecord {
    pub fn watched_at(&self) -> DateTime<Utc> {
        match self {
            GroupedRecord::Movie { watched_at, .. } => *watched_at,
            GroupedRecord::Season(group) => group.watched_at,
        }
    }
}
