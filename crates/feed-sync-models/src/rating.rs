use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Season lookup data, read only
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SeasonMetadata {
    pub first_aired: Option<NaiveDate>,
    pub poster: Option<String>,
}

/// show slug -> season number -> metadata
pub type SeasonIndex = HashMap<String, HashMap<u32, SeasonMetadata>>;

/// User ratings in four independent key spaces
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RatingIndex {
    pub movies: HashMap<u64, u8>,
    pub shows: HashMap<u64, u8>,
    pub seasons: HashMap<(u64, u32), u8>,
    pub episodes: HashMap<(u64, u32, u32), u8>,
}

impl RatingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn movie(&self, movie_id: u64) -> Option<u8> {
        self.movies.get(&movie_id).copied()
    }

    /// Season display rating: season-specific, then show
    pub fn season(&self, show_id: u64, season: u32) -> Option<u8> {
        self.seasons
            .get(&(show_id, season))
            .or_else(|| self.shows.get(&show_id))
            .copied()
    }

    /// Episode display rating: episode-specific, then season, then show
    pub fn episode(&self, show_id: u64, season: u32, episode: u32) -> Option<u8> {
        self.episodes
            .get(&(show_id, season, episode))
            .copied()
            .or_else(|| self.season(show_id, season))
    }

    pub fn len(&self) -> usize {
        self.movies.len() + self.shows.len() + self.seasons.len() + self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
