use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use crate::media::{MovieRef, ShowRef};

/// Episode classification reported by the calendar.
///
/// Ordering follows display priority: a series finale outranks everything,
/// a standard episode ranks lowest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeType {
    SeriesFinale,
    SeasonFinale,
    MidSeasonFinale,
    SeriesPremiere,
    SeasonPremiere,
    MidSeasonPremiere,
    #[default]
    #[serde(other)]
    Standard,
}

impl EpisodeType {
    pub fn rank(self) -> u8 {
        match self {
            EpisodeType::SeriesFinale => 6,
            EpisodeType::SeasonFinale => 5,
            EpisodeType::MidSeasonFinale => 4,
            EpisodeType::SeriesPremiere => 3,
            EpisodeType::SeasonPremiere => 2,
            EpisodeType::MidSeasonPremiere => 1,
            EpisodeType::Standard => 0,
        }
    }
}

impl Ord for EpisodeType {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for EpisodeType {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarEpisode {
    pub first_aired: DateTime<Utc>,
    pub show: ShowRef,
    pub season: u32,
    pub number: u32,
    #[serde(default)]
    pub episode_type: EpisodeType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarMovie {
    pub released: NaiveDate,
    pub movie: MovieRef,
}

/// Upcoming episodes and movie releases inside the lookahead window
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawCalendar {
    pub episodes: Vec<CalendarEpisode>,
    pub movies: Vec<CalendarMovie>,
}

/// Episodes of one show/season airing on the same day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarGroup {
    pub air_date: NaiveDate,
    pub show: ShowRef,
    pub season: u32,
    pub episodes: Vec<u32>,
    pub episode_type: EpisodeType,
}
