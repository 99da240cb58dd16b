use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::calendar::EpisodeType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Movie,
    Episode,
    Season,
}

/// One row of the published history feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayItem {
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    /// Day-granularity date string (`YYYY-MM-DD`)
    pub watched_at: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
}

/// One row of the upcoming calendar, dated by air or release day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarItem {
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    pub date: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_type: Option<EpisodeType>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchStats {
    pub movies_watched: u64,
    pub shows_watched: u64,
    pub total_hours: u64,
}

/// The document written to the publish sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedDocument {
    pub updated_at: DateTime<Utc>,
    pub items: Vec<DisplayItem>,
    pub stats: WatchStats,
    pub calendar: Vec<CalendarItem>,
}
