use serde::{Deserialize, Serialize};

/// Catalog identity of a movie as reported by the history source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MovieRef {
    pub trakt_id: u64,
    pub slug: String,
    pub title: String,
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
}

/// Catalog identity of a show.
///
/// `trakt_id` is the join key for ratings, `slug` is the join key for season
/// metadata and for building URLs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShowRef {
    pub trakt_id: u64,
    pub slug: String,
    pub title: String,
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
}
