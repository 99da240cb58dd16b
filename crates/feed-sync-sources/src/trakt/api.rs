use chrono::{DateTime, NaiveDate, Utc};
use feed_sync_models::{
    CalendarEpisode, CalendarMovie, EpisodeType, MovieRef, RatingIndex, RawCalendar, SeasonMetadata, ShowRef,
    WatchEvent, WatchStats,
};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;
use crate::error::{check_response, SourceError};

/// Everything an authenticated Trakt request needs
#[derive(Clone, Copy)]
pub struct ApiContext<'a> {
    pub client: &'a Client,
    pub api_url: &'a str,
    pub access_token: &'a str,
    pub client_id: &'a str,
}

impl<'a> ApiContext<'a> {
    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.api_url, path))
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("trakt-api-version", "2")
            .header("trakt-api-key", self.client_id) // Required for authenticated requests
            .header("Accept", "application/json")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Content-Type", "application/json")
            .header("Origin", "https://trakt.tv")
            .header("Referer", "https://trakt.tv/")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraktIds {
    pub trakt: Option<u64>,
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraktImages {
    #[serde(default)]
    pub poster: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TraktMovie {
    pub title: String,
    pub year: Option<i32>,
    pub ids: TraktIds,
    pub images: Option<TraktImages>,
}

#[derive(Debug, Deserialize)]
pub struct TraktShow {
    pub title: String,
    pub year: Option<i32>,
    pub ids: TraktIds,
    pub images: Option<TraktImages>,
}

#[derive(Debug, Deserialize)]
pub struct TraktEpisode {
    pub season: Option<u32>,
    pub number: Option<u32>,
    #[serde(default)]
    pub episode_type: Option<EpisodeType>,
}

#[derive(Debug, Deserialize)]
pub struct TraktSeasonRef {
    pub number: u32,
}

#[derive(Debug, Deserialize)]
pub struct TraktHistoryItem {
    pub watched_at: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub movie: Option<TraktMovie>,
    pub show: Option<TraktShow>,
    pub episode: Option<TraktEpisode>,
}

#[derive(Debug, Deserialize)]
pub struct TraktRatingItem {
    pub rating: u8,
    #[serde(rename = "type")]
    pub item_type: String,
    pub movie: Option<TraktMovie>,
    pub show: Option<TraktShow>,
    pub season: Option<TraktSeasonRef>,
    pub episode: Option<TraktEpisode>,
}

#[derive(Debug, Deserialize)]
pub struct TraktCalendarShow {
    pub first_aired: String,
    pub episode: TraktEpisode,
    pub show: TraktShow,
}

#[derive(Debug, Deserialize)]
pub struct TraktCalendarMovie {
    pub released: Option<String>,
    pub movie: TraktMovie,
}

#[derive(Debug, Deserialize)]
pub struct TraktSeason {
    pub number: u32,
    pub first_aired: Option<String>,
    pub images: Option<TraktImages>,
}

#[derive(Debug, Default, Deserialize)]
struct TraktCount {
    #[serde(default)]
    watched: u64,
    #[serde(default)]
    minutes: u64,
}

#[derive(Debug, Deserialize)]
pub struct TraktStats {
    #[serde(default)]
    movies: TraktCount,
    #[serde(default)]
    shows: TraktCount,
    #[serde(default)]
    episodes: TraktCount,
}

/// Trakt image paths come without a scheme
fn poster_url(images: &Option<TraktImages>) -> Option<String> {
    let path = images.as_ref()?.poster.first()?;
    if path.starts_with("http://") || path.starts_with("https://") {
        Some(path.clone())
    } else {
        Some(format!("https://{}", path))
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Accepts either a plain date or a full timestamp
fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(value).map(|dt| dt.date_naive()))
}

pub fn movie_ref(movie: &TraktMovie) -> Option<MovieRef> {
    Some(MovieRef {
        trakt_id: movie.ids.trakt?,
        slug: movie.ids.slug.clone()?,
        title: movie.title.clone(),
        year: movie.year,
        poster: poster_url(&movie.images),
    })
}

pub fn show_ref(show: &TraktShow) -> Option<ShowRef> {
    Some(ShowRef {
        trakt_id: show.ids.trakt?,
        slug: show.ids.slug.clone()?,
        title: show.title.clone(),
        year: show.year,
        poster: poster_url(&show.images),
    })
}

/// Narrow raw history entries into tagged events, skipping anything malformed
pub fn history_events(items: Vec<TraktHistoryItem>) -> Vec<WatchEvent> {
    let mut events = Vec::with_capacity(items.len());
    let mut skipped = 0;

    for item in items {
        let event = parse_timestamp(&item.watched_at).and_then(|watched_at| match item.item_type.as_str() {
            "movie" => item
                .movie
                .as_ref()
                .and_then(movie_ref)
                .map(|movie| WatchEvent::Movie { watched_at, movie }),
            "episode" => {
                let show = item.show.as_ref().and_then(show_ref)?;
                let episode = item.episode.as_ref()?;
                Some(WatchEvent::Episode {
                    watched_at,
                    show,
                    season: episode.season?,
                    number: episode.number?,
                })
            }
            _ => None,
        });

        match event {
            Some(event) => events.push(event),
            None => {
                skipped += 1;
                if skipped <= 5 {
                    debug!(item_type = %item.item_type, "Skipping malformed history entry");
                }
            }
        }
    }

    debug!(events = events.len(), skipped, "Parsed Trakt history");
    events
}

pub fn rating_index(items: Vec<TraktRatingItem>) -> RatingIndex {
    let mut index = RatingIndex::new();

    for item in items {
        let show_id = item.show.as_ref().and_then(|show| show.ids.trakt);
        match item.item_type.as_str() {
            "movie" => {
                if let Some(id) = item.movie.as_ref().and_then(|movie| movie.ids.trakt) {
                    index.movies.insert(id, item.rating);
                }
            }
            "show" => {
                if let Some(id) = show_id {
                    index.shows.insert(id, item.rating);
                }
            }
            "season" => {
                if let (Some(id), Some(season)) = (show_id, item.season.as_ref()) {
                    index.seasons.insert((id, season.number), item.rating);
                }
            }
            "episode" => {
                let episode = item.episode.as_ref().and_then(|e| Some((e.season?, e.number?)));
                if let (Some(id), Some((season, number))) = (show_id, episode) {
                    index.episodes.insert((id, season, number), item.rating);
                }
            }
            other => debug!(item_type = other, "Ignoring rating of unknown type"),
        }
    }

    index
}

pub fn calendar_episodes(items: Vec<TraktCalendarShow>) -> Vec<CalendarEpisode> {
    items
        .into_iter()
        .filter_map(|item| {
            Some(CalendarEpisode {
                first_aired: parse_timestamp(&item.first_aired)?,
                show: show_ref(&item.show)?,
                season: item.episode.season?,
                number: item.episode.number?,
                episode_type: item.episode.episode_type.unwrap_or_default(),
            })
        })
        .collect()
}

pub fn calendar_movies(items: Vec<TraktCalendarMovie>) -> Vec<CalendarMovie> {
    items
        .into_iter()
        .filter_map(|item| {
            Some(CalendarMovie {
                released: parse_day(item.released.as_deref()?)?,
                movie: movie_ref(&item.movie)?,
            })
        })
        .collect()
}

pub fn season_index(seasons: Vec<TraktSeason>) -> HashMap<u32, SeasonMetadata> {
    seasons
        .into_iter()
        .map(|season| {
            let metadata = SeasonMetadata {
                first_aired: season.first_aired.as_deref().and_then(parse_day),
                poster: poster_url(&season.images),
            };
            (season.number, metadata)
        })
        .collect()
}

pub fn watch_stats(stats: TraktStats) -> WatchStats {
    WatchStats {
        movies_watched: stats.movies.watched,
        shows_watched: stats.shows.watched,
        total_hours: (stats.movies.minutes + stats.episodes.minutes) / 60,
    }
}

/// Lightweight authenticated call used to validate the access token
pub async fn probe(ctx: ApiContext<'_>) -> Result<(), SourceError> {
    let response = ctx.get("/users/settings").send().await?;
    check_response(response, "Session probe").await?;
    Ok(())
}

pub async fn get_history(ctx: ApiContext<'_>, limit: u32) -> Result<Vec<WatchEvent>, SourceError> {
    let path = format!("/users/me/history?limit={}&extended=images", limit);
    let response = ctx.get(&path).send().await?;
    let response = check_response(response, "Fetch history").await?;
    let items: Vec<TraktHistoryItem> = response.json().await?;
    Ok(history_events(items))
}

pub async fn get_stats(ctx: ApiContext<'_>) -> Result<WatchStats, SourceError> {
    let response = ctx.get("/users/me/stats").send().await?;
    let response = check_response(response, "Fetch stats").await?;
    let stats: TraktStats = response.json().await?;
    Ok(watch_stats(stats))
}

pub async fn get_calendar(ctx: ApiContext<'_>, start: NaiveDate, days: u32) -> Result<RawCalendar, SourceError> {
    let start = start.format("%Y-%m-%d").to_string();
    let shows_path = format!("/calendars/my/shows/{}/{}?extended=images", start, days);
    let movies_path = format!("/calendars/my/movies/{}/{}?extended=images", start, days);

    let (shows, movies) = futures::try_join!(
        async {
            let response = ctx.get(&shows_path).send().await?;
            let response = check_response(response, "Fetch show calendar").await?;
            Ok::<_, SourceError>(response.json::<Vec<TraktCalendarShow>>().await?)
        },
        async {
            let response = ctx.get(&movies_path).send().await?;
            let response = check_response(response, "Fetch movie calendar").await?;
            Ok::<_, SourceError>(response.json::<Vec<TraktCalendarMovie>>().await?)
        }
    )?;

    Ok(RawCalendar {
        episodes: calendar_episodes(shows),
        movies: calendar_movies(movies),
    })
}

pub async fn get_seasons(ctx: ApiContext<'_>, show_slug: &str) -> Result<HashMap<u32, SeasonMetadata>, SourceError> {
    let path = format!(
        "/shows/{}/seasons?extended=full,images",
        urlencoding::encode(show_slug)
    );
    let response = ctx.get(&path).send().await?;
    let response = check_response(response, "Fetch seasons").await?;
    let seasons: Vec<TraktSeason> = response.json().await?;
    Ok(season_index(seasons))
}

pub async fn get_ratings(ctx: ApiContext<'_>) -> Result<RatingIndex, SourceError> {
    let response = ctx.get("/users/me/ratings").send().await?;
    let response = check_response(response, "Fetch ratings").await?;
    let items: Vec<TraktRatingItem> = response.json().await?;
    let index = rating_index(items);
    debug!(ratings = index.len(), "Fetched Trakt ratings");
    Ok(index)
}
