use chrono::{DateTime, Datelike, Utc};
use feed_sync_models::{
    CalendarGroup, CalendarItem, CalendarMovie, DisplayItem, EpisodeType, GroupedRecord, ItemType, MovieRef,
    RatingIndex, SeasonIndex, SeasonMetadata, ShowRef,
};
use crate::granularity::{day_string, encode};
use crate::subtitle::format_subtitle;

/// Display fields shared by history and calendar rows
struct Resolved {
    item_type: ItemType,
    title: String,
    subtitle: Option<String>,
    year: Option<i32>,
    poster: Option<String>,
    url: String,
    rating: Option<u8>,
}

/// Joins grouped records with season metadata and ratings.
///
/// Every lookup is best effort; a missing season or rating only leaves the
/// corresponding field empty.
#[derive(Debug, Clone)]
pub struct Enricher {
    site_url: String,
}

impl Enricher {
    pub fn new(site_url: &str) -> Self {
        Self {
            site_url: site_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn movie_url(&self, slug: &str) -> String {
        format!("{}/movies/{}", self.site_url, slug)
    }

    pub fn season_url(&self, slug: &str, season: u32) -> String {
        format!("{}/shows/{}/seasons/{}", self.site_url, slug, season)
    }

    pub fn episode_url(&self, slug: &str, season: u32, episode: u32) -> String {
        format!("{}/shows/{}/seasons/{}/episodes/{}", self.site_url, slug, season, episode)
    }

    /// History rows; `watched_at` is encoded at the precision its age
    /// relative to `now` allows
    pub fn enrich(
        &self,
        grouped: &[GroupedRecord],
        seasons: &SeasonIndex,
        ratings: &RatingIndex,
        now: DateTime<Utc>,
    ) -> Vec<DisplayItem> {
        grouped
            .iter()
            .map(|record| {
                let (resolved, watched_at) = match record {
                    GroupedRecord::Movie { watched_at, movie } => (self.movie(movie, ratings), *watched_at),
                    GroupedRecord::Season(group) => (
                        self.season_group(&group.show, group.season, &group.episodes, seasons, ratings),
                        group.watched_at,
                    ),
                };
                DisplayItem {
                    item_type: resolved.item_type,
                    title: resolved.title,
                    subtitle: resolved.subtitle,
                    year: resolved.year,
                    poster: resolved.poster,
                    watched_at: encode(watched_at, now),
                    url: resolved.url,
                    rating: resolved.rating,
                }
            })
            .collect()
    }

    /// Calendar rows for grouped episodes and movie releases, ascending by date
    pub fn enrich_calendar(
        &self,
        groups: &[CalendarGroup],
        movies: &[CalendarMovie],
        seasons: &SeasonIndex,
        ratings: &RatingIndex,
    ) -> Vec<CalendarItem> {
        let episodes = groups.iter().map(|group| {
            let resolved = self.season_group(&group.show, group.season, &group.episodes, seasons, ratings);
            calendar_item(resolved, day_string(group.air_date), Some(group.episode_type))
        });
        let releases = movies
            .iter()
            .map(|release| calendar_item(self.movie(&release.movie, ratings), day_string(release.released), None));

        let mut items: Vec<CalendarItem> = episodes.chain(releases).collect();
        items.sort_by(|a, b| a.date.cmp(&b.date));
        items
    }

    fn movie(&self, movie: &MovieRef, ratings: &RatingIndex) -> Resolved {
        Resolved {
            item_type: ItemType::Movie,
            title: movie.title.clone(),
            subtitle: None,
            year: movie.year,
            poster: movie.poster.clone(),
            url: self.movie_url(&movie.slug),
            rating: ratings.movie(movie.trakt_id),
        }
    }

    /// One-episode groups render as an episode and use the episode rating
    /// chain; larger groups render as a season and never look at episode
    /// ratings.
    fn season_group(
        &self,
        show: &ShowRef,
        season: u32,
        episodes: &[u32],
        seasons: &SeasonIndex,
        ratings: &RatingIndex,
    ) -> Resolved {
        let metadata: Option<&SeasonMetadata> = seasons.get(&show.slug).and_then(|by_number| by_number.get(&season));
        let year = metadata
            .and_then(|m| m.first_aired)
            .map(|date| date.year())
            .or(show.year);
        let poster = metadata
            .and_then(|m| m.poster.clone())
            .or_else(|| show.poster.clone());

        let (item_type, url, rating) = match episodes {
            [episode] => (
                ItemType::Episode,
                self.episode_url(&show.slug, season, *episode),
                ratings.episode(show.trakt_id, season, *episode),
            ),
            _ => (
                ItemType::Season,
                self.season_url(&show.slug, season),
                ratings.season(show.trakt_id, season),
            ),
        };

        Resolved {
            item_type,
            title: show.title.clone(),
            subtitle: Some(format_subtitle(season, episodes)),
            year,
            poster,
            url,
            rating,
        }
    }
}

fn calendar_item(resolved: Resolved, date: String, episode_type: Option<EpisodeType>) -> CalendarItem {
    CalendarItem {
        item_type: resolved.item_type,
        title: resolved.title,
        subtitle: resolved.subtitle,
        year: resolved.year,
        poster: resolved.poster,
        date,
        url: resolved.url,
        rating: resolved.rating,
        episode_type,
    }
}
