use feed_sync_models::{GroupedRecord, SeasonGroup, WatchEvent};

/// Collapse runs of consecutive same-show, same-season episodes.
///
/// Single forward pass with at most one open group. Merging is strictly
/// adjacency based: a show/season that comes back after anything else
/// starts a new group.
pub fn group_history(events: &[WatchEvent]) -> Vec<GroupedRecord> {
    let mut grouped = Vec::with_capacity(events.len());
    let mut open: Option<SeasonGroup> = None;

    for event in events {
        match event {
            WatchEvent::Movie { watched_at, movie } => {
                if let Some(group) = open.take() {
                    grouped.push(GroupedRecord::Season(group));
                }
                grouped.push(GroupedRecord::Movie {
                    watched_at: *watched_at,
                    movie: movie.clone(),
                });
            }
            WatchEvent::Episode {
                watched_at,
                show,
                season,
                number,
            } => {
                if let Some(group) = open.as_mut().filter(|g| g.matches(show, *season)) {
                    group.episodes.push(*number);
                    continue;
                }
                let next = SeasonGroup::new(show.clone(), *season, *number, *watched_at);
                if let Some(group) = open.replace(next) {
                    grouped.push(GroupedRecord::Season(group));
                }
            }
        }
    }

    if let Some(group) = open {
        grouped.push(GroupedRecord::Season(group));
    }
    grouped
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use feed_sync_models::{MovieRef, ShowRef, WatchEvent};

    pub fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 21, 0, 0).unwrap()
    }

    pub fn show(id: u64, slug: &str) -> ShowRef {
        ShowRef {
            trakt_id: id,
            slug: slug.to_string(),
            title: slug.replace('-', " "),
            year: Some(2020),
            poster: Some(format!("https://img/{}.jpg", slug)),
        }
    }

    pub fn movie(id: u64, slug: &str) -> MovieRef {
        MovieRef {
            trakt_id: id,
            slug: slug.to_string(),
            title: slug.replace('-', " "),
            year: Some(2019),
            poster: None,
        }
    }

    /// `hours_ago` keeps the list newest-first when callers pass increasing values
    pub fn episode(show: &ShowRef, season: u32, number: u32, hours_ago: i64) -> WatchEvent {
        WatchEvent::Episode {
            watched_at: base_time() - Duration::hours(hours_ago),
            show: show.clone(),
            season,
            number,
        }
    }

    pub fn movie_event(movie: &MovieRef, hours_ago: i64) -> WatchEvent {
        WatchEvent::Movie {
            watched_at: base_time() - Duration::hours(hours_ago),
            movie: movie.clone(),
        }
    }

    /// Two shows, two movies, one interleaving: A S1E5, A S1E4, M1, B S2E1,
    /// A S1E3, A S1E2, M2
    pub fn mixed_history() -> Vec<WatchEvent> {
        let a = show(1, "show-a");
        let b = show(2, "show-b");
        vec![
            episode(&a, 1, 5, 1),
            episode(&a, 1, 4, 2),
            movie_event(&movie(10, "movie-one"), 3),
            episode(&b, 2, 1, 4),
            episode(&a, 1, 3, 5),
            episode(&a, 1, 2, 6),
            movie_event(&movie(11, "movie-two"), 7),
        ]
    }
}
