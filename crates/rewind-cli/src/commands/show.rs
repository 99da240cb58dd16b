use super::{feed_cache, load_config, load_credentials, published_sink};
use crate::output::{new_table, Output};
use chrono::{NaiveDate, Utc};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use feed_sync_config::PathManager;
use feed_sync_core::pipeline::{DRY_RUN_KEY, LATEST_KEY};
use feed_sync_core::relative_label;
use feed_sync_models::{CalendarItem, DisplayItem, EpisodeType, FeedDocument, ItemType};
use feed_sync_sources::FeedSink;

pub async fn run_show(dry_run: bool, remote: bool, output: &Output) -> Result<()> {
    let path_manager = PathManager::default();

    let document = if remote {
        let config = load_config(&path_manager)?;
        let creds = load_credentials(&path_manager)?;
        published_sink(&config, &creds)?
            .read()
            .await
            .map_err(|e| eyre!("Failed to read published document: {}", e))?
    } else {
        let key = if dry_run { DRY_RUN_KEY } else { LATEST_KEY };
        feed_cache(&path_manager)?.get::<FeedDocument>(key)
    };

    let document = match document {
        Some(document) => document,
        None => {
            output.warn("No document found. Run 'rewind sync' first.");
            return Ok(());
        }
    };

    if !output.is_human() {
        output.json(&serde_json::to_value(&document)?);
        return Ok(());
    }

    let today = Utc::now().date_naive();
    let mut history = new_table(["When", "Type", "Title", "Episodes", "Rating"]);
    for row in history_rows(&document.items, today) {
        history.add_row(row);
    }
    output.table(
        &format!("Recently watched (updated {})", document.updated_at.format("%Y-%m-%d %H:%M UTC")),
        history,
    );

    if !document.calendar.is_empty() {
        let mut upcoming = new_table(["Date", "Title", "Episodes", "Note"]);
        for row in calendar_rows(&document.calendar) {
            upcoming.add_row(row);
        }
        output.table("Coming up", upcoming);
    }

    output.info(format!(
        "{} movies, {} shows, {} hours watched",
        document.stats.movies_watched, document.stats.shows_watched, document.stats.total_hours
    ));
    Ok(())
}

fn type_label(item_type: ItemType) -> &'static str {
    match item_type {
        ItemType::Movie => "movie",
        ItemType::Episode => "episode",
        ItemType::Season => "season",
    }
}

fn episode_note(episode_type: Option<EpisodeType>) -> &'static str {
    match episode_type {
        Some(EpisodeType::SeriesPremiere) => "series premiere",
        Some(EpisodeType::SeasonPremiere) => "season premiere",
        Some(EpisodeType::MidSeasonPremiere) => "mid-season premiere",
        Some(EpisodeType::MidSeasonFinale) => "mid-season finale",
        Some(EpisodeType::SeasonFinale) => "season finale",
        Some(EpisodeType::SeriesFinale) => "series finale",
        Some(EpisodeType::Standard) => "",
        None => "release",
    }
}

fn history_rows(items: &[DisplayItem], today: NaiveDate) -> Vec<Vec<String>> {
    items
        .iter()
        .map(|item| {
            vec![
                relative_label(&item.watched_at, today).unwrap_or_else(|| item.watched_at.clone()),
                type_label(item.item_type).to_string(),
                item.title.clone(),
                item.subtitle.clone().unwrap_or_default(),
                item.rating.map(|r| r.to_string()).unwrap_or_default(),
            ]
        })
        .collect()
}

fn calendar_rows(items: &[CalendarItem]) -> Vec<Vec<String>> {
    items
        .iter()
        .map(|item| {
            vec![
                item.date.clone(),
                item.title.clone(),
                item.subtitle.clone().unwrap_or_default(),
                episode_note(item.episode_type).to_string(),
            ]
        })
        .collect()
}
