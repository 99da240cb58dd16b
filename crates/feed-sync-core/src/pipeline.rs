use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use feed_sync_config::Config;
use feed_sync_models::{FeedDocument, GroupedRecord, SeasonIndex};
use feed_sync_sources::{FeedSink, HistorySource};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use crate::cache::JsonCache;
use crate::calendar::group_calendar;
use crate::enrich::Enricher;
use crate::grouping::group_history;

/// Cache key of the last published document
pub const LATEST_KEY: &str = "latest";
/// Cache key of the last dry-run document
pub const DRY_RUN_KEY: &str = "dry-run";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub history_limit: u32,
    pub calendar_days: u32,
    pub max_items: usize,
    pub site_url: String,
    pub dry_run: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            history_limit: config.trakt.history_limit,
            calendar_days: config.trakt.calendar_days,
            max_items: config.feed.max_items,
            site_url: config.trakt.site_url.clone(),
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

pub struct SyncReport {
    pub document: FeedDocument,
    pub published: bool,
    /// Shows whose season lookup failed and fell back to show-level data
    pub season_failures: Vec<String>,
    pub duration: Duration,
}

/// fetch -> group -> collect references -> fetch references -> enrich ->
/// truncate -> publish
pub struct FeedPipeline {
    source: Box<dyn HistorySource>,
    sink: Box<dyn FeedSink>,
    cache: Option<JsonCache>,
    options: PipelineOptions,
}

impl FeedPipeline {
    pub fn new(source: Box<dyn HistorySource>, sink: Box<dyn FeedSink>, options: PipelineOptions) -> Self {
        Self {
            source,
            sink,
            cache: None,
            options,
        }
    }

    /// Keep a local copy of every document produced
    pub fn with_cache(mut self, cache: JsonCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    #[instrument(skip(self), fields(source = self.source.source_name(), sink = self.sink.sink_name()))]
    pub async fn run(&mut self) -> Result<SyncReport> {
        let start = Instant::now();
        let today = Utc::now().date_naive();

        let (document, season_failures) = self.build_document(today).await?;

        let published = if self.options.dry_run {
            info!(items = document.items.len(), "Dry run, skipping publish");
            false
        } else {
            self.sink
                .publish(&document)
                .await
                .with_context(|| format!("Failed to publish to {}", self.sink.sink_name()))?;
            true
        };

        if let Some(cache) = &self.cache {
            let key = if published { LATEST_KEY } else { DRY_RUN_KEY };
            if let Err(e) = cache.set(key, &document) {
                warn!(error = %e, "Failed to keep local copy of feed document");
            }
        }

        let duration = start.elapsed();
        info!(
            items = document.items.len(),
            calendar = document.calendar.len(),
            season_failures = season_failures.len(),
            duration_ms = duration.as_millis() as u64,
            "Feed sync complete"
        );
        Ok(SyncReport {
            document,
            published,
            season_failures,
            duration,
        })
    }

    /// Everything up to (not including) publishing
    pub async fn build_document(&mut self, today: NaiveDate) -> Result<(FeedDocument, Vec<String>)> {
        self.source
            .ensure_session()
            .await
            .context("History source session could not be established")?;

        let source = &*self.source;
        let (events, stats, calendar) = futures::try_join!(
            source.history(self.options.history_limit),
            source.stats(),
            source.calendar(today, self.options.calendar_days),
        )
        .context("Failed to fetch history, stats and calendar")?;
        debug!(
            events = events.len(),
            calendar_episodes = calendar.episodes.len(),
            calendar_movies = calendar.movies.len(),
            "Fetched source data"
        );

        let grouped = group_history(&events);
        let calendar_groups = group_calendar(&calendar.episodes);

        let slugs: BTreeSet<&str> = grouped
            .iter()
            .filter_map(|record| match record {
                GroupedRecord::Season(group) => Some(group.show.slug.as_str()),
                GroupedRecord::Movie { .. } => None,
            })
            .chain(calendar_groups.iter().map(|group| group.show.slug.as_str()))
            .collect();

        let season_fetches = join_all(slugs.iter().map(|slug| async move { (*slug, source.seasons(slug).await) }));
        let (season_results, ratings) = futures::join!(season_fetches, source.ratings());
        let ratings = ratings.context("Failed to fetch ratings")?;

        let mut seasons = SeasonIndex::new();
        let mut season_failures = Vec::new();
        for (slug, result) in season_results {
            match result {
                Ok(by_number) => {
                    seasons.insert(slug.to_string(), by_number);
                }
                Err(e) => {
                    warn!(show = slug, error = %e, "Season lookup failed, using show-level data");
                    season_failures.push(slug.to_string());
                }
            }
        }

        let updated_at = Utc::now();
        let enricher = Enricher::new(&self.options.site_url);
        let mut items = enricher.enrich(&grouped, &seasons, &ratings, updated_at);
        items.truncate(self.options.max_items);
        let calendar = enricher.enrich_calendar(&calendar_groups, &calendar.movies, &seasons, &ratings);

        let document = FeedDocument {
            updated_at,
            items,
            stats,
            calendar,
        };
        Ok((document, season_failures))
    }
}
