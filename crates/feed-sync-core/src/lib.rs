pub mod granularity;
pub mod subtitle;
pub mod grouping;
pub mod calendar;
pub mod enrich;
pub mod cache;
pub mod pipeline;
pub mod playlist;

pub use granularity::{day_string, decode, encode, relative_label, Granularity};
pub use subtitle::format_subtitle;
pub use grouping::group_history;
pub use calendar::group_calendar;
pub use enrich::Enricher;
pub use cache::JsonCache;
pub use pipeline::{FeedPipeline, PipelineOptions, SyncReport};
pub use playlist::{
    EngineOptions, MutationKey, MutationOutcome, MutationStatus, PlaylistEngine, RefreshError, RefreshReport,
    RetryPolicy, SortKey,
};
