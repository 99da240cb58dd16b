//! Optimistic playlist mutations against a remote library.

pub mod retry;
pub mod state;
pub mod engine;
pub mod sort;

pub use engine::{
    fetch_full_state, EngineOptions, MutationKey, MutationOutcome, MutationStatus, PlaylistEngine, RefreshError,
    RefreshReport,
};
pub use retry::RetryPolicy;
pub use sort::{load_sorted, sort_tracks, SortKey, SortedTrack};
pub use state::{Delta, DeltaId, LayeredState};
