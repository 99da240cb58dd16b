pub mod traits;
pub mod error;
pub mod trakt;
pub mod github;
pub mod playlist;

#[cfg(test)]
pub(crate) mod test_support;

pub use traits::{FeedSink, HistorySource, PlaylistStore, SecretStore};
pub use error::SourceError;
pub use trakt::{TraktClient, TokenState};
pub use github::{GistSink, GithubSecretStore};
pub use playlist::RelayPlaylistClient;
