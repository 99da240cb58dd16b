pub mod config;
pub mod credentials;
pub mod paths;

pub use config::{Config, FeedConfig, PlaylistConfig, PublishConfig, RetryConfig, SecretsConfig, TraktConfig};
pub use credentials::CredentialStore;
pub use paths::{PathManager, container_base_path};
