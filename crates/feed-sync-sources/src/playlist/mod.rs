pub mod relay;

pub use relay::RelayPlaylistClient;
