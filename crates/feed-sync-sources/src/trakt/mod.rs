pub mod client;
pub mod auth;
pub mod api;

pub use client::{SecretNames, TokenState, TraktClient};
