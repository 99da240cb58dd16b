use async_trait::async_trait;
use chrono::NaiveDate;
use feed_sync_config::CredentialStore;
use feed_sync_models::{RatingIndex, RawCalendar, SeasonMetadata, WatchEvent, WatchStats};
use reqwest::Client;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use crate::error::SourceError;
use crate::traits::{HistorySource, SecretStore};
use crate::trakt::api::{self, ApiContext};
use crate::trakt::auth::{self, TokenInfo};

/// Lifecycle of the access token within one process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Not probed yet, or the last probe succeeded
    Valid,
    Refreshing,
    /// Refresh did not produce a working token; nothing more is attempted
    InvalidFatal,
}

/// Names of the secrets the refreshed tokens are written to
#[derive(Debug, Clone)]
pub struct SecretNames {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct TraktClient {
    client: Arc<Client>,
    api_url: String,
    client_id: String,
    client_secret: String,
    access_token: String,
    refresh_token: Option<String>,
    token_state: TokenState,
    secret_store: Option<(Arc<dyn SecretStore>, SecretNames)>,
    credentials_file: Option<PathBuf>,
}

impl TraktClient {
    pub fn new(
        api_url: String,
        client_id: String,
        client_secret: String,
        access_token: String,
        refresh_token: Option<String>,
    ) -> Self {
        Self {
            client: Arc::new(auth::create_trakt_client()), // Use client with browser-like headers
            api_url: api_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            access_token,
            refresh_token,
            token_state: TokenState::Valid,
            secret_store: None,
            credentials_file: None,
        }
    }

    /// Write refreshed tokens to a remote secret store
    pub fn with_secret_store(mut self, store: Arc<dyn SecretStore>, names: SecretNames) -> Self {
        self.secret_store = Some((store, names));
        self
    }

    /// Also keep the local credentials file up to date after a refresh
    pub fn with_credentials_file(mut self, path: PathBuf) -> Self {
        self.credentials_file = Some(path);
        self
    }

    pub fn token_state(&self) -> TokenState {
        self.token_state
    }

    fn ctx(&self) -> ApiContext<'_> {
        ApiContext {
            client: &self.client,
            api_url: &self.api_url,
            access_token: &self.access_token,
            client_id: &self.client_id,
        }
    }

    async fn refresh_session(&mut self) -> Result<(), SourceError> {
        self.token_state = TokenState::Refreshing;
        info!(operation = "token_refresh", "Trakt access token rejected, refreshing");

        let refresh_token = match self.refresh_token.as_deref() {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => {
                self.token_state = TokenState::InvalidFatal;
                return Err(SourceError::Credentials("no refresh token available".to_string()));
            }
        };

        let token_info = match auth::refresh_access_token(
            &self.client,
            &self.api_url,
            &self.client_id,
            &self.client_secret,
            &refresh_token,
        )
        .await
        {
            Ok(info) => info,
            Err(e) => {
                self.token_state = TokenState::InvalidFatal;
                return Err(SourceError::Credentials(format!("token refresh failed: {}", e)));
            }
        };

        // Persist before the new token is used for anything else
        self.persist_tokens(&token_info).await;
        self.access_token = token_info.access_token;
        self.refresh_token = Some(token_info.refresh_token);

        match api::probe(self.ctx()).await {
            Ok(()) => {
                self.token_state = TokenState::Valid;
                info!(operation = "token_refresh", "Trakt token refreshed");
                Ok(())
            }
            Err(e) => {
                self.token_state = TokenState::InvalidFatal;
                error!(operation = "token_refresh", error = %e, "Refreshed Trakt token was rejected");
                Err(SourceError::Credentials(format!("refreshed token rejected: {}", e)))
            }
        }
    }

    /// Best effort: failures are logged and the in-memory session carries on
    async fn persist_tokens(&self, token_info: &TokenInfo) {
        if let Some((store, names)) = &self.secret_store {
            let results = futures::future::join(
                store.put_secret(&names.access_token, &token_info.access_token),
                store.put_secret(&names.refresh_token, &token_info.refresh_token),
            )
            .await;
            for result in [results.0, results.1] {
                if let Err(e) = result {
                    warn!(operation = "persist_tokens", error = %e, "Failed to write refreshed token to secret store");
                }
            }
        }

        if let Some(path) = &self.credentials_file {
            if let Err(e) = save_tokens_locally(path, token_info) {
                warn!(operation = "persist_tokens", error = %e, "Failed to save refreshed token locally");
            }
        }
    }
}

fn save_tokens_locally(path: &PathBuf, token_info: &TokenInfo) -> anyhow::Result<()> {
    let mut cred_store = CredentialStore::new(path.clone());
    cred_store.load()?;
    cred_store.set_trakt_access_token(token_info.access_token.clone());
    cred_store.set_trakt_refresh_token(token_info.refresh_token.clone());
    cred_store.set_trakt_token_expires(token_info.expires_at);
    cred_store.save()
}

#[async_trait]
impl HistorySource for TraktClient {
    fn source_name(&self) -> &str {
        "trakt"
    }

    async fn ensure_session(&mut self) -> Result<(), SourceError> {
        if self.token_state == TokenState::InvalidFatal {
            return Err(SourceError::Credentials(
                "Trakt credentials were already rejected in this process".to_string(),
            ));
        }

        match api::probe(self.ctx()).await {
            Ok(()) => {
                self.token_state = TokenState::Valid;
                Ok(())
            }
            Err(e) if e.is_unauthorized() => self.refresh_session().await,
            Err(e) => Err(e),
        }
    }

    async fn history(&self, limit: u32) -> Result<Vec<WatchEvent>, SourceError> {
        api::get_history(self.ctx(), limit).await
    }

    async fn stats(&self) -> Result<WatchStats, SourceError> {
        api::get_stats(self.ctx()).await
    }

    async fn calendar(&self, start: NaiveDate, days: u32) -> Result<RawCalendar, SourceError> {
        api::get_calendar(self.ctx(), start, days).await
    }

    async fn seasons(&self, show_slug: &str) -> Result<HashMap<u32, SeasonMetadata>, SourceError> {
        api::get_seasons(self.ctx(), show_slug).await
    }

    async fn ratings(&self) -> Result<RatingIndex, SourceError> {
        api::get_ratings(self.ctx()).await
    }
}
