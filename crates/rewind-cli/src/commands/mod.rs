pub mod clear;
pub mod config;
pub mod daemon;
pub mod playlist;
pub mod show;
pub mod sync;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use feed_sync_config::{Config, CredentialStore, PathManager};
use feed_sync_core::{FeedPipeline, JsonCache, PipelineOptions};
use feed_sync_sources::github::DEFAULT_API_URL;
use feed_sync_sources::trakt::SecretNames;
use feed_sync_sources::{GistSink, GithubSecretStore, TraktClient};
use std::sync::Arc;
use tracing::{debug, warn};

pub fn load_config(path_manager: &PathManager) -> Result<Config> {
    let config_file = path_manager.config_file();
    if !config_file.exists() {
        return Err(eyre!(
            "Configuration file not found at {}. Run 'rewind config init' to create one.",
            config_file.display()
        ));
    }
    let config = Config::load_from_file(&config_file)
        .map_err(|e| eyre!("Failed to load config from {}: {}", config_file.display(), e))?;
    config
        .validate()
        .map_err(|e| eyre!("Configuration validation failed: {}", e))?;
    Ok(config)
}

/// File values with `REWIND_*` environment overrides applied
pub fn load_credentials(path_manager: &PathManager) -> Result<CredentialStore> {
    let credentials_file = path_manager.credentials_file();
    let mut cred_store = CredentialStore::new(credentials_file.clone());
    cred_store
        .load()
        .map_err(|e| eyre!("Failed to load credentials from {}: {}", credentials_file.display(), e))?;
    cred_store.apply_env_overrides();
    Ok(cred_store)
}

pub fn feed_cache(path_manager: &PathManager) -> Result<JsonCache> {
    JsonCache::new(path_manager.feed_cache_dir()).map_err(|e| eyre!("Failed to open feed cache: {}", e))
}

fn gist_sink(config: &Config, creds: &CredentialStore, dry_run: bool) -> Result<GistSink> {
    let publish = config
        .publish
        .as_ref()
        .ok_or_else(|| eyre!("No [publish] section configured"))?;
    let token = match creds.get_github_token() {
        Some(token) => token.clone(),
        // Never used without publishing
        None if dry_run => String::new(),
        None => return Err(eyre!("No GitHub token configured (set REWIND_GITHUB_TOKEN)")),
    };
    Ok(GistSink::new(DEFAULT_API_URL, &token, &publish.gist_id, &publish.filename))
}

fn trakt_client(config: &Config, creds: &CredentialStore, path_manager: &PathManager) -> Result<TraktClient> {
    let access_token = creds
        .get_trakt_access_token()
        .cloned()
        .ok_or_else(|| eyre!("No Trakt access token configured (set REWIND_TRAKT_ACCESS_TOKEN)"))?;

    let mut client = TraktClient::new(
        config.trakt.api_url.clone(),
        config.trakt.client_id.clone(),
        config.trakt.client_secret.clone(),
        access_token,
        creds.get_trakt_refresh_token().cloned(),
    )
    .with_credentials_file(path_manager.credentials_file());

    match (&config.secrets, creds.get_github_token()) {
        (Some(secrets), Some(token)) => {
            debug!(owner = %secrets.owner, repo = %secrets.repo, "Refreshed tokens will be written to repository secrets");
            let store = GithubSecretStore::new(DEFAULT_API_URL, token, &secrets.owner, &secrets.repo);
            client = client.with_secret_store(
                Arc::new(store),
                SecretNames {
                    access_token: secrets.access_token_secret.clone(),
                    refresh_token: secrets.refresh_token_secret.clone(),
                },
            );
        }
        (Some(_), None) => warn!("[secrets] is configured but no GitHub token is available, skipping secret write-back"),
        _ => {}
    }
    Ok(client)
}

pub fn build_pipeline(
    config: &Config,
    creds: &CredentialStore,
    path_manager: &PathManager,
    dry_run: bool,
) -> Result<FeedPipeline> {
    let source = trakt_client(config, creds, path_manager)?;
    let sink = gist_sink(config, creds, dry_run)?;
    let options = PipelineOptions::from_config(config).with_dry_run(dry_run);

    let pipeline = FeedPipeline::new(Box::new(source), Box::new(sink), options);
    Ok(match feed_cache(path_manager) {
        Ok(cache) => pipeline.with_cache(cache),
        Err(e) => {
            warn!(error = %e, "Feed cache unavailable, documents will not be kept locally");
            pipeline
        }
    })
}

/// Reader for the published document, for `show --remote`
pub fn published_sink(config: &Config, creds: &CredentialStore) -> Result<GistSink> {
    gist_sink(config, creds, false)
}
