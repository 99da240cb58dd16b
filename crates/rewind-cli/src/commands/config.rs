use super::load_credentials;
use crate::output::{mask_secret, new_table, Output};
use crate::ConfigCommands;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use comfy_table::Table;
use feed_sync_config::{Config, CredentialStore, PathManager};
use serde_json::json;

pub fn run_config(cmd: ConfigCommands, output: &Output) -> Result<()> {
    match cmd {
        ConfigCommands::Show { full } => show_config(full, output),
        ConfigCommands::Init { force } => init_config(force, output),
    }
}

fn init_config(force: bool, output: &Output) -> Result<()> {
    let path_manager = PathManager::default();
    let config_file = path_manager.config_file();

    if config_file.exists() && !force {
        output.warn(format!(
            "Configuration already exists at {}. Use --force to overwrite it.",
            config_file.display()
        ));
        return Ok(());
    }

    path_manager
        .ensure_directories()
        .map_err(|e| eyre!("Failed to create directories under {}: {}", path_manager.config_dir().display(), e))?;
    Config::template()
        .save_to_file(&config_file)
        .map_err(|e| eyre!("Failed to save config to {}: {}", config_file.display(), e))?;

    output.success(format!("Wrote template configuration to {}", config_file.display()));
    output.info("Fill in [trakt] and [publish], then provide tokens via credentials.toml or REWIND_* variables.");
    Ok(())
}

fn show_config(full: bool, output: &Output) -> Result<()> {
    let path_manager = PathManager::default();
    let config_file = path_manager.config_file();

    if !config_file.exists() {
        output.warn(format!("Configuration file not found at: {}", config_file.display()));
        output.info("Run 'rewind config init' to create one.");
        return Ok(());
    }

    let config = Config::load_from_file(&config_file)
        .map_err(|e| eyre!("Failed to load config from {}: {}", config_file.display(), e))?;
    let creds = load_credentials(&path_manager)?;
    let secret = |value: Option<&String>| -> String {
        match value {
            Some(value) if full => value.clone(),
            Some(value) => mask_secret(value),
            None => "<not set>".to_string(),
        }
    };

    if !output.is_human() {
        output.json(&json!({
            "config_file": config_file.display().to_string(),
            "config": serde_json::to_value(&config)?,
            "valid": config.validate().is_ok(),
            "credentials": {
                "trakt_access_token": secret(creds.get_trakt_access_token()),
                "trakt_refresh_token": secret(creds.get_trakt_refresh_token()),
                "github_token": secret(creds.get_github_token()),
                "playlist_access_token": secret(creds.get_playlist_access_token()),
            },
        }));
        return Ok(());
    }

    let mut files = new_table(["File", "Path"]);
    files.add_row(vec!["Config".to_string(), config_file.display().to_string()]);
    files.add_row(vec!["Credentials".to_string(), path_manager.credentials_file().display().to_string()]);
    files.add_row(vec!["Cache".to_string(), path_manager.cache_dir().display().to_string()]);
    output.table("Files", files);

    output.table("Trakt", trakt_table(&config, full));
    output.table("Feed", feed_table(&config));

    let mut credentials = new_table(["Credential", "Value"]);
    for (name, value) in credential_rows(&creds) {
        credentials.add_row(vec![name.to_string(), secret(value)]);
    }
    output.table("Credentials", credentials);

    match config.validate() {
        Ok(()) => output.success("Configuration is valid"),
        Err(e) => output.warn(format!("Configuration is incomplete: {}", e)),
    }
    Ok(())
}

fn trakt_table(config: &Config, full: bool) -> Table {
    let client_secret = if full {
        config.trakt.client_secret.clone()
    } else {
        mask_secret(&config.trakt.client_secret)
    };
    let mut table = new_table(["Setting", "Value"]);
    table.add_row(vec!["client_id".to_string(), config.trakt.client_id.clone()]);
    table.add_row(vec!["client_secret".to_string(), client_secret]);
    table.add_row(vec!["history_limit".to_string(), config.trakt.history_limit.to_string()]);
    table.add_row(vec!["calendar_days".to_string(), config.trakt.calendar_days.to_string()]);
    table.add_row(vec!["api_url".to_string(), config.trakt.api_url.clone()]);
    table.add_row(vec!["site_url".to_string(), config.trakt.site_url.clone()]);
    table
}

fn feed_table(config: &Config) -> Table {
    let mut table = new_table(["Setting", "Value"]);
    table.add_row(vec!["max_items".to_string(), config.feed.max_items.to_string()]);
    table.add_row(vec![
        "refresh_interval_minutes".to_string(),
        config.feed.refresh_interval_minutes.to_string(),
    ]);
    let (gist, filename) = match &config.publish {
        Some(publish) => (publish.gist_id.clone(), publish.filename.clone()),
        None => ("<not set>".to_string(), "-".to_string()),
    };
    table.add_row(vec!["publish.gist_id".to_string(), gist]);
    table.add_row(vec!["publish.filename".to_string(), filename]);
    if let Some(secrets) = &config.secrets {
        table.add_row(vec!["secrets.repository".to_string(), format!("{}/{}", secrets.owner, secrets.repo)]);
    }
    if let Some(playlists) = &config.playlists {
        table.add_row(vec!["playlists.relay_url".to_string(), playlists.relay_url.clone()]);
        table.add_row(vec![
            "playlists.max_refresh_attempts".to_string(),
            playlists.max_refresh_attempts.to_string(),
        ]);
    }
    table
}

fn credential_rows(creds: &CredentialStore) -> [(&'static str, Option<&String>); 4] {
    [
        ("trakt_access_token", creds.get_trakt_access_token()),
        ("trakt_refresh_token", creds.get_trakt_refresh_token()),
        ("github_token", creds.get_github_token()),
        ("playlist_access_token", creds.get_playlist_access_token()),
    ]
}
