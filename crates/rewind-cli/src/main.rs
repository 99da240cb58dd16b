use clap::{ArgAction, Parser, Subcommand};
use commands::{clear, config, daemon, playlist, show, sync};
use feed_sync_config::PathManager;
use feed_sync_core::SortKey;

mod commands;
mod logging;
mod output;

#[derive(Parser)]
#[command(name = "rewind")]
#[command(about = "Rewind - publish what you watched, keep your playlists in order")]
#[command(version)]
struct Cli {
    /// Enable verbose output (use multiple times for more verbosity: -v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "human", value_enum)]
    output: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the watch feed and publish it once
    #[command(long_about = "Fetch watch history, stats, ratings and the upcoming calendar from Trakt, group and enrich them, and publish the resulting document to the configured gist.")]
    Sync {
        /// Build the document but do not publish it. A local copy is still cached.
        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Publish the feed on a fixed interval
    #[command(long_about = "Run Rewind as a long-lived process that rebuilds and publishes the feed every N minutes. The first sync runs immediately unless --no-startup-sync is given.")]
    Daemon {
        /// Minutes between syncs (defaults to feed.refresh_interval_minutes)
        #[arg(long, value_name = "MINUTES")]
        interval_minutes: Option<u64>,

        /// Skip the sync on startup
        #[arg(long, action = ArgAction::SetTrue)]
        no_startup_sync: bool,
    },
    /// Show the last document produced by sync
    Show {
        /// Show the last dry-run document instead of the last published one
        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,

        /// Read the published document from the gist instead of the local copy
        #[arg(long, action = ArgAction::SetTrue, conflicts_with = "dry_run")]
        remote: bool,
    },
    /// Inspect or create configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
    /// Clear cached data
    #[command(long_about = "Clear cached data or stored credentials. Use --cache to clear the feed and playlist caches, --credentials to remove stored tokens, or --all to clear everything.")]
    Clear {
        /// Clear cache and credentials
        #[arg(long, action = ArgAction::SetTrue, conflicts_with_all = ["cache", "credentials"])]
        all: bool,

        /// Clear feed and playlist caches
        #[arg(long, action = ArgAction::SetTrue)]
        cache: bool,

        /// Clear stored credentials
        #[arg(long, action = ArgAction::SetTrue)]
        credentials: bool,
    },
    /// Work with the music library behind the playlist relay
    Playlist {
        #[command(subcommand)]
        cmd: PlaylistCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration (masks sensitive data)
    Show {
        /// Show secrets unmasked
        #[arg(long, action = ArgAction::SetTrue)]
        full: bool,
    },
    /// Write a template config file
    Init {
        /// Overwrite an existing config file
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum PlaylistCommands {
    /// List playlists with their track counts
    List,
    /// Show one page of liked tracks
    Liked {
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Add a track to a playlist
    Add { playlist_id: String, track_id: String },
    /// Remove a track from the liked collection
    Unlike { track_id: String },
    /// Print a playlist's tracks in sorted order
    Sort {
        playlist_id: String,

        /// name, artist, duration, tempo or energy
        #[arg(long, default_value = "name")]
        by: SortKey,

        #[arg(long, action = ArgAction::SetTrue)]
        descending: bool,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // The daemon also writes a daily-rotated log file
    let log_file = match cli.command {
        Commands::Daemon { .. } => Some(PathManager::default().daemon_log_file()),
        _ => None,
    };
    logging::init_logging(cli.verbose, cli.quiet, log_file).map_err(|e| color_eyre::eyre::eyre!("{}", e))?;

    let output = output::Output::new(cli.output, cli.quiet);

    match cli.command {
        Commands::Sync { dry_run } => sync::run_sync(dry_run, &output).await,
        Commands::Daemon {
            interval_minutes,
            no_startup_sync,
        } => daemon::run_daemon(interval_minutes, no_startup_sync, &output).await,
        Commands::Show { dry_run, remote } => show::run_show(dry_run, remote, &output).await,
        Commands::Config { cmd } => config::run_config(cmd, &output),
        Commands::Clear { all, cache, credentials } => clear::run_clear(all, cache, credentials, &output),
        Commands::Playlist { cmd } => playlist::run_playlist(cmd, &output).await,
    }
}
