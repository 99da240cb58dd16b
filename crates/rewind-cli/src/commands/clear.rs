use crate::output::Output;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use feed_sync_config::PathManager;
use feed_sync_core::JsonCache;
use std::fs;
use std::path::PathBuf;

pub fn run_clear(all: bool, cache: bool, credentials: bool, output: &Output) -> Result<()> {
    let path_manager = PathManager::default();

    if all {
        clear_cache(&path_manager, output)?;
        clear_credentials(&path_manager, output)?;
        output.success("All cache and credentials cleared");
        return Ok(());
    }

    if cache {
        clear_cache(&path_manager, output)?;
    }
    if credentials {
        clear_credentials(&path_manager, output)?;
    }
    if !cache && !credentials {
        output.warn("No clear option specified. Use --cache, --credentials, or --all");
        output.info("Example: rewind clear --cache");
    }

    Ok(())
}

fn clear_cache(path_manager: &PathManager, output: &Output) -> Result<()> {
    let dirs: [(&str, PathBuf); 2] = [
        ("feed", path_manager.feed_cache_dir()),
        ("playlist", path_manager.playlist_cache_dir()),
    ];
    for (name, dir) in dirs {
        if !dir.exists() {
            output.info(format!("No {} cache found to clear", name));
            continue;
        }
        let cache = JsonCache::new(dir.clone()).map_err(|e| eyre!("Failed to open {} cache: {}", name, e))?;
        match cache.clear() {
            Ok(()) => output.success(format!("Cleared {} cache: {}", name, dir.display())),
            Err(e) => output.warn(format!("Failed to clear {} cache: {}", name, e)),
        }
    }
    Ok(())
}

fn clear_credentials(path_manager: &PathManager, output: &Output) -> Result<()> {
    let credentials_file = path_manager.credentials_file();

    if credentials_file.exists() {
        fs::remove_file(&credentials_file).map_err(|e| {
            eyre!("Failed to remove credentials file at {}: {}", credentials_file.display(), e)
        })?;
        output.success(format!("Cleared credentials: {}", credentials_file.display()));
    } else {
        output.info("No credentials file found to clear");
    }

    Ok(())
}
