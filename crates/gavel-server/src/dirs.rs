use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Resolve the data directory for the collection database (`gavel.db`).
///
/// Priority:
/// 1. `GAVEL_DATA_DIR` environment variable
/// 2. Platform-specific app data dir (`~/.local/share/gavel/`, etc.)
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("GAVEL_DATA_DIR") {
        let path = PathBuf::from(dir);
        std::fs::create_dir_all(&path).context("create GAVEL_DATA_DIR")?;
        return Ok(path);
    }

    let dirs = ProjectDirs::from("", "", "gavel")
        .context("could not determine platform data directory")?;

    let path = dirs.data_dir().to_owned();
    std::fs::create_dir_all(&path).context("create platform data dir")?;
    Ok(path)
}
