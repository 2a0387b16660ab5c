use log::{error, info};
use std::fs;
use std::path::Path;

use crate::config::AppConfig;

/// Create the data directory and the database's parent directory. Call
/// before the pool is opened.
pub fn run(config: &AppConfig) -> Result<(), String> {
    info!("[boot] iRankHub boot check starting...");

    let mut dirs = vec![Path::new(&config.data_dir)];
    if let Some(parent) = Path::new(&config.database_path).parent() {
        if !parent.as_os_str().is_empty() {
            dirs.push(parent);
        }
    }

    for dir in dirs {
        if dir.exists() {
            continue;
        }
        match fs::create_dir_all(dir) {
            Ok(_) => info!("[boot] Created directory: {}", dir.display()),
            Err(e) => {
                error!("[boot] FAILED to create directory {}: {}", dir.display(), e);
                return Err(format!("Cannot create {}: {}", dir.display(), e));
            }
        }
    }

    info!("[boot] Boot check passed");
    Ok(())
}
