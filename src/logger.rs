use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Error, Result};

pub const LOG_DIR_ENV: &str = "GITHUB_AUTOSAVE_LOG_DIR";

/// `$GITHUB_AUTOSAVE_LOG_DIR`, else `<data_local_dir>/github-autosave/logs`.
pub fn default_log_dir() -> Option<PathBuf> {
    if let Ok(dir) = env::var(LOG_DIR_ENV) {
        if !dir.is_empty() {
            return Some(dir.into());
        }
    }
    dirs::data_local_dir().map(|d| d.join("github-autosave").join("logs"))
}

pub fn log_file_name(now: DateTime<Local>) -> String {
    format!("autosave_{}.log", now.format("%Y%m%d"))
}

/// Installs the global subscriber: human readable lines on stderr, plus a
/// daily file in `log_dir` when given. `RUST_LOG` overrides the level.
/// Returns the log file in use.
pub fn init(log_dir: Option<&Path>, verbose: bool) -> Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "info,github_autosave=debug"
        } else {
            "info"
        })
    });

    let (file_layer, file_path) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|e| Error::fs(dir, e))?;
            let path = dir.join(log_file_name(Local::now()));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| Error::fs(&path, e))?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    // A subscriber may already be installed (tests); keep it.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .try_init();

    Ok(file_path)
}
