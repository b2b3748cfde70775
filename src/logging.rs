//! File logging
//!
//! The hooked process owns stdout/stderr, so everything goes to
//! `<config dir>/conline.log` instead.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub const LOG_FILE: &str = "conline.log";

/// Install the global subscriber. Returns false if logging could not be set
/// up; the caller carries on regardless.
pub fn init(config_dir: &Path, level: &str) -> bool {
    let log_path: PathBuf = config_dir.join(LOG_FILE);

    let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) else {
        return false;
    };

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
