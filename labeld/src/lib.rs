//! Host daemon for the label printer engine: configuration, a sequential
//! print queue, an HTTP API and a one-shot CLI.

pub mod app;
pub mod config;
pub mod server;
pub mod services;
pub mod shutdown;

use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::config::validation::validate_setting;

/// Load `.env` from the first candidate that exists. Returns the path used.
pub fn load_dotenv() -> Option<&'static str> {
    let candidates = [".env", "../.env", "../../.env"];
    candidates
        .into_iter()
        .find(|path| dotenvy::from_filename(path).is_ok())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Read `.env`, load config and start logging.
pub fn init_foundation() -> AppConfig {
    let dotenv = load_dotenv();
    // logging comes up first so config warnings are not lost
    let level = std::env::var("LOG_LEVEL")
        .ok()
        .filter(|v| validate_setting("LOG_LEVEL", v.trim()).is_ok())
        .unwrap_or_else(|| AppConfig::default().log_level);
    init_tracing(level.trim());
    let config = AppConfig::from_env();

    match dotenv {
        Some(path) => tracing::info!("Loaded .env from: {path}"),
        None => tracing::info!("No .env file found, using system environment variables"),
    }
    tracing::info!(
        family = %config.printer_family,
        device = %config.hidraw_path.display(),
        dry_run = config.dry_run_mode,
        "Configuration loaded"
    );
    config
}
