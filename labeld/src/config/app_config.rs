//! Runtime configuration loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use labelprinter::{Family, JobParams};

use super::validation::validate_setting;

/// Runtime configuration populated from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub printer_family: Family,
    pub hidraw_path: PathBuf,
    pub server_port: u16,
    pub dry_run_mode: bool,
    pub reply_timeout_ms: u64,
    pub print_speed: u16,
    pub print_density: u8,
    pub paper_type: u8,
    pub cut_type: u8,
    pub label_gap: u8,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            printer_family: Family::T5080,
            hidraw_path: PathBuf::from("/dev/hidraw0"),
            server_port: 8080,
            dry_run_mode: false,
            reply_timeout_ms: 2000,
            print_speed: 60,
            print_density: 8,
            paper_type: 1,
            cut_type: 0,
            label_gap: 8,
            log_level: "info".into(),
        }
    }
}

impl AppConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::load(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`. Missing keys take their default;
    /// invalid values are logged and replaced by the default.
    pub fn load(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let g = |key: &str| -> String {
            let Some(value) = lookup(key).map(|v| v.trim().to_string()) else {
                return String::new();
            };
            if value.is_empty() {
                return value;
            }
            match validate_setting(key, &value) {
                Ok(()) => value,
                Err(reason) => {
                    tracing::warn!(key, value = %value, reason = %reason, "Invalid setting, using default");
                    String::new()
                }
            }
        };

        Self {
            printer_family: g("PRINTER_FAMILY").parse().unwrap_or(d.printer_family),
            hidraw_path: {
                let path = g("HIDRAW_PATH");
                if path.is_empty() { d.hidraw_path } else { PathBuf::from(path) }
            },
            server_port: parse_or(&g("SERVER_PORT"), d.server_port),
            dry_run_mode: match g("DRY_RUN_MODE").as_str() {
                "" => d.dry_run_mode,
                v => v == "true",
            },
            reply_timeout_ms: parse_or(&g("REPLY_TIMEOUT_MS"), d.reply_timeout_ms),
            print_speed: parse_or(&g("PRINT_SPEED"), d.print_speed),
            print_density: parse_or(&g("PRINT_DENSITY"), d.print_density),
            paper_type: parse_or(&g("PAPER_TYPE"), d.paper_type),
            cut_type: parse_or(&g("CUT_TYPE"), d.cut_type),
            label_gap: parse_or(&g("LABEL_GAP"), d.label_gap),
            log_level: {
                let level = g("LOG_LEVEL");
                if level.is_empty() { d.log_level } else { level }
            },
        }
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Job parameters for a request that does not override them.
    pub fn job_params(&self) -> JobParams {
        JobParams {
            paper_type: self.paper_type,
            gap: self.label_gap,
            speed: self.print_speed,
            density: self.print_density,
            cut_type: self.cut_type,
            ..JobParams::default()
        }
    }
}

fn parse_or<T: std::str::FromStr>(s: &str, default: T) -> T {
    if s.is_empty() {
        return default;
    }
    s.parse().unwrap_or(default)
}
