//! Setting value validation.

use std::sync::LazyLock;

use labelprinter::Family;
use regex::Regex;

// Bare level or a comma-separated list of `target=level` directives.
static RE_LOG_FILTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_:\-]+(=(trace|debug|info|warn|error|off))?)(,[A-Za-z0-9_:\-]+(=(trace|debug|info|warn|error|off))?)*$")
        .unwrap()
});
static RE_HIDRAW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/[^\s]+$").unwrap());

/// Validate a setting value. Returns `Ok(())` if valid, or an error message.
pub fn validate_setting(key: &str, value: &str) -> Result<(), String> {
    match key {
        "PRINTER_FAMILY" => {
            value
                .parse::<Family>()
                .map_err(|_| "must be one of g, sp, tp, tp-b, t5080".to_string())?;
        }
        "HIDRAW_PATH" => {
            if !RE_HIDRAW.is_match(value) {
                return Err("must be an absolute device path".into());
            }
        }
        "SERVER_PORT" => validate_int_range(value, 1, 65535)?,
        "REPLY_TIMEOUT_MS" => validate_int_range(value, 100, 60_000)?,
        "PRINT_SPEED" => validate_int_range(value, 1, 255)?,
        "PRINT_DENSITY" => validate_int_range(value, 1, 15)?,
        "PAPER_TYPE" | "CUT_TYPE" | "LABEL_GAP" => validate_int_range(value, 0, 255)?,
        "LOG_LEVEL" => {
            if !RE_LOG_FILTER.is_match(value) {
                return Err("must be a level or a list of target=level directives".into());
            }
        }
        k if is_boolean_setting(k) => {
            if value != "true" && value != "false" {
                return Err("must be 'true' or 'false'".into());
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_int_range(value: &str, min: i64, max: i64) -> Result<(), String> {
    let v: i64 = value.parse().map_err(|_| "must be an integer")?;
    if v < min || v > max {
        return Err(format!("must be between {min} and {max}"));
    }
    Ok(())
}

fn is_boolean_setting(key: &str) -> bool {
    matches!(key, "DRY_RUN_MODE")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_boolean() {
        assert!(validate_setting("DRY_RUN_MODE", "true").is_ok());
        assert!(validate_setting("DRY_RUN_MODE", "false").is_ok());
        assert!(validate_setting("DRY_RUN_MODE", "yes").is_err());
    }

    #[test]
    fn test_printer_family() {
        for family in ["g", "sp", "tp", "tp-b", "T5080"] {
            assert!(validate_setting("PRINTER_FAMILY", family).is_ok(), "{family}");
        }
        assert!(validate_setting("PRINTER_FAMILY", "q").is_err());
    }

    #[test]
    fn test_int_ranges() {
        assert!(validate_setting("SERVER_PORT", "8080").is_ok());
        assert!(validate_setting("SERVER_PORT", "0").is_err());
        assert!(validate_setting("SERVER_PORT", "70000").is_err());
        assert!(validate_setting("PRINT_DENSITY", "16").is_err());
        assert!(validate_setting("REPLY_TIMEOUT_MS", "50").is_err());
        assert!(validate_setting("LABEL_GAP", "abc").is_err());
    }

    #[test]
    fn test_hidraw_path() {
        assert!(validate_setting("HIDRAW_PATH", "/dev/hidraw3").is_ok());
        assert!(validate_setting("HIDRAW_PATH", "hidraw0").is_err());
        assert!(validate_setting("HIDRAW_PATH", "").is_err());
    }

    #[test]
    fn test_log_level() {
        assert!(validate_setting("LOG_LEVEL", "debug").is_ok());
        assert!(validate_setting("LOG_LEVEL", "labeld=debug,labelprinter=trace").is_ok());
        assert!(validate_setting("LOG_LEVEL", "labeld=loud").is_err());
        assert!(validate_setting("LOG_LEVEL", "").is_err());
    }
}
