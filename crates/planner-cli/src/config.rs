use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Deserialize, Debug)]
pub struct Config {
    /// Path to the SQLite database file.
    #[serde(default = "default_database")]
    pub database: String,
    /// User's default timezone (IANA format).
    #[serde(default = "detect_system_timezone")]
    pub timezone: String,
    /// Default schedule window length in days.
    #[serde(default = "default_window_days")]
    pub window_days: i64,
}

fn default_database() -> String {
    "planner.db".to_string()
}

fn default_window_days() -> i64 {
    7
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database(),
            timezone: detect_system_timezone(),
            window_days: default_window_days(),
        }
    }
}

impl Config {
    pub fn new() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("planner.toml"))
            .merge(Env::prefixed("PLANNER_"))
            .extract()
    }
}

/// Validates that a timezone string is a valid IANA timezone name
pub fn validate_timezone(timezone: &str) -> Result<Tz, String> {
    Tz::from_str(timezone).map_err(|_| {
        format!(
            "Invalid timezone: '{}'. Use IANA timezone names like 'America/New_York'",
            timezone
        )
    })
}

/// Detects the system timezone, falling back to UTC if detection fails
pub fn detect_system_timezone() -> String {
    if let Ok(tz) = std::env::var("TZ") {
        if validate_timezone(&tz).is_ok() {
            return tz;
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(tz) = std::fs::read_to_string("/etc/timezone") {
            let tz = tz.trim();
            if validate_timezone(tz).is_ok() {
                return tz.to_string();
            }
        }
    }

    "UTC".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database, "planner.db");
        assert_eq!(config.window_days, 7);
        assert!(validate_timezone(&config.timezone).is_ok());
    }

    #[test]
    fn test_validate_timezone() {
        assert!(validate_timezone("Europe/Berlin").is_ok());
        assert!(validate_timezone("Nowhere/AtAll").is_err());
    }
}
