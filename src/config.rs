//! Gateway configuration from the environment

use crate::screen::ScreenId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MENU_PATH: &str = "menu.json";
const DEFAULT_SESSION_IDLE_SECS: u64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Settings read once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub menu_path: PathBuf,
    /// Overrides the root designated by the menu document
    pub root_id: Option<ScreenId>,
    /// How long an idle session runtime stays resident
    pub session_idle: Duration,
    /// Input that jumps back to the root from any screen
    pub home_token: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_path = lookup("USSD_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".ussd-engine").join("ussd.db")
            },
            PathBuf::from,
        );

        let port = parse_var(&lookup, "USSD_PORT", "a port number")?.unwrap_or(DEFAULT_PORT);
        let menu_path = lookup("USSD_MENU_PATH")
            .map_or_else(|| PathBuf::from(DEFAULT_MENU_PATH), PathBuf::from);
        let root_id = parse_var(&lookup, "USSD_ROOT_ID", "a screen id")?.map(ScreenId);
        let idle_secs = parse_var(&lookup, "USSD_SESSION_IDLE_SECS", "a number of seconds")?
            .unwrap_or(DEFAULT_SESSION_IDLE_SECS);
        let home_token = lookup("USSD_HOME_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self {
            db_path,
            port,
            menu_path,
            root_id,
            session_idle: Duration::from_secs(idle_secs),
            home_token,
        })
    }
}

/// Unset or blank means default
fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid {
            name,
            expected,
            value,
        })
}
