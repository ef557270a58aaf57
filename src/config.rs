//! Configuration management module
//!
//! Loads process configuration from environment variables (a `.env` file
//! is honoured via dotenv in `main`). User-tunable thresholds live in the
//! settings store instead; this is only what the operator sets at launch.

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::history::DEFAULT_CAPACITY;
use crate::notifications::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_DISPLAY_MS};

/// Longest a notification may stay on screen (one day)
pub const MAX_NOTIFICATION_DURATION_MS: u64 = 86_400_000;

/// Configuration errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid value for environment variable {0}")]
    ParseError(&'static str),
}

/// Server configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Engine configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Samples kept in the history ring buffer
    pub history_capacity: usize,
    /// Where user thresholds are persisted
    pub settings_path: PathBuf,
    /// Where the alert snapshot is persisted
    pub alerts_path: PathBuf,
    /// Visible lifetime of a notification
    pub notification_duration_ms: u64,
    /// Per-subscriber event buffer
    pub event_channel_capacity: usize,
    /// Probability that a simulated poll fails
    pub source_failure_rate: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_CAPACITY,
            settings_path: PathBuf::from("climaneer-settings.json"),
            alerts_path: PathBuf::from("climaneer-alerts.json"),
            notification_duration_ms: DEFAULT_DISPLAY_MS,
            event_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            source_failure_rate: 0.0,
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub engine: EngineSettings,
}

impl Settings {
    /// Load settings from environment variables
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = EngineSettings::default();

        let engine = EngineSettings {
            history_capacity: parse_or(&lookup, "HISTORY_CAPACITY", defaults.history_capacity)?,
            settings_path: lookup("SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.settings_path),
            alerts_path: lookup("ALERTS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.alerts_path),
            notification_duration_ms: parse_or(
                &lookup,
                "NOTIFICATION_DURATION_MS",
                defaults.notification_duration_ms,
            )?,
            event_channel_capacity: parse_or(
                &lookup,
                "EVENT_CHANNEL_CAPACITY",
                defaults.event_channel_capacity,
            )?,
            source_failure_rate: parse_or(&lookup, "SOURCE_FAILURE_RATE", defaults.source_failure_rate)?,
        };

        if engine.history_capacity == 0 {
            return Err(SettingsError::ParseError("HISTORY_CAPACITY"));
        }
        if engine.notification_duration_ms == 0
            || engine.notification_duration_ms > MAX_NOTIFICATION_DURATION_MS
        {
            return Err(SettingsError::ParseError("NOTIFICATION_DURATION_MS"));
        }
        if !(0.0..=1.0).contains(&engine.source_failure_rate) {
            return Err(SettingsError::ParseError("SOURCE_FAILURE_RATE"));
        }

        Ok(Self {
            server: ServerSettings {
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
                port: parse_or(&lookup, "SERVER_PORT", 8080)?,
            },
            engine,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, SettingsError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| SettingsError::ParseError(key)),
        None => Ok(default),
    }
}
