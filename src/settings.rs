//! User settings store
//!
//! Holds the user-tunable alert thresholds and flags, persisted as a flat
//! camelCase JSON record. Missing keys fall back to defaults and
//! out-of-range values are clamped rather than rejected. The same store
//! keeps the durable alert snapshot next to the settings file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{Alert, RuleKey};

/// Clamp ranges for threshold values
pub struct ThresholdLimits;

impl ThresholdLimits {
    pub const PERCENT_MIN: f64 = 0.0;
    pub const PERCENT_MAX: f64 = 100.0;
    pub const PH_MIN: f64 = 0.0;
    pub const PH_MAX: f64 = 14.0;
    pub const AQI_MIN: f64 = 0.0;
    pub const AQI_MAX: f64 = 500.0;
    pub const POLL_INTERVAL_MIN_MS: u64 = 1_000;
    pub const POLL_INTERVAL_MAX_MS: u64 = 3_600_000;
}

/// User-configurable alert thresholds and behaviour flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThresholdConfig {
    pub moisture_threshold: f64,
    pub battery_threshold: f64,
    pub ph_low: f64,
    pub ph_high: f64,
    pub aqi_threshold: f64,
    pub water_level_threshold: f64,
    pub auto_mode: bool,
    pub sound_alerts: bool,
    pub push_notifications: bool,
    #[serde(alias = "refreshInterval")]
    pub poll_interval_ms: u64,
    /// Stop the pump automatically once soil moisture recovers
    pub auto_stop_on_recovery: bool,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            moisture_threshold: 30.0,
            battery_threshold: 20.0,
            ph_low: 5.5,
            ph_high: 8.5,
            aqi_threshold: 150.0,
            water_level_threshold: 15.0,
            auto_mode: true,
            sound_alerts: true,
            push_notifications: true,
            poll_interval_ms: 5_000,
            auto_stop_on_recovery: false,
        }
    }
}

impl ThresholdConfig {
    /// Bring every value into its allowed range. Returns the adjusted config
    /// and the names of the fields that were changed.
    pub fn clamped(mut self) -> (Self, Vec<&'static str>) {
        let mut adjusted = Vec::new();

        clamp_f64(
            &mut self.moisture_threshold,
            ThresholdLimits::PERCENT_MIN,
            ThresholdLimits::PERCENT_MAX,
            "moistureThreshold",
            &mut adjusted,
        );
        clamp_f64(
            &mut self.battery_threshold,
            ThresholdLimits::PERCENT_MIN,
            ThresholdLimits::PERCENT_MAX,
            "batteryThreshold",
            &mut adjusted,
        );
        clamp_f64(
            &mut self.water_level_threshold,
            ThresholdLimits::PERCENT_MIN,
            ThresholdLimits::PERCENT_MAX,
            "waterLevelThreshold",
            &mut adjusted,
        );
        clamp_f64(
            &mut self.ph_low,
            ThresholdLimits::PH_MIN,
            ThresholdLimits::PH_MAX,
            "phLow",
            &mut adjusted,
        );
        clamp_f64(
            &mut self.ph_high,
            ThresholdLimits::PH_MIN,
            ThresholdLimits::PH_MAX,
            "phHigh",
            &mut adjusted,
        );
        if self.ph_low > self.ph_high {
            self.ph_low = self.ph_high;
            adjusted.push("phLow");
        }
        clamp_f64(
            &mut self.aqi_threshold,
            ThresholdLimits::AQI_MIN,
            ThresholdLimits::AQI_MAX,
            "aqiThreshold",
            &mut adjusted,
        );

        let interval = self.poll_interval_ms.clamp(
            ThresholdLimits::POLL_INTERVAL_MIN_MS,
            ThresholdLimits::POLL_INTERVAL_MAX_MS,
        );
        if interval != self.poll_interval_ms {
            self.poll_interval_ms = interval;
            adjusted.push("pollIntervalMs");
        }

        (self, adjusted)
    }

    /// Overlay the fields present in `update`
    pub fn merged(&self, update: &ThresholdUpdate) -> Self {
        let mut next = self.clone();
        if let Some(v) = update.moisture_threshold {
            next.moisture_threshold = v;
        }
        if let Some(v) = update.battery_threshold {
            next.battery_threshold = v;
        }
        if let Some(v) = update.ph_low {
            next.ph_low = v;
        }
        if let Some(v) = update.ph_high {
            next.ph_high = v;
        }
        if let Some(v) = update.aqi_threshold {
            next.aqi_threshold = v;
        }
        if let Some(v) = update.water_level_threshold {
            next.water_level_threshold = v;
        }
        if let Some(v) = update.auto_mode {
            next.auto_mode = v;
        }
        if let Some(v) = update.sound_alerts {
            next.sound_alerts = v;
        }
        if let Some(v) = update.push_notifications {
            next.push_notifications = v;
        }
        if let Some(v) = update.poll_interval_ms {
            next.poll_interval_ms = v;
        }
        if let Some(v) = update.auto_stop_on_recovery {
            next.auto_stop_on_recovery = v;
        }
        next
    }
}

fn clamp_f64(value: &mut f64, min: f64, max: f64, name: &'static str, adjusted: &mut Vec<&'static str>) {
    // NaN is not orderable; fall back to the lower bound
    let clamped = if value.is_nan() { min } else { value.clamp(min, max) };
    if clamped != *value || value.is_nan() {
        *value = clamped;
        adjusted.push(name);
    }
}

/// Partial settings edit; absent fields keep their current value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdUpdate {
    pub moisture_threshold: Option<f64>,
    pub battery_threshold: Option<f64>,
    pub ph_low: Option<f64>,
    pub ph_high: Option<f64>,
    pub aqi_threshold: Option<f64>,
    pub water_level_threshold: Option<f64>,
    pub auto_mode: Option<bool>,
    pub sound_alerts: Option<bool>,
    pub push_notifications: Option<bool>,
    #[serde(alias = "refreshInterval")]
    pub poll_interval_ms: Option<u64>,
    pub auto_stop_on_recovery: Option<bool>,
}

/// Durable copy of the alert list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertSnapshot {
    pub alerts: Vec<Alert>,
    pub unread: u32,
    pub next_id: u64,
    /// Rules that were triggered when the snapshot was taken
    pub active_rules: Vec<RuleKey>,
}

/// Settings and alert snapshot persistence
#[derive(Debug)]
pub struct SettingsStore {
    settings_path: Option<PathBuf>,
    alerts_path: Option<PathBuf>,
    current: ThresholdConfig,
}

impl SettingsStore {
    /// Store backed by files on disk
    pub fn new(settings_path: impl Into<PathBuf>, alerts_path: impl Into<PathBuf>) -> Self {
        Self {
            settings_path: Some(settings_path.into()),
            alerts_path: Some(alerts_path.into()),
            current: ThresholdConfig::default(),
        }
    }

    /// Store that never touches the filesystem
    pub fn in_memory(config: ThresholdConfig) -> Self {
        Self {
            settings_path: None,
            alerts_path: None,
            current: config.clamped().0,
        }
    }

    /// Read the persisted settings merged over defaults. A missing or
    /// unreadable file yields the defaults.
    pub fn load(&mut self) -> ThresholdConfig {
        let Some(path) = self.settings_path.as_deref() else {
            return self.current.clone();
        };

        let loaded = match read_json::<ThresholdConfig>(path) {
            Ok(Some(config)) => {
                info!(path = %path.display(), "Loaded saved settings");
                config
            }
            Ok(None) => {
                info!(path = %path.display(), "No saved settings, using defaults");
                ThresholdConfig::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Saved settings unreadable, using defaults");
                ThresholdConfig::default()
            }
        };

        let (config, adjusted) = loaded.clamped();
        log_clamped(&adjusted);
        self.current = config;
        self.current.clone()
    }

    /// Merge, clamp and persist an update. The in-memory config only changes
    /// once the new file is in place.
    pub fn apply(&mut self, update: &ThresholdUpdate) -> AppResult<ThresholdConfig> {
        let (next, adjusted) = self.current.merged(update).clamped();
        log_clamped(&adjusted);

        if let Some(path) = self.settings_path.as_deref() {
            write_json_atomic(path, &next)?;
        }

        info!(
            moisture_threshold = next.moisture_threshold,
            battery_threshold = next.battery_threshold,
            auto_mode = next.auto_mode,
            poll_interval_ms = next.poll_interval_ms,
            "Settings applied"
        );

        self.current = next;
        Ok(self.current.clone())
    }

    pub fn current(&self) -> &ThresholdConfig {
        &self.current
    }

    pub fn load_alerts(&self) -> AlertSnapshot {
        let Some(path) = self.alerts_path.as_deref() else {
            return AlertSnapshot::default();
        };

        match read_json::<AlertSnapshot>(path) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => AlertSnapshot::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Alert snapshot unreadable, starting empty");
                AlertSnapshot::default()
            }
        }
    }

    pub fn save_alerts(&self, snapshot: &AlertSnapshot) -> AppResult<()> {
        match self.alerts_path.as_deref() {
            Some(path) => write_json_atomic(path, snapshot),
            None => Ok(()),
        }
    }
}

fn log_clamped(adjusted: &[&'static str]) {
    for field in adjusted {
        let e = AppError::InvalidConfigValue(field.to_string());
        debug!(error = %e, "Clamped out-of-range setting");
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> AppResult<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(AppError::Persistence(e.to_string())),
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| AppError::Persistence(e.to_string()))
}

/// Write to a sibling temp file and rename it over the target
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| AppError::Persistence(e.to_string()))?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    };

    write().map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        AppError::Persistence(format!("{}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    fn store_in(dir: &Path) -> SettingsStore {
        SettingsStore::new(dir.join("settings.json"), dir.join("alerts.json"))
    }

    #[test]
    fn test_load_defaults_on_first_run() {
        let dir = tempdir().unwrap();
        let mut store = store_in(dir.path());

        assert_eq!(store.load(), ThresholdConfig::default());
    }

    #[test]
    fn test_partial_file_merges_over_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("settings.json"),
            r#"{"moistureThreshold": 42, "soundAlerts": false}"#,
        )
        .unwrap();
        let mut store = store_in(dir.path());

        let config = store.load();

        assert_eq!(config.moisture_threshold, 42.0);
        assert!(!config.sound_alerts);
        assert_eq!(config.battery_threshold, 20.0);
        assert_eq!(config.poll_interval_ms, 5_000);
    }

    #[test]
    fn test_legacy_refresh_interval_key() {
        let config: ThresholdConfig = serde_json::from_str(r#"{"refreshInterval": 10000}"#).unwrap();
        assert_eq!(config.poll_interval_ms, 10_000);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("settings.json"), "not json").unwrap();
        let mut store = store_in(dir.path());

        assert_eq!(store.load(), ThresholdConfig::default());
    }

    #[test]
    fn test_apply_clamps_instead_of_rejecting() {
        let mut store = SettingsStore::in_memory(ThresholdConfig::default());
        let update = ThresholdUpdate {
            moisture_threshold: Some(140.0),
            battery_threshold: Some(-5.0),
            poll_interval_ms: Some(10),
            ..Default::default()
        };

        let config = assert_ok!(store.apply(&update));

        assert_eq!(config.moisture_threshold, 100.0);
        assert_eq!(config.battery_threshold, 0.0);
        assert_eq!(config.poll_interval_ms, ThresholdLimits::POLL_INTERVAL_MIN_MS);
    }

    #[test]
    fn test_ph_bounds_stay_ordered() {
        let (config, adjusted) = ThresholdConfig {
            ph_low: 9.0,
            ph_high: 7.0,
            ..Default::default()
        }
        .clamped();

        assert_eq!(config.ph_low, 7.0);
        assert!(adjusted.contains(&"phLow"));
    }

    #[test]
    fn test_apply_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let mut store = store_in(dir.path());
        store.load();

        let update = ThresholdUpdate {
            moisture_threshold: Some(35.0),
            auto_mode: Some(false),
            ..Default::default()
        };
        assert_ok!(store.apply(&update));
        assert!(!dir.path().join("settings.json.tmp").exists());

        let mut reopened = store_in(dir.path());
        let config = reopened.load();
        assert_eq!(config.moisture_threshold, 35.0);
        assert!(!config.auto_mode);
    }

    #[test]
    fn test_failed_persist_leaves_config_unchanged() {
        let dir = tempdir().unwrap();
        let mut store = SettingsStore::new(
            dir.path().join("missing-dir").join("settings.json"),
            dir.path().join("alerts.json"),
        );

        let update = ThresholdUpdate {
            moisture_threshold: Some(50.0),
            ..Default::default()
        };

        assert_err!(store.apply(&update));
        assert_eq!(store.current().moisture_threshold, 30.0);
    }

    #[test]
    fn test_alert_snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        assert_eq!(store.load_alerts(), AlertSnapshot::default());

        let snapshot = AlertSnapshot {
            alerts: Vec::new(),
            unread: 3,
            next_id: 7,
            active_rules: vec![RuleKey::LowWater],
        };
        assert_ok!(store.save_alerts(&snapshot));

        assert_eq!(store.load_alerts(), snapshot);
    }
}
