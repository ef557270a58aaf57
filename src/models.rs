//! Data models for sensor samples, alerts, actuator state and engine events
//!
//! Defines the core data structures shared by the engine, the HTTP surface
//! and the WebSocket stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::classifier::ClassifiedSample;
use crate::settings::ThresholdConfig;

/// One reading of every rig channel, produced by a reading source per poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Unique identifier for this sample
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Monotonic sequence number, assigned at ingestion when the source leaves it at 0
    #[serde(default)]
    pub sequence: u64,

    /// Wall-clock time the sample was taken
    pub timestamp: DateTime<Utc>,

    /// Soil moisture (percentage)
    pub soil_moisture: f64,

    /// Air humidity (percentage)
    pub air_humidity: f64,

    /// Air temperature (Celsius)
    pub air_temp: f64,

    /// Reservoir water temperature (Celsius)
    pub water_temp: f64,

    /// Nutrient solution pH, 0-14
    pub ph_level: f64,

    /// Reservoir fill level (percentage)
    pub water_level: f64,

    /// Air quality index
    pub air_quality: f64,

    /// Irrigation flow (litres per minute)
    pub flow_rate: f64,

    /// Controller battery (percentage)
    pub battery_level: f64,

    /// Pump state as reported by the rig
    pub pump_on: bool,
}

impl SensorSample {
    /// A sample with every channel inside its healthy band, stamped now
    #[cfg(test)]
    pub fn nominal() -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            timestamp: Utc::now(),
            soil_moisture: 45.0,
            air_humidity: 60.0,
            air_temp: 22.0,
            water_temp: 20.0,
            ph_level: 6.8,
            water_level: 75.0,
            air_quality: 40.0,
            flow_rate: 0.0,
            battery_level: 85.0,
            pump_on: false,
        }
    }

    /// Read a channel by name
    pub fn value(&self, channel: Channel) -> f64 {
        match channel {
            Channel::SoilMoisture => self.soil_moisture,
            Channel::AirHumidity => self.air_humidity,
            Channel::AirTemp => self.air_temp,
            Channel::WaterTemp => self.water_temp,
            Channel::PhLevel => self.ph_level,
            Channel::WaterLevel => self.water_level,
            Channel::AirQuality => self.air_quality,
            Channel::FlowRate => self.flow_rate,
            Channel::BatteryLevel => self.battery_level,
        }
    }
}

/// Named numeric channels carried by every sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    SoilMoisture,
    AirHumidity,
    AirTemp,
    WaterTemp,
    PhLevel,
    WaterLevel,
    AirQuality,
    FlowRate,
    BatteryLevel,
}

impl Channel {
    pub const ALL: [Channel; 9] = [
        Channel::SoilMoisture,
        Channel::AirHumidity,
        Channel::AirTemp,
        Channel::WaterTemp,
        Channel::PhLevel,
        Channel::WaterLevel,
        Channel::AirQuality,
        Channel::FlowRate,
        Channel::BatteryLevel,
    ];
}

/// A sample as stored in the history buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sample: SensorSample,
    /// When the engine accepted the sample
    pub ingested_at: DateTime<Utc>,
}

/// Alert and notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

/// One alert condition type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKey {
    LowMoisture,
    LowBattery,
    LowWater,
    PhOutOfRange,
    PoorAirQuality,
}

impl RuleKey {
    pub const ALL: [RuleKey; 5] = [
        RuleKey::LowMoisture,
        RuleKey::LowBattery,
        RuleKey::LowWater,
        RuleKey::PhOutOfRange,
        RuleKey::PoorAirQuality,
    ];
}

/// A raised alert, kept until the user dismisses it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub rule: RuleKey,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

/// Transient user-visible message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: u64,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    /// How long the notification stays visible unless closed
    pub duration_ms: u64,
}

/// Audible cue requested from the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundCue {
    AlertChime,
    PumpClick,
}

/// Who decides the pump state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorMode {
    Auto,
    Manual,
}

/// Pump intent owned by the actuator controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorState {
    pub mode: ActuatorMode,
    pub desired: bool,
    pub last_command_sent_at: Option<DateTime<Utc>>,
}

impl Default for ActuatorState {
    fn default() -> Self {
        Self {
            mode: ActuatorMode::Auto,
            desired: false,
            last_command_sent_at: None,
        }
    }
}

/// Daily counters shown next to the pump controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub pump_runtime_secs: u64,
    /// Runtime formatted as "1h 5m"
    pub pump_runtime_label: String,
    pub water_used_litres: f64,
    pub system_uptime_pct: f64,
    pub connected: bool,
    pub last_update: Option<DateTime<Utc>>,
}

/// State-change events published by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EngineEvent {
    /// A sample went through the full pipeline
    SampleIngested {
        sample: SensorSample,
        classification: ClassifiedSample,
    },
    /// A rule moved from idle to active
    AlertRaised(Alert),
    /// Alert list or unread counter changed
    AlertsChanged { unread: u32, total: usize },
    ActuatorChanged(ActuatorState),
    Notification(NotificationEvent),
    /// Notification closed by the user or its timeout
    NotificationDismissed { id: u64 },
    /// Confirmation popup for poor air quality
    AirQualityPopup {
        message: String,
        expires_at: DateTime<Utc>,
    },
    AirQualityPopupClosed,
    SoundCue(SoundCue),
    ConnectivityChanged { connected: bool },
    SettingsChanged(ThresholdConfig),
    RuntimeStats(RuntimeStats),
}

/// WebSocket message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    /// Engine event relayed to the client
    Event(EngineEvent),
    /// Connection acknowledgment
    Connected { client_id: String },
    /// Error message
    Error { message: String },
    /// Heartbeat/ping
    Ping,
    /// Heartbeat/pong response
    Pong,
}

/// Input DTO for pushed samples
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SampleInput {
    #[validate(range(min = 0.0, max = 100.0, message = "Soil moisture must be between 0 and 100%"))]
    pub soil_moisture: f64,

    #[validate(range(min = 0.0, max = 100.0, message = "Air humidity must be between 0 and 100%"))]
    pub air_humidity: f64,

    #[validate(range(min = -40.0, max = 80.0, message = "Air temperature must be between -40 and 80°C"))]
    pub air_temp: f64,

    #[validate(range(min = -10.0, max = 60.0, message = "Water temperature must be between -10 and 60°C"))]
    pub water_temp: f64,

    #[validate(range(min = 0.0, max = 14.0, message = "pH must be between 0 and 14"))]
    pub ph_level: f64,

    #[validate(range(min = 0.0, max = 100.0, message = "Water level must be between 0 and 100%"))]
    pub water_level: f64,

    #[validate(range(min = 0.0, max = 500.0, message = "AQI must be between 0 and 500"))]
    pub air_quality: f64,

    #[validate(range(min = 0.0, max = 100.0, message = "Flow rate must be between 0 and 100 L/min"))]
    pub flow_rate: f64,

    #[validate(range(min = 0.0, max = 100.0, message = "Battery level must be between 0 and 100%"))]
    pub battery_level: f64,

    #[serde(default)]
    pub pump_on: bool,

    /// Optional client-provided timestamp (defaults to server time)
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<SampleInput> for SensorSample {
    fn from(input: SampleInput) -> Self {
        SensorSample {
            id: Uuid::new_v4(),
            sequence: 0,
            timestamp: input.timestamp.unwrap_or_else(Utc::now),
            soil_moisture: input.soil_moisture,
            air_humidity: input.air_humidity,
            air_temp: input.air_temp,
            water_temp: input.water_temp,
            ph_level: input.ph_level,
            water_level: input.water_level,
            air_quality: input.air_quality,
            flow_rate: input.flow_rate,
            battery_level: input.battery_level,
            pump_on: input.pump_on,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub connected: bool,
    pub last_reading: Option<DateTime<Utc>>,
}
