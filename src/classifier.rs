//! Display status classification
//!
//! Maps a sample onto fixed three-level status bands and per-channel trend
//! hints. The bands are constants of the dashboard and are independent of
//! the user's alert thresholds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{Channel, SensorSample};

/// Three-level display status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Good,
    Normal,
    Warning,
}

/// Direction of change against the previous sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

/// Status with the label the dashboard shows for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub status: Status,
    pub label: String,
}

/// Output of [`classify`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedSample {
    pub water_level: ChannelStatus,
    pub ph_level: ChannelStatus,
    pub air_quality: ChannelStatus,
    pub flow_rate: ChannelStatus,
    pub trends: BTreeMap<Channel, Trend>,
    /// Hours of operation left at the current battery level
    pub battery_hours_remaining: f64,
}

/// Band edges for the display statuses
pub struct StatusBands;

impl StatusBands {
    pub const WATER_GOOD_ABOVE: f64 = 70.0;
    pub const WATER_NORMAL_ABOVE: f64 = 30.0;

    pub const PH_OPTIMAL_MIN: f64 = 6.0;
    pub const PH_OPTIMAL_MAX: f64 = 7.5;
    pub const PH_ACCEPTABLE_MIN: f64 = 5.5;
    pub const PH_ACCEPTABLE_MAX: f64 = 8.0;

    pub const AQI_GOOD_MAX: f64 = 50.0;
    pub const AQI_MODERATE_MAX: f64 = 100.0;

    pub const FLOW_NORMAL_ABOVE: f64 = 2.0;
    pub const FLOW_LOW_ABOVE: f64 = 0.5;

    /// Battery runtime at 100%
    pub const BATTERY_FULL_HOURS: f64 = 24.0;
}

fn status(status: Status, label: &str) -> ChannelStatus {
    ChannelStatus {
        status,
        label: label.to_string(),
    }
}

pub fn water_level_status(level: f64) -> ChannelStatus {
    if level > StatusBands::WATER_GOOD_ABOVE {
        status(Status::Good, "High")
    } else if level > StatusBands::WATER_NORMAL_ABOVE {
        status(Status::Normal, "Normal")
    } else {
        status(Status::Warning, "Low")
    }
}

pub fn ph_status(ph: f64) -> ChannelStatus {
    if (StatusBands::PH_OPTIMAL_MIN..=StatusBands::PH_OPTIMAL_MAX).contains(&ph) {
        status(Status::Good, "Optimal")
    } else if (StatusBands::PH_ACCEPTABLE_MIN..=StatusBands::PH_ACCEPTABLE_MAX).contains(&ph) {
        status(Status::Normal, "Acceptable")
    } else {
        status(Status::Warning, "Needs Attention")
    }
}

pub fn air_quality_status(aqi: f64) -> ChannelStatus {
    if aqi <= StatusBands::AQI_GOOD_MAX {
        status(Status::Good, "Good")
    } else if aqi <= StatusBands::AQI_MODERATE_MAX {
        status(Status::Normal, "Moderate")
    } else {
        status(Status::Warning, "Poor")
    }
}

pub fn flow_status(flow: f64) -> ChannelStatus {
    if flow > StatusBands::FLOW_NORMAL_ABOVE {
        status(Status::Good, "Normal Flow")
    } else if flow > StatusBands::FLOW_LOW_ABOVE {
        status(Status::Normal, "Low Flow")
    } else {
        status(Status::Warning, "No Flow")
    }
}

pub fn trend(current: f64, previous: Option<f64>) -> Trend {
    match previous {
        Some(prev) if current > prev => Trend::Up,
        Some(prev) if current < prev => Trend::Down,
        _ => Trend::Stable,
    }
}

/// Classify a sample against the fixed bands, with trends relative to `previous`
pub fn classify(sample: &SensorSample, previous: Option<&SensorSample>) -> ClassifiedSample {
    let trends = Channel::ALL
        .iter()
        .map(|&channel| {
            (
                channel,
                trend(sample.value(channel), previous.map(|p| p.value(channel))),
            )
        })
        .collect();

    ClassifiedSample {
        water_level: water_level_status(sample.water_level),
        ph_level: ph_status(sample.ph_level),
        air_quality: air_quality_status(sample.air_quality),
        flow_rate: flow_status(sample.flow_rate),
        trends,
        battery_hours_remaining: (sample.battery_level / 100.0) * StatusBands::BATTERY_FULL_HOURS,
    }
}
