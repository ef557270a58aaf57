//! Threshold rules and alert lifecycle
//!
//! Every rule key is an independent two-state machine:
//!
//! ```text
//!           predicate true
//!  Idle ─────────────────────▶ Active ──┐ predicate true (no new alert)
//!   ▲                            │  ◀───┘
//!   └────── predicate false ─────┘
//! ```
//!
//! An alert is created only on the Idle → Active edge. Recovery returns the
//! rule to Idle but leaves its alert in the list until the user dismisses
//! it, so a condition that stays triggered never produces duplicates.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::export::fixed;
use crate::models::{Alert, RuleKey, SensorSample, Severity};
use crate::settings::{AlertSnapshot, ThresholdConfig};

/// Current state of one rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleState {
    Idle,
    Active,
}

impl RuleKey {
    /// Whether the sample violates this rule under `config`
    pub fn is_triggered(&self, sample: &SensorSample, config: &ThresholdConfig) -> bool {
        match self {
            RuleKey::LowMoisture => sample.soil_moisture < config.moisture_threshold,
            RuleKey::LowBattery => sample.battery_level < config.battery_threshold,
            RuleKey::LowWater => sample.water_level < config.water_level_threshold,
            RuleKey::PhOutOfRange => sample.ph_level < config.ph_low || sample.ph_level > config.ph_high,
            RuleKey::PoorAirQuality => sample.air_quality > config.aqi_threshold,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            RuleKey::LowMoisture => "Low Soil Moisture",
            RuleKey::LowBattery => "Low Battery",
            RuleKey::LowWater => "Low Water Level",
            RuleKey::PhOutOfRange => "pH Alert",
            RuleKey::PoorAirQuality => "Poor Air Quality",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            RuleKey::LowBattery => Severity::Error,
            _ => Severity::Warning,
        }
    }

    pub fn message(&self, sample: &SensorSample) -> String {
        match self {
            RuleKey::LowMoisture => format!("Soil moisture is {}%", fixed(sample.soil_moisture, 1)),
            RuleKey::LowBattery => format!("Battery level is {}%", fixed(sample.battery_level, 0)),
            RuleKey::LowWater => "Water reservoir needs refilling".to_string(),
            RuleKey::PhOutOfRange => format!("pH level is {}", fixed(sample.ph_level, 2)),
            RuleKey::PoorAirQuality => format!("AQI is {}", fixed(sample.air_quality, 0)),
        }
    }
}

/// Rule transitions produced by one evaluation
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Alerts created on an Idle → Active edge
    pub raised: Vec<Alert>,
    /// Rules that went Active → Idle
    pub cleared: Vec<RuleKey>,
}

impl Evaluation {
    pub fn is_empty(&self) -> bool {
        self.raised.is_empty() && self.cleared.is_empty()
    }
}

/// Stateful evaluator owning the alert list and unread counter
#[derive(Debug, Default)]
pub struct AlertEngine {
    active: BTreeSet<RuleKey>,
    /// Most recent first
    alerts: Vec<Alert>,
    unread: u32,
    next_id: u64,
}

impl AlertEngine {
    /// Rebuild from a durable snapshot
    pub fn restore(snapshot: AlertSnapshot) -> Self {
        let next_id = snapshot
            .alerts
            .iter()
            .map(|a| a.id + 1)
            .max()
            .unwrap_or(0)
            .max(snapshot.next_id);

        Self {
            active: snapshot.active_rules.into_iter().collect(),
            unread: snapshot.unread,
            alerts: snapshot.alerts,
            next_id,
        }
    }

    pub fn snapshot(&self) -> AlertSnapshot {
        AlertSnapshot {
            alerts: self.alerts.clone(),
            unread: self.unread,
            next_id: self.next_id,
            active_rules: self.active.iter().copied().collect(),
        }
    }

    /// Run every rule against the sample
    pub fn evaluate(&mut self, sample: &SensorSample, config: &ThresholdConfig, now: DateTime<Utc>) -> Evaluation {
        let mut evaluation = Evaluation::default();

        for rule in RuleKey::ALL {
            let triggered = rule.is_triggered(sample, config);

            match (self.rule_state(rule), triggered) {
                (RuleState::Idle, true) => {
                    self.active.insert(rule);
                    let alert = self.raise(rule, sample, now);
                    info!(
                        alert_id = alert.id,
                        rule = ?rule,
                        message = %alert.message,
                        "Alert raised"
                    );
                    evaluation.raised.push(alert);
                }
                (RuleState::Active, false) => {
                    self.active.remove(&rule);
                    debug!(rule = ?rule, "Rule recovered");
                    evaluation.cleared.push(rule);
                }
                (RuleState::Active, true) | (RuleState::Idle, false) => {}
            }
        }

        evaluation
    }

    fn raise(&mut self, rule: RuleKey, sample: &SensorSample, now: DateTime<Utc>) -> Alert {
        let alert = Alert {
            id: self.next_id,
            rule,
            title: rule.title().to_string(),
            message: rule.message(sample),
            severity: rule.severity(),
            created_at: now,
            acknowledged: false,
        };
        self.next_id += 1;
        self.alerts.insert(0, alert.clone());
        self.unread += 1;
        alert
    }

    /// Remove one alert. Unknown ids are a no-op.
    pub fn dismiss(&mut self, id: u64) -> bool {
        let Some(pos) = self.alerts.iter().position(|a| a.id == id) else {
            debug!(alert_id = id, "Dismiss of unknown alert ignored");
            return false;
        };

        let removed = self.alerts.remove(pos);
        if !removed.acknowledged {
            self.unread = self.unread.saturating_sub(1);
        }
        true
    }

    /// Mark an alert as read without removing it
    pub fn acknowledge(&mut self, id: u64) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) if !alert.acknowledged => {
                alert.acknowledged = true;
                self.unread = self.unread.saturating_sub(1);
                true
            }
            Some(_) => false,
            None => false,
        }
    }

    pub fn clear_all(&mut self) {
        self.alerts.clear();
        self.unread = 0;
    }

    pub fn rule_state(&self, rule: RuleKey) -> RuleState {
        if self.active.contains(&rule) {
            RuleState::Active
        } else {
            RuleState::Idle
        }
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn unread(&self) -> u32 {
        self.unread
    }
}
