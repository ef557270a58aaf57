//! Telemetry engine
//!
//! Owns every piece of mutable monitoring state: history, alert rules,
//! the pump controller, the notification stream and the settings store.
//! One engine is built per process and shared behind a lock; each call
//! below runs to completion while holding it, so a sample's full pipeline
//! (history push, classification, alert evaluation, pump policy) is never
//! interleaved with another sample or a user command.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::actuator::{format_runtime, ActuatorController, CommandOutcome, PumpDriver};
use crate::alerts::{AlertEngine, Evaluation};
use crate::classifier::{classify, ClassifiedSample};
use crate::config::EngineSettings;
use crate::error::{AppError, AppResult};
use crate::export::{export_history, HistoryExport};
use crate::history::HistoryBuffer;
use crate::models::{
    ActuatorState, Alert, EngineEvent, NotificationEvent, RuleKey, RuntimeStats, SensorSample,
    Severity, SoundCue,
};
use crate::notifications::{AirQualityPopup, NotificationDispatcher};
use crate::settings::{SettingsStore, ThresholdConfig, ThresholdUpdate};

const UPTIME_MIN_PCT: f64 = 95.0;
const UPTIME_MAX_PCT: f64 = 100.0;
const UPTIME_START_PCT: f64 = 99.9;

/// What one ingested sample changed
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub sequence: u64,
    pub classification: ClassifiedSample,
    pub raised: Vec<Alert>,
    pub cleared: Vec<RuleKey>,
    pub actuator: ActuatorState,
}

/// Point-in-time view for the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub latest: Option<SensorSample>,
    pub classification: Option<ClassifiedSample>,
    pub actuator: ActuatorState,
    pub alerts: Vec<Alert>,
    pub unread_alerts: u32,
    pub settings: ThresholdConfig,
    pub stats: RuntimeStats,
    pub notifications: Vec<NotificationEvent>,
    pub air_quality_popup: Option<AirQualityPopup>,
    pub history_len: usize,
    pub samples_ingested: u64,
    pub pump_commands_sent: u64,
}

pub struct Engine {
    history: HistoryBuffer,
    alerts: AlertEngine,
    actuator: ActuatorController,
    notifications: NotificationDispatcher,
    settings: SettingsStore,
    last_classification: Option<ClassifiedSample>,
    connected: bool,
    last_update: Option<DateTime<Utc>>,
    uptime_pct: f64,
    last_sequence: u64,
}

impl Engine {
    /// Build the engine, loading saved settings and the alert snapshot
    pub fn new(mut settings: SettingsStore, driver: Arc<dyn PumpDriver>, options: &EngineSettings) -> Self {
        let config = settings.load();
        let alerts = AlertEngine::restore(settings.load_alerts());

        info!(
            history_capacity = options.history_capacity,
            restored_alerts = alerts.alerts().len(),
            poll_interval_ms = config.poll_interval_ms,
            "Initializing telemetry engine"
        );

        Self {
            history: HistoryBuffer::new(options.history_capacity),
            alerts,
            actuator: ActuatorController::new(driver),
            notifications: NotificationDispatcher::new(
                options.event_channel_capacity,
                options.notification_duration_ms,
            ),
            settings,
            last_classification: None,
            connected: true,
            last_update: None,
            uptime_pct: UPTIME_START_PCT,
            last_sequence: 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.notifications.subscribe()
    }

    // ---------------------------------------------------------------------
    // Ingestion pipeline
    // ---------------------------------------------------------------------

    /// Run one sample through history, classification, alerting and pump policy
    pub fn ingest(&mut self, mut sample: SensorSample, now: DateTime<Utc>) -> IngestReport {
        if sample.sequence == 0 || sample.sequence <= self.last_sequence {
            sample.sequence = self.last_sequence + 1;
        }
        self.last_sequence = sample.sequence;

        self.set_connected(true);

        let classification = classify(&sample, self.history.latest());
        self.history.push(sample.clone());

        let config = self.settings.current().clone();
        let evaluation = self.alerts.evaluate(&sample, &config, now);
        self.publish_evaluation(&evaluation, &config, now);
        self.run_pump_policy(&config, now);

        self.last_update = Some(now);
        self.last_classification = Some(classification.clone());

        debug!(
            sequence = sample.sequence,
            raised = evaluation.raised.len(),
            cleared = evaluation.cleared.len(),
            "Sample ingested"
        );

        self.notifications.publish(EngineEvent::SampleIngested {
            sample: sample.clone(),
            classification: classification.clone(),
        });

        IngestReport {
            sequence: sample.sequence,
            classification,
            raised: evaluation.raised,
            cleared: evaluation.cleared,
            actuator: self.actuator.state().clone(),
        }
    }

    /// The reading source failed this tick: keep stale data, degrade connectivity
    pub fn record_source_failure(&mut self, error: &AppError, now: DateTime<Utc>) {
        warn!(error = %error, "Failed to fetch sensor data");
        self.set_connected(false);
        self.notifications
            .notify("Connection Error", "Failed to fetch sensor data", Severity::Error, now);
    }

    fn set_connected(&mut self, connected: bool) {
        if self.connected != connected {
            info!(connected, "Connectivity changed");
            self.connected = connected;
            self.notifications
                .publish(EngineEvent::ConnectivityChanged { connected });
        }
    }

    fn publish_evaluation(&mut self, evaluation: &Evaluation, config: &ThresholdConfig, now: DateTime<Utc>) {
        for alert in &evaluation.raised {
            self.notifications.publish(EngineEvent::AlertRaised(alert.clone()));

            if config.push_notifications {
                self.notifications
                    .notify(&alert.title, &alert.message, alert.severity, now);
            }
            if config.sound_alerts {
                self.notifications.sound(SoundCue::AlertChime);
            }
            if alert.rule == RuleKey::PoorAirQuality {
                self.notifications.show_air_quality_popup(&alert.message, now);
            }
        }

        if !evaluation.is_empty() {
            self.alerts_changed();
        }
    }

    fn run_pump_policy(&mut self, config: &ThresholdConfig, now: DateTime<Utc>) {
        let low_moisture = self.alerts.rule_state(RuleKey::LowMoisture);
        if let Some(outcome) = self.actuator.apply_policy(low_moisture, config, now) {
            // Failures are already surfaced as a notification
            let _ = self.finish_command(outcome, now);
        }
    }

    fn finish_command(&mut self, outcome: CommandOutcome, now: DateTime<Utc>) -> AppResult<ActuatorState> {
        self.notifications
            .publish(EngineEvent::ActuatorChanged(outcome.state.clone()));

        match outcome.delivery {
            Ok(()) => Ok(outcome.state),
            Err(e) => {
                self.notifications
                    .notify("Control Error", "Failed to send pump command", Severity::Error, now);
                Err(e)
            }
        }
    }

    fn alerts_changed(&mut self) {
        self.notifications.publish(EngineEvent::AlertsChanged {
            unread: self.alerts.unread(),
            total: self.alerts.alerts().len(),
        });

        if let Err(e) = self.settings.save_alerts(&self.alerts.snapshot()) {
            warn!(error = %e, "Failed to persist alert snapshot");
        }
    }

    // ---------------------------------------------------------------------
    // Commands from the presentation layer
    // ---------------------------------------------------------------------

    /// Manual pump override
    pub fn toggle_manual(&mut self, desired: bool, now: DateTime<Utc>) -> AppResult<ActuatorState> {
        let outcome = self.actuator.set_manual(desired, now);

        let action = if desired { "started" } else { "stopped" };
        self.notifications.notify(
            "Pump Control",
            &format!("Pump {} manually", action),
            Severity::Info,
            now,
        );
        if self.settings.current().sound_alerts {
            self.notifications.sound(SoundCue::PumpClick);
        }

        self.finish_command(outcome, now)
    }

    pub fn reset_to_auto(&mut self, now: DateTime<Utc>) -> AppResult<ActuatorState> {
        let outcome = self.actuator.reset_to_auto(now);
        self.notifications.notify(
            "Auto Mode",
            "Pump returned to automatic control",
            Severity::Success,
            now,
        );
        self.finish_command(outcome, now)
    }

    /// Apply a settings edit, then re-check the rules against the latest sample
    pub fn apply_settings(&mut self, update: &ThresholdUpdate, now: DateTime<Utc>) -> AppResult<ThresholdConfig> {
        let config = match self.settings.apply(update) {
            Ok(config) => config,
            Err(e) => {
                self.notifications
                    .notify("Settings Error", "Could not save settings", Severity::Error, now);
                return Err(e);
            }
        };

        self.notifications
            .publish(EngineEvent::SettingsChanged(config.clone()));
        self.notifications.notify(
            "Settings Saved",
            "Your preferences have been updated",
            Severity::Success,
            now,
        );

        if let Some(latest) = self.history.latest().cloned() {
            let evaluation = self.alerts.evaluate(&latest, &config, now);
            self.publish_evaluation(&evaluation, &config, now);
            self.run_pump_policy(&config, now);

            // Shown on every save while the battery is low, even with the rule already active
            if latest.battery_level < config.battery_threshold {
                self.notifications.notify(
                    "Critical Battery",
                    "System battery critically low",
                    Severity::Error,
                    now,
                );
            }
        }

        Ok(config)
    }

    /// Remove one alert; unknown ids are ignored
    pub fn dismiss_alert(&mut self, id: u64) -> bool {
        let removed = self.alerts.dismiss(id);
        if removed {
            self.alerts_changed();
        }
        removed
    }

    pub fn acknowledge_alert(&mut self, id: u64) -> bool {
        let acknowledged = self.alerts.acknowledge(id);
        if acknowledged {
            self.alerts_changed();
        }
        acknowledged
    }

    pub fn clear_all_alerts(&mut self, now: DateTime<Utc>) {
        self.alerts.clear_all();
        self.alerts_changed();
        self.notifications.notify(
            "Alerts Cleared",
            "All alerts have been dismissed",
            Severity::Success,
            now,
        );
    }

    pub fn export_history(&mut self, now: DateTime<Utc>) -> HistoryExport {
        let export = export_history(self.history.iter_recent(), now);
        info!(rows = export.rows, filename = %export.filename, "History exported");
        self.notifications.notify(
            "Export Complete",
            "Data has been downloaded",
            Severity::Success,
            now,
        );
        export
    }

    pub fn close_notification(&mut self, id: u64) -> bool {
        self.notifications.close(id)
    }

    pub fn acknowledge_air_quality_popup(&mut self) -> bool {
        self.notifications.acknowledge_popup()
    }

    // ---------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------

    /// 1 Hz: pump runtime accounting and notification expiry
    pub fn tick_runtime(&mut self, now: DateTime<Utc>) {
        let running = self.actuator.tick_runtime();
        self.notifications.prune(now);
        if running {
            self.notifications
                .publish(EngineEvent::RuntimeStats(self.runtime_stats()));
        }
    }

    /// Slow random walk of the displayed system uptime
    pub fn tick_uptime<R: Rng>(&mut self, rng: &mut R) {
        let step = (rng.gen::<f64>() - 0.5) * 0.1;
        self.uptime_pct = (self.uptime_pct + step).clamp(UPTIME_MIN_PCT, UPTIME_MAX_PCT);
        self.notifications
            .publish(EngineEvent::RuntimeStats(self.runtime_stats()));
    }

    // ---------------------------------------------------------------------
    // Read access
    // ---------------------------------------------------------------------

    pub fn runtime_stats(&self) -> RuntimeStats {
        RuntimeStats {
            pump_runtime_secs: self.actuator.runtime_secs(),
            pump_runtime_label: format_runtime(self.actuator.runtime_secs()),
            water_used_litres: self.actuator.water_used_litres(),
            system_uptime_pct: self.uptime_pct,
            connected: self.connected,
            last_update: self.last_update,
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            latest: self.history.latest().cloned(),
            classification: self.last_classification.clone(),
            actuator: self.actuator.state().clone(),
            alerts: self.alerts.alerts().to_vec(),
            unread_alerts: self.alerts.unread(),
            settings: self.settings.current().clone(),
            stats: self.runtime_stats(),
            notifications: self.notifications.visible().to_vec(),
            air_quality_popup: self.notifications.popup().cloned(),
            history_len: self.history.len(),
            samples_ingested: self.history.total_ingested(),
            pump_commands_sent: self.actuator.commands_sent(),
        }
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn settings(&self) -> &ThresholdConfig {
        self.settings.current()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.settings.current().poll_interval_ms)
    }
}
