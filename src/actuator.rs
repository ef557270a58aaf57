//! Pump actuator controller
//!
//! Two modes: `Auto`, where the low-moisture rule decides the pump intent,
//! and `Manual`, entered by an explicit user command and left only through
//! `reset_to_auto`. Every transition sends exactly one command to the
//! [`PumpDriver`]. Delivery is not verified and a failed send never rolls
//! back the local state.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::alerts::RuleState;
use crate::error::AppResult;
use crate::models::{ActuatorMode, ActuatorState};
use crate::settings::ThresholdConfig;

/// Approximate water delivered per second of pump runtime (litres)
pub const LITRES_PER_PUMP_SECOND: f64 = 0.042;

/// Outbound channel to the physical pump
pub trait PumpDriver: Send + Sync {
    fn send_command(&self, desired: bool) -> AppResult<()>;
}

/// State after a transition plus the result of sending its command
#[derive(Debug)]
pub struct CommandOutcome {
    pub state: ActuatorState,
    pub delivery: AppResult<()>,
}

pub struct ActuatorController {
    state: ActuatorState,
    driver: Arc<dyn PumpDriver>,
    commands_sent: u64,
    runtime_secs: u64,
    water_used_litres: f64,
}

impl ActuatorController {
    pub fn new(driver: Arc<dyn PumpDriver>) -> Self {
        Self {
            state: ActuatorState::default(),
            driver,
            commands_sent: 0,
            runtime_secs: 0,
            water_used_litres: 0.0,
        }
    }

    pub fn state(&self) -> &ActuatorState {
        &self.state
    }

    pub fn commands_sent(&self) -> u64 {
        self.commands_sent
    }

    /// Force the pump on or off and suspend automatic control
    pub fn set_manual(&mut self, desired: bool, now: DateTime<Utc>) -> CommandOutcome {
        info!(desired, "Manual pump override");
        self.transition(ActuatorMode::Manual, desired, now)
    }

    /// Hand control back to the automatic policy. The current intent is
    /// re-asserted; the next policy evaluation decides whether it changes.
    pub fn reset_to_auto(&mut self, now: DateTime<Utc>) -> CommandOutcome {
        info!(desired = self.state.desired, "Pump returned to automatic control");
        self.transition(ActuatorMode::Auto, self.state.desired, now)
    }

    /// Automatic policy, run once per ingested sample. Returns `None` when
    /// the intent does not change.
    pub fn apply_policy(
        &mut self,
        low_moisture: RuleState,
        config: &ThresholdConfig,
        now: DateTime<Utc>,
    ) -> Option<CommandOutcome> {
        if self.state.mode == ActuatorMode::Manual || !config.auto_mode {
            return None;
        }

        let desired = match low_moisture {
            RuleState::Active => true,
            RuleState::Idle if config.auto_stop_on_recovery => false,
            RuleState::Idle => self.state.desired,
        };

        if desired == self.state.desired {
            return None;
        }

        info!(desired, "Automatic pump policy changed intent");
        Some(self.transition(ActuatorMode::Auto, desired, now))
    }

    fn transition(&mut self, mode: ActuatorMode, desired: bool, now: DateTime<Utc>) -> CommandOutcome {
        self.state.mode = mode;
        self.state.desired = desired;
        self.state.last_command_sent_at = Some(now);
        self.commands_sent += 1;

        let delivery = self.driver.send_command(desired);
        if let Err(e) = &delivery {
            warn!(desired, error = %e, "Pump command failed");
        }

        CommandOutcome {
            state: self.state.clone(),
            delivery,
        }
    }

    /// One second of runtime accounting. Returns whether the pump was running.
    pub fn tick_runtime(&mut self) -> bool {
        if self.state.desired {
            self.runtime_secs += 1;
            self.water_used_litres += LITRES_PER_PUMP_SECOND;
        }
        self.state.desired
    }

    pub fn runtime_secs(&self) -> u64 {
        self.runtime_secs
    }

    pub fn water_used_litres(&self) -> f64 {
        self.water_used_litres
    }
}

/// "1h 5m" style runtime label
pub fn format_runtime(seconds: u64) -> String {
    format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
}

#[cfg(test)]
pub mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::PumpDriver;
    use crate::error::{AppError, AppResult};

    /// Driver that records every command and can be told to fail
    #[derive(Default)]
    pub struct RecordingPumpDriver {
        pub commands: Mutex<Vec<bool>>,
        pub fail: AtomicBool,
    }

    impl RecordingPumpDriver {
        pub fn sent(&self) -> Vec<bool> {
            self.commands.lock().unwrap().clone()
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    impl PumpDriver for RecordingPumpDriver {
        fn send_command(&self, desired: bool) -> AppResult<()> {
            self.commands.lock().unwrap().push(desired);
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::ActuatorCommandFailed("relay offline".into()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingPumpDriver;
    use super::*;

    fn controller() -> (ActuatorController, Arc<RecordingPumpDriver>) {
        let driver = Arc::new(RecordingPumpDriver::default());
        (ActuatorController::new(driver.clone()), driver)
    }

    #[test]
    fn test_initial_state_is_auto_off() {
        let (controller, driver) = controller();

        assert_eq!(controller.state().mode, ActuatorMode::Auto);
        assert!(!controller.state().desired);
        assert!(driver.sent().is_empty());
    }

    #[test]
    fn test_manual_sends_exactly_one_command() {
        let (mut controller, driver) = controller();

        let outcome = controller.set_manual(true, Utc::now());

        assert!(outcome.delivery.is_ok());
        assert_eq!(outcome.state.mode, ActuatorMode::Manual);
        assert!(outcome.state.desired);
        assert_eq!(driver.sent(), vec![true]);
    }

    #[test]
    fn test_manual_suspends_policy() {
        let (mut controller, driver) = controller();
        let config = ThresholdConfig::default();
        controller.set_manual(false, Utc::now());

        for _ in 0..3 {
            assert!(controller
                .apply_policy(RuleState::Active, &config, Utc::now())
                .is_none());
        }

        assert!(!controller.state().desired);
        assert_eq!(driver.sent(), vec![false]);
    }

    #[test]
    fn test_auto_starts_pump_on_low_moisture() {
        let (mut controller, driver) = controller();
        let config = ThresholdConfig::default();

        let outcome = controller.apply_policy(RuleState::Active, &config, Utc::now());
        assert!(outcome.unwrap().state.desired);

        // Still low: intent unchanged, no extra command
        assert!(controller
            .apply_policy(RuleState::Active, &config, Utc::now())
            .is_none());
        assert_eq!(driver.sent(), vec![true]);
    }

    #[test]
    fn test_recovery_keeps_pump_on_by_default() {
        let (mut controller, _driver) = controller();
        let config = ThresholdConfig::default();
        controller.apply_policy(RuleState::Active, &config, Utc::now());

        assert!(controller
            .apply_policy(RuleState::Idle, &config, Utc::now())
            .is_none());
        assert!(controller.state().desired);
    }

    #[test]
    fn test_recovery_stops_pump_when_enabled() {
        let (mut controller, driver) = controller();
        let config = ThresholdConfig {
            auto_stop_on_recovery: true,
            ..Default::default()
        };
        controller.apply_policy(RuleState::Active, &config, Utc::now());

        let outcome = controller.apply_policy(RuleState::Idle, &config, Utc::now());

        assert!(!outcome.unwrap().state.desired);
        assert_eq!(driver.sent(), vec![true, false]);
    }

    #[test]
    fn test_auto_mode_disabled_ignores_policy() {
        let (mut controller, driver) = controller();
        let config = ThresholdConfig {
            auto_mode: false,
            ..Default::default()
        };

        assert!(controller
            .apply_policy(RuleState::Active, &config, Utc::now())
            .is_none());
        assert!(driver.sent().is_empty());
    }

    #[test]
    fn test_reset_to_auto_does_not_recompute() {
        let (mut controller, driver) = controller();
        controller.set_manual(true, Utc::now());

        let outcome = controller.reset_to_auto(Utc::now());

        assert_eq!(outcome.state.mode, ActuatorMode::Auto);
        assert!(outcome.state.desired);
        assert_eq!(driver.sent(), vec![true, true]);

        // Next policy evaluation governs again
        let config = ThresholdConfig {
            auto_stop_on_recovery: true,
            ..Default::default()
        };
        let next = controller.apply_policy(RuleState::Idle, &config, Utc::now());
        assert!(!next.unwrap().state.desired);
    }

    #[test]
    fn test_failed_command_keeps_state() {
        let (mut controller, driver) = controller();
        driver.set_failing(true);

        let outcome = controller.set_manual(true, Utc::now());

        assert!(outcome.delivery.is_err());
        assert!(controller.state().desired);
        assert_eq!(controller.state().mode, ActuatorMode::Manual);
        assert!(controller.state().last_command_sent_at.is_some());
    }

    #[test]
    fn test_runtime_accounting() {
        let (mut controller, _driver) = controller();

        assert!(!controller.tick_runtime());
        controller.set_manual(true, Utc::now());
        for _ in 0..10 {
            controller.tick_runtime();
        }

        assert_eq!(controller.runtime_secs(), 10);
        assert!((controller.water_used_litres() - 0.42).abs() < 1e-9);
    }

    #[test]
    fn test_format_runtime() {
        assert_eq!(format_runtime(0), "0h 0m");
        assert_eq!(format_runtime(3_900), "1h 5m");
    }
}
