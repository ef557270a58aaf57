//! Reading sources and the simulated rig
//!
//! ══════════════════════════════════════════════════════════════════════════════
//! PLUGGABLE SOURCE OF SENSOR DATA
//! ══════════════════════════════════════════════════════════════════════════════
//!
//! The engine only sees the [`ReadingSource`] trait. The default
//! implementation, [`SimulatedRig`], generates realistic readings for the
//! soil/water/air sensors and mirrors the pump intent it receives through
//! [`SimulatedPump`], so flow rate and `pump_on` follow the commands sent.
//! A real rig replaces both halves without touching the rest of the system.
//!
//! The generated data follows daily patterns:
//! - Temperature and humidity on a 24h cycle (inversely correlated)
//! - Slow soil moisture, pH, water level and AQI oscillations
//! - Flow only while the pump runs
//! - Battery draining over a weekly cycle

use chrono::Utc;
use futures::future::{self, BoxFuture, FutureExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::actuator::PumpDriver;
use crate::error::{AppError, AppResult};
use crate::models::SensorSample;

const DAY_MS: f64 = 24.0 * 60.0 * 60.0 * 1000.0;
const WEEK_MS: f64 = 7.0 * DAY_MS;

/// Produces one sample per poll. May suspend; may fail.
pub trait ReadingSource: Send {
    fn produce_sample(&mut self) -> BoxFuture<'_, AppResult<SensorSample>>;
}

/// Pump half of the simulated rig
pub struct SimulatedPump {
    running: Arc<AtomicBool>,
}

impl PumpDriver for SimulatedPump {
    fn send_command(&self, desired: bool) -> AppResult<()> {
        self.running.store(desired, Ordering::SeqCst);
        info!(action = if desired { "start" } else { "stop" }, "Pump command sent");
        Ok(())
    }
}

/// Simulated sensor rig
pub struct SimulatedRig {
    pump_running: Arc<AtomicBool>,
    rng: StdRng,
    /// Probability that a poll fails with a transport error
    failure_rate: f64,
    tick_count: u64,
}

impl SimulatedRig {
    pub fn new(failure_rate: f64) -> Self {
        info!(failure_rate, "Initializing simulated rig");
        Self::with_rng(StdRng::from_entropy(), failure_rate)
    }

    pub fn with_rng(rng: StdRng, failure_rate: f64) -> Self {
        Self {
            pump_running: Arc::new(AtomicBool::new(false)),
            rng,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            tick_count: 0,
        }
    }

    /// Driver that switches this rig's pump
    pub fn pump_driver(&self) -> Arc<SimulatedPump> {
        Arc::new(SimulatedPump {
            running: self.pump_running.clone(),
        })
    }

    fn noise(&mut self, std_dev: f64) -> f64 {
        Normal::new(0.0, std_dev)
            .map(|n| n.sample(&mut self.rng))
            .unwrap_or(0.0)
    }

    fn generate(&mut self) -> AppResult<SensorSample> {
        self.tick_count += 1;

        if self.failure_rate > 0.0 && self.rng.gen::<f64>() < self.failure_rate {
            return Err(AppError::SourceUnavailable(
                "simulated transport failure".to_string(),
            ));
        }

        let now = Utc::now();
        let ms = now.timestamp_millis() as f64;
        let time_of_day = (ms % DAY_MS) / DAY_MS;

        // Daily cycle, humidity runs opposite to temperature
        let temp_variation = (time_of_day * TAU).sin() * 8.0;
        let humidity_variation = (time_of_day * TAU).cos() * 15.0;
        let pump_on = self.pump_running.load(Ordering::SeqCst);

        let soil_moisture = (45.0 + (ms / 300_000.0).sin() * 20.0 + self.noise(2.5)).clamp(0.0, 100.0);
        let air_humidity = (60.0 + humidity_variation + self.noise(3.0)).clamp(0.0, 100.0);
        let air_temp = 22.0 + temp_variation + self.noise(1.2);
        let water_temp = 20.0 + temp_variation * 0.5 + self.noise(0.6);
        let ph_level = (6.8 + (ms / 400_000.0).sin() * 1.2 + self.noise(0.2)).clamp(0.0, 14.0);
        let water_level = (70.0 + (ms / 200_000.0).cos() * 25.0 + self.noise(2.5)).clamp(0.0, 100.0);
        let air_quality = (85.0 + (ms / 250_000.0).sin() * 30.0 + self.noise(6.0)).clamp(0.0, 500.0);
        let flow_rate = if pump_on {
            (2.5 + (ms / 50_000.0).sin() * 1.5 + self.noise(0.25)).max(0.0)
        } else {
            0.0
        };
        let battery_level = (85.0 - (ms % WEEK_MS) / WEEK_MS * 60.0).clamp(0.0, 100.0);

        let sample = SensorSample {
            id: Uuid::new_v4(),
            sequence: 0,
            timestamp: now,
            soil_moisture: (soil_moisture * 10.0).round() / 10.0, // 1 decimal precision
            air_humidity: (air_humidity * 10.0).round() / 10.0,
            air_temp: (air_temp * 10.0).round() / 10.0,
            water_temp: (water_temp * 10.0).round() / 10.0,
            ph_level: (ph_level * 100.0).round() / 100.0,
            water_level: water_level.round(),
            air_quality: air_quality.round(),
            flow_rate: (flow_rate * 100.0).round() / 100.0,
            battery_level: battery_level.round(),
            pump_on,
        };

        debug!(
            tick = self.tick_count,
            soil_moisture = sample.soil_moisture,
            ph_level = sample.ph_level,
            water_level = sample.water_level,
            air_quality = sample.air_quality,
            pump_on,
            "Generated simulated sample"
        );

        Ok(sample)
    }
}

impl ReadingSource for SimulatedRig {
    fn produce_sample(&mut self) -> BoxFuture<'_, AppResult<SensorSample>> {
        future::ready(self.generate()).boxed()
    }
}
