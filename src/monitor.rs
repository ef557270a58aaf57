//! Monitor: wires a reading source to the engine and drives the timers
//!
//! The monitor is what handlers and the WebSocket layer hold. It owns the
//! shared engine lock and the reading source, and starts three background
//! tasks: the poll loop, the 1 Hz runtime counter and the uptime walk.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info};

use crate::engine::{Engine, IngestReport};
use crate::error::AppResult;
use crate::models::{EngineEvent, SensorSample};
use crate::scheduler::{spawn_repeating, Period, TaskHandle};
use crate::settings::{ThresholdConfig, ThresholdUpdate};
use crate::source::ReadingSource;

const RUNTIME_TICK: Duration = Duration::from_secs(1);
const UPTIME_TICK: Duration = Duration::from_secs(60);

/// Shared handle to the engine and its reading source
#[derive(Clone)]
pub struct Monitor {
    engine: Arc<RwLock<Engine>>,
    source: Arc<Mutex<Box<dyn ReadingSource>>>,
    poll_interval_ms: Arc<AtomicU64>,
}

/// Background tasks started by [`Monitor::start`]
pub struct MonitorTasks {
    pub poll: TaskHandle,
    pub runtime: TaskHandle,
    pub uptime: TaskHandle,
}

impl MonitorTasks {
    pub fn cancel_all(&self) {
        self.poll.cancel();
        self.runtime.cancel();
        self.uptime.cancel();
    }
}

impl Monitor {
    pub fn new(engine: Engine, source: Box<dyn ReadingSource>) -> Self {
        let poll_interval_ms = Arc::new(AtomicU64::new(engine.poll_interval().as_millis() as u64));
        Self {
            engine: Arc::new(RwLock::new(engine)),
            source: Arc::new(Mutex::new(source)),
            poll_interval_ms,
        }
    }

    pub fn engine(&self) -> &Arc<RwLock<Engine>> {
        &self.engine
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.read().await.subscribe()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.load(Ordering::SeqCst))
    }

    /// Fetch one sample from the source and run it through the engine.
    ///
    /// The source lock is held until the sample is ingested, so a forced
    /// refresh and the poll loop can never reorder samples.
    pub async fn poll_once(&self) -> AppResult<IngestReport> {
        let mut source = self.source.lock().await;
        let result = source.produce_sample().await;

        let mut engine = self.engine.write().await;
        match result {
            Ok(sample) => Ok(engine.ingest(sample, Utc::now())),
            Err(e) => {
                engine.record_source_failure(&e, Utc::now());
                Err(e)
            }
        }
    }

    /// Ingest a sample pushed from outside the poll loop
    pub async fn ingest(&self, sample: SensorSample) -> IngestReport {
        let _source = self.source.lock().await;
        self.engine.write().await.ingest(sample, Utc::now())
    }

    /// Apply a settings edit and retime the poll loop
    pub async fn apply_settings(&self, update: &ThresholdUpdate) -> AppResult<ThresholdConfig> {
        let config = self.engine.write().await.apply_settings(update, Utc::now())?;

        let previous = self.poll_interval();
        self.poll_interval_ms
            .store(config.poll_interval_ms, Ordering::SeqCst);
        if previous != self.poll_interval() {
            info!(
                from_ms = previous.as_millis() as u64,
                to_ms = config.poll_interval_ms,
                "Poll interval changed"
            );
        }

        Ok(config)
    }

    /// Start the poll loop and the stats timers
    pub fn start(&self) -> MonitorTasks {
        let monitor = self.clone();
        let poll = spawn_repeating(
            "poll",
            Period::Shared(self.poll_interval_ms.clone()),
            true,
            move || {
                let monitor = monitor.clone();
                async move {
                    if let Ok(report) = monitor.poll_once().await {
                        debug!(sequence = report.sequence, "Poll completed");
                    }
                }
            },
        );

        let engine = self.engine.clone();
        let runtime = spawn_repeating("runtime", Period::Fixed(RUNTIME_TICK), false, move || {
            let engine = engine.clone();
            async move {
                engine.write().await.tick_runtime(Utc::now());
            }
        });

        let engine = self.engine.clone();
        let uptime = spawn_repeating("uptime", Period::Fixed(UPTIME_TICK), false, move || {
            let engine = engine.clone();
            async move {
                let mut engine = engine.write().await;
                engine.tick_uptime(&mut rand::thread_rng());
            }
        });

        MonitorTasks {
            poll,
            runtime,
            uptime,
        }
    }
}
