//! Climaneer
//!
//! Telemetry and control backend for a greenhouse sensor rig: polls soil,
//! water and air readings, raises deduplicated threshold alerts, drives the
//! irrigation pump and streams every state change to dashboards.

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod actuator;
mod alerts;
mod classifier;
mod config;
mod engine;
mod error;
mod export;
mod handlers;
mod history;
mod models;
mod monitor;
mod notifications;
mod scheduler;
mod settings;
mod source;
mod validation;
mod websocket;

use crate::config::Settings;
use crate::engine::Engine;
use crate::monitor::Monitor;
use crate::settings::SettingsStore;
use crate::source::SimulatedRig;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env
    dotenv::dotenv().ok();

    // Logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,climaneer=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();

    // Load configuration
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e));
        }
    };
    let bind_address = format!("{}:{}", settings.server.host, settings.server.port);

    info!("Starting Climaneer backend");
    info!("Binding server to {}", bind_address);

    // ---------------------------------------------------------------------
    // Engine, reading source and pump driver
    // ---------------------------------------------------------------------
    let rig = SimulatedRig::new(settings.engine.source_failure_rate);
    let store = SettingsStore::new(
        settings.engine.settings_path.clone(),
        settings.engine.alerts_path.clone(),
    );
    let engine = Engine::new(store, rig.pump_driver(), &settings.engine);
    let monitor = Monitor::new(engine, Box::new(rig));

    // Background tasks run on the actix runtime
    let tasks = monitor.start();

    // ---------------------------------------------------------------------
    // HTTP + WebSocket server
    // ---------------------------------------------------------------------
    let app_monitor = web::Data::new(monitor);
    let result = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_monitor.clone())
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(handlers::configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await;

    tasks.cancel_all();
    info!("Climaneer backend stopped");
    result
}
