//! HTTP request handlers
//!
//! REST surface over the monitor: read-only views of the engine state plus
//! the user commands (pump control, settings, alert housekeeping, export).

use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpRequest, HttpResponse, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Alert, HealthCheck, RuleKey, SampleInput, SensorSample};
use crate::monitor::Monitor;
use crate::settings::ThresholdUpdate;
use crate::validation::{validate_history_limit, validate_sample_input};
use crate::websocket::WsSession;

/// Configure all application routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    // Malformed bodies and query strings get the same error envelope as everything else
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into()),
    )
    .service(
        web::scope("/api")
            .route("/health", web::get().to(health_check))
            .route("/state", web::get().to(get_state))
            // Sensor data
            .route("/sensor/latest", web::get().to(get_latest_sample))
            .route("/sensor/history", web::get().to(get_sample_history))
            .route("/sensor/ingest", web::post().to(ingest_sample))
            .route("/refresh", web::post().to(force_refresh))
            // Pump control
            .route("/pump/manual", web::post().to(toggle_pump))
            .route("/pump/auto", web::post().to(reset_pump_to_auto))
            // Settings
            .route("/settings", web::get().to(get_settings))
            .route("/settings", web::put().to(update_settings))
            // Alerts
            .route("/alerts", web::get().to(get_alerts))
            .route("/alerts", web::delete().to(clear_alerts))
            .route("/alerts/{id}", web::delete().to(dismiss_alert))
            .route("/alerts/{id}/ack", web::post().to(acknowledge_alert))
            // Notifications
            .route(
                "/notifications/air-quality/ack",
                web::post().to(acknowledge_air_quality),
            )
            .route("/notifications/{id}/close", web::post().to(close_notification))
            // Export
            .route("/export", web::get().to(export_history)),
    )
    .route("/ws", web::get().to(websocket_handler));
}

/// Result of a user command
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> CommandResponse<T> {
    fn ok(message: &str, data: T) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            data: Some(data),
        }
    }

    fn noop(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            data: None,
        }
    }
}

/// Health check endpoint
///
/// GET /api/health
pub async fn health_check(monitor: web::Data<Monitor>) -> Result<HttpResponse, AppError> {
    let engine = monitor.engine().read().await;

    let health = HealthCheck {
        status: if engine.is_connected() { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        connected: engine.is_connected(),
        last_reading: engine.last_update(),
    };

    Ok(HttpResponse::Ok().json(health))
}

/// Full dashboard snapshot
///
/// GET /api/state
pub async fn get_state(monitor: web::Data<Monitor>) -> Result<HttpResponse, AppError> {
    let engine = monitor.engine().read().await;
    Ok(HttpResponse::Ok().json(engine.snapshot()))
}

/// GET /api/sensor/latest
pub async fn get_latest_sample(monitor: web::Data<Monitor>) -> Result<HttpResponse, AppError> {
    let engine = monitor.engine().read().await;
    if engine.history().is_empty() {
        return Err(AppError::NotFound("No sensor readings available".to_string()));
    }
    let snapshot = engine.snapshot();

    match (snapshot.latest, snapshot.classification) {
        (Some(sample), Some(classification)) => Ok(HttpResponse::Ok().json(LatestResponse {
            sample,
            classification,
        })),
        _ => Err(AppError::NotFound("No sensor readings available".to_string())),
    }
}

#[derive(Serialize)]
struct LatestResponse {
    sample: SensorSample,
    classification: crate::classifier::ClassifiedSample,
}

/// Query parameters for sample history
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Most recent samples first
///
/// GET /api/sensor/history?limit=20
pub async fn get_sample_history(
    monitor: web::Data<Monitor>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let engine = monitor.engine().read().await;
    let history = engine.history();
    let limit = validate_history_limit(query.limit, history.capacity().min(1_000))?;

    let data: Vec<_> = history.window(limit).into_iter().cloned().collect();

    Ok(HttpResponse::Ok().json(HistoryResponse {
        total: history.len(),
        capacity: history.capacity(),
        data,
    }))
}

#[derive(Serialize)]
struct HistoryResponse {
    data: Vec<crate::models::HistoryEntry>,
    total: usize,
    capacity: usize,
}

/// Push a sample from an external rig
///
/// POST /api/sensor/ingest
pub async fn ingest_sample(
    monitor: web::Data<Monitor>,
    body: web::Json<SampleInput>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let correlation_id = extract_correlation_id(&req);

    info!(correlation_id = %correlation_id, "Received sample ingestion request");

    validate_sample_input(&body)?;

    let sample: SensorSample = body.into_inner().into();
    let report = monitor.ingest(sample).await;

    info!(
        correlation_id = %correlation_id,
        sequence = report.sequence,
        raised = report.raised.len(),
        "Sample ingested successfully"
    );

    Ok(HttpResponse::Created().json(IngestResponse {
        success: true,
        sequence: report.sequence,
        raised: report.raised.iter().map(|a| a.rule).collect(),
        cleared: report.cleared,
        correlation_id,
    }))
}

#[derive(Serialize, Deserialize)]
struct IngestResponse {
    success: bool,
    sequence: u64,
    raised: Vec<RuleKey>,
    cleared: Vec<RuleKey>,
    correlation_id: String,
}

/// Poll the source now instead of waiting for the next tick
///
/// POST /api/refresh
pub async fn force_refresh(monitor: web::Data<Monitor>) -> Result<HttpResponse, AppError> {
    let report = monitor.poll_once().await?;
    Ok(HttpResponse::Ok().json(CommandResponse::ok("Data refreshed", report)))
}

#[derive(Debug, Deserialize)]
pub struct PumpRequest {
    pub on: bool,
}

/// Manual pump override
///
/// POST /api/pump/manual {"on": true}
pub async fn toggle_pump(
    monitor: web::Data<Monitor>,
    body: web::Json<PumpRequest>,
) -> Result<HttpResponse, AppError> {
    let state = monitor
        .engine()
        .write()
        .await
        .toggle_manual(body.on, Utc::now())?;

    let message = if body.on { "Pump started manually" } else { "Pump stopped manually" };
    Ok(HttpResponse::Ok().json(CommandResponse::ok(message, state)))
}

/// POST /api/pump/auto
pub async fn reset_pump_to_auto(monitor: web::Data<Monitor>) -> Result<HttpResponse, AppError> {
    let state = monitor.engine().write().await.reset_to_auto(Utc::now())?;
    Ok(HttpResponse::Ok().json(CommandResponse::ok(
        "Pump returned to automatic control",
        state,
    )))
}

/// GET /api/settings
pub async fn get_settings(monitor: web::Data<Monitor>) -> Result<HttpResponse, AppError> {
    let engine = monitor.engine().read().await;
    Ok(HttpResponse::Ok().json(engine.settings()))
}

/// Partial update; out-of-range values are clamped
///
/// PUT /api/settings
pub async fn update_settings(
    monitor: web::Data<Monitor>,
    body: web::Json<ThresholdUpdate>,
) -> Result<HttpResponse, AppError> {
    let config = monitor.apply_settings(&body).await?;
    Ok(HttpResponse::Ok().json(CommandResponse::ok(
        "Your preferences have been updated",
        config,
    )))
}

#[derive(Serialize, Deserialize)]
struct AlertsResponse {
    alerts: Vec<Alert>,
    unread: u32,
}

/// GET /api/alerts
pub async fn get_alerts(monitor: web::Data<Monitor>) -> Result<HttpResponse, AppError> {
    let engine = monitor.engine().read().await;
    Ok(HttpResponse::Ok().json(AlertsResponse {
        alerts: engine.alerts().alerts().to_vec(),
        unread: engine.alerts().unread(),
    }))
}

/// DELETE /api/alerts/{id}
pub async fn dismiss_alert(
    monitor: web::Data<Monitor>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let response = if monitor.engine().write().await.dismiss_alert(id) {
        CommandResponse::ok("Alert dismissed", id)
    } else {
        CommandResponse::noop("No such alert")
    };
    Ok(HttpResponse::Ok().json(response))
}

/// POST /api/alerts/{id}/ack
pub async fn acknowledge_alert(
    monitor: web::Data<Monitor>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let response = if monitor.engine().write().await.acknowledge_alert(id) {
        CommandResponse::ok("Alert acknowledged", id)
    } else {
        CommandResponse::noop("No unacknowledged alert with that id")
    };
    Ok(HttpResponse::Ok().json(response))
}

/// DELETE /api/alerts
pub async fn clear_alerts(monitor: web::Data<Monitor>) -> Result<HttpResponse, AppError> {
    monitor.engine().write().await.clear_all_alerts(Utc::now());
    Ok(HttpResponse::Ok().json(CommandResponse::ok("All alerts have been dismissed", ())))
}

/// POST /api/notifications/{id}/close
pub async fn close_notification(
    monitor: web::Data<Monitor>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let response = if monitor.engine().write().await.close_notification(id) {
        CommandResponse::ok("Notification closed", id)
    } else {
        CommandResponse::noop("No such notification")
    };
    Ok(HttpResponse::Ok().json(response))
}

/// POST /api/notifications/air-quality/ack
pub async fn acknowledge_air_quality(monitor: web::Data<Monitor>) -> Result<HttpResponse, AppError> {
    let response = if monitor.engine().write().await.acknowledge_air_quality_popup() {
        CommandResponse::ok("Air quality warning acknowledged", ())
    } else {
        CommandResponse::noop("No air quality warning showing")
    };
    Ok(HttpResponse::Ok().json(response))
}

/// Download the history as CSV
///
/// GET /api/export
pub async fn export_history(monitor: web::Data<Monitor>) -> Result<HttpResponse, AppError> {
    let export = monitor.engine().write().await.export_history(Utc::now());

    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(export.filename)],
        })
        .body(export.content))
}

/// WebSocket upgrade handler
///
/// GET /ws
pub async fn websocket_handler(
    req: HttpRequest,
    stream: web::Payload,
    monitor: web::Data<Monitor>,
) -> Result<HttpResponse, actix_web::Error> {
    let client_id = Uuid::new_v4().to_string();

    info!(client_id = %client_id, "WebSocket connection request");

    let events = monitor.subscribe().await;
    let ws_session = WsSession::new(client_id, events);

    actix_web_actors::ws::start(ws_session, &req, stream)
}

/// Extract or generate correlation ID from request headers
fn extract_correlation_id(req: &HttpRequest) -> String {
    req.headers()
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::testing::RecordingPumpDriver;
    use crate::config::EngineSettings;
    use crate::engine::Engine;
    use crate::error::AppResult;
    use crate::models::{ActuatorMode, ActuatorState};
    use crate::settings::{SettingsStore, ThresholdConfig};
    use crate::source::testing::ScriptedSource;
    use actix_web::{test, App};
    use std::sync::Arc;

    fn monitor_with(script: Vec<AppResult<SensorSample>>) -> (Monitor, Arc<RecordingPumpDriver>) {
        let driver = Arc::new(RecordingPumpDriver::default());
        let engine = Engine::new(
            SettingsStore::in_memory(ThresholdConfig::default()),
            driver.clone(),
            &EngineSettings::default(),
        );
        (
            Monitor::new(engine, Box::new(ScriptedSource::new(script))),
            driver,
        )
    }

    fn sample_input(soil_moisture: f64) -> serde_json::Value {
        serde_json::json!({
            "soil_moisture": soil_moisture,
            "air_humidity": 60.0,
            "air_temp": 22.0,
            "water_temp": 20.0,
            "ph_level": 6.8,
            "water_level": 75.0,
            "air_quality": 40.0,
            "flow_rate": 0.0,
            "battery_level": 85.0
        })
    }

    #[actix_web::test]
    async fn test_health_check() {
        let (monitor, _) = monitor_with(vec![]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(monitor))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_get_latest_no_data() {
        let (monitor, _) = monitor_with(vec![]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(monitor))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/sensor/latest").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 404);
    }

    #[actix_web::test]
    async fn test_ingest_raises_alert() {
        let (monitor, _) = monitor_with(vec![]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(monitor))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/sensor/ingest")
            .set_json(sample_input(12.0))
            .to_request();
        let resp: IngestResponse = test::call_and_read_body_json(&app, req).await;

        assert!(resp.success);
        assert_eq!(resp.sequence, 1);
        assert_eq!(resp.raised, vec![RuleKey::LowMoisture]);

        let req = test::TestRequest::get().uri("/api/alerts").to_request();
        let alerts: AlertsResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(alerts.unread, 1);
        assert_eq!(alerts.alerts.len(), 1);
    }

    #[actix_web::test]
    async fn test_ingest_invalid_data() {
        let (monitor, _) = monitor_with(vec![]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(monitor))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/sensor/ingest")
            .set_json(sample_input(140.0))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_malformed_body_uses_error_envelope() {
        let (monitor, _) = monitor_with(vec![]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(monitor))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/pump/manual")
            .insert_header(("content-type", "application/json"))
            .set_payload("{\"on\": \"sometimes\"}")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error_type"], "BAD_REQUEST");
    }

    #[actix_web::test]
    async fn test_bad_history_query_is_rejected() {
        let (monitor, _) = monitor_with(vec![]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(monitor))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/sensor/history?limit=many")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error_type"], "BAD_REQUEST");
    }

    #[actix_web::test]
    async fn test_refresh_source_unavailable() {
        let (monitor, _) = monitor_with(vec![]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(monitor))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/refresh").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 503);
    }

    #[actix_web::test]
    async fn test_refresh_ingests_sample() {
        let (monitor, _) = monitor_with(vec![Ok(SensorSample::nominal())]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(monitor))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/refresh").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let req = test::TestRequest::get().uri("/api/sensor/latest").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_manual_pump_and_reset() {
        let (monitor, driver) = monitor_with(vec![]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(monitor))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/pump/manual")
            .set_json(serde_json::json!({ "on": true }))
            .to_request();
        let resp: CommandResponse<ActuatorState> = test::call_and_read_body_json(&app, req).await;
        let state = resp.data.unwrap();
        assert_eq!(state.mode, ActuatorMode::Manual);
        assert!(state.desired);

        let req = test::TestRequest::post().uri("/api/pump/auto").to_request();
        let resp: CommandResponse<ActuatorState> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.data.unwrap().mode, ActuatorMode::Auto);

        assert_eq!(driver.sent(), vec![true, true]);
    }

    #[actix_web::test]
    async fn test_pump_command_failure_maps_to_bad_gateway() {
        let (monitor, driver) = monitor_with(vec![]);
        driver.set_failing(true);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(monitor))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/pump/manual")
            .set_json(serde_json::json!({ "on": false }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 502);
    }

    #[actix_web::test]
    async fn test_update_settings_clamps() {
        let (monitor, _) = monitor_with(vec![]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(monitor))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/api/settings")
            .set_json(serde_json::json!({ "moistureThreshold": 140.0, "soundAlerts": false }))
            .to_request();
        let resp: CommandResponse<ThresholdConfig> = test::call_and_read_body_json(&app, req).await;
        let config = resp.data.unwrap();

        assert_eq!(config.moisture_threshold, 100.0);
        assert!(!config.sound_alerts);
        assert_eq!(config.battery_threshold, 20.0);
    }

    #[actix_web::test]
    async fn test_dismiss_unknown_alert_is_noop() {
        let (monitor, _) = monitor_with(vec![]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(monitor))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::delete().uri("/api/alerts/42").to_request();
        let resp: CommandResponse<u64> = test::call_and_read_body_json(&app, req).await;

        assert!(!resp.success);
    }

    #[actix_web::test]
    async fn test_export_csv() {
        let (monitor, _) = monitor_with(vec![]);
        monitor.ingest(SensorSample::nominal()).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(monitor))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/export").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        assert!(resp
            .headers()
            .get("content-disposition")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("climaneer_data_")));

        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("Timestamp,"));
    }
}
