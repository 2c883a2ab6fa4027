//! HTTP route tests, driving the router in-process

use alerting::{AlertDispatcher, Contact, MemoryActivityLog, MemoryNotifier, StaticDirectory};
use api::{create_router, AppState};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use monitor::{FeedRegistry, MonitorConfig, SessionManager};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    notifier: Arc<MemoryNotifier>,
}

fn app() -> TestApp {
    let mut config = MonitorConfig::default();
    config.session.tick_interval_ms = 3_600_000;
    config.session.reading_max_age_ms = 3_600_000;
    config.fusion.smoothing = 1.0;

    let mut contacts = HashMap::new();
    contacts.insert(
        "bob".to_string(),
        vec![
            Contact::new("Ann", "+15550001", "ann@example.com"),
            Contact::new("Ben", "+15550002", ""),
        ],
    );

    let notifier = Arc::new(MemoryNotifier::new());
    let dispatcher = Arc::new(AlertDispatcher::new(
        config.alerting.clone(),
        notifier.clone(),
        Arc::new(StaticDirectory::new(contacts)),
        Arc::new(MemoryActivityLog::new()),
    ));
    let feeds = Arc::new(FeedRegistry::new(config.session.reading_max_age()));
    let manager = Arc::new(SessionManager::new(config, feeds.clone(), dispatcher).unwrap());

    let state = Arc::new(AppState::new(manager, feeds));
    TestApp {
        router: create_router(state.clone()),
        state,
        notifier,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = send(&app.router, "GET", "/api/v1/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_sessions"], 0);
    assert_eq!(body["recent_notifications_delivered"], 0);
}

#[tokio::test]
async fn test_start_then_conflict() {
    let app = app();

    let (status, body) = send(&app.router, "POST", "/api/v1/monitoring/alice/start", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"], "alice");
    assert!(body["session_id"].is_string());

    let (status, body) = send(&app.router, "POST", "/api/v1/monitoring/alice/start", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Conflict");
}

#[tokio::test]
async fn test_status_unknown_user_is_not_found() {
    let app = app();
    let (status, body) = send(&app.router, "GET", "/api/v1/monitoring/ghost/status", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_readings_feed_the_next_tick() {
    let app = app();
    send(&app.router, "POST", "/api/v1/monitoring/alice/start", None).await;

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/v1/monitoring/alice/readings",
        Some(json!({ "motion": 0.5, "speech": 0.5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], 2);

    app.state.manager.tick("alice").await.unwrap();

    let (status, body) = send(&app.router, "GET", "/api/v1/monitoring/alice/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "MEDIUM");
    assert_eq!(body["active"], true);
    assert_eq!(body["history"].as_array().unwrap().len(), 1);

    let (_, body) = send(
        &app.router,
        "GET",
        "/api/v1/monitoring/alice/history?limit=5",
        None,
    )
    .await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["data"][0]["trigger"], "periodic");
}

#[tokio::test]
async fn test_invalid_readings_rejected() {
    let app = app();

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/monitoring/alice/readings",
        Some(json!({ "motion": 1.5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/monitoring/alice/readings",
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_readings_for_unmonitored_user_rejected() {
    let app = app();

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/monitoring/mallory/readings",
        Some(json!({ "motion": 0.4 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(&app.router, "POST", "/api/v1/monitoring/mallory/start", None).await;
    send(&app.router, "POST", "/api/v1/monitoring/mallory/stop", None).await;
    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/monitoring/mallory/readings",
        Some(json!({ "speech": 0.4 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_counts_delivered_notifications() {
    let app = app();
    send(&app.router, "POST", "/api/v1/monitoring/bob/sos", None).await;

    let (_, body) = send(&app.router, "GET", "/api/v1/health", None).await;
    assert_eq!(body["recent_notifications_delivered"], 2);
}

#[tokio::test]
async fn test_sos_reports_contacts_and_history() {
    let app = app();
    send(&app.router, "POST", "/api/v1/monitoring/bob/start", None).await;

    let (status, body) = send(&app.router, "POST", "/api/v1/monitoring/bob/sos", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contacts_notified"], 2);
    assert_eq!(body["state"], "CRITICAL");

    let (_, body) = send(&app.router, "GET", "/api/v1/notifications?user=bob", None).await;
    assert_eq!(body["count"], 2);
    assert_eq!(body["failed_count"], 0);
    assert_eq!(body["data"][0]["kind"], "sos");

    let (status, body) = send(&app.router, "POST", "/api/v1/monitoring/bob/resolve", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "SAFE");
    assert_eq!(body["sos_latched"], false);
}

#[tokio::test]
async fn test_sos_dispatch_failure_is_bad_gateway() {
    let app = app();
    app.notifier.set_failure(Some("sms gateway down"));

    let (status, _) = send(&app.router, "POST", "/api/v1/monitoring/bob/sos", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (_, body) = send(&app.router, "GET", "/api/v1/monitoring/bob/status", None).await;
    assert_eq!(body["state"], "CRITICAL");
}

#[tokio::test]
async fn test_location_validation() {
    let app = app();

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/monitoring/bob/location",
        Some(json!({ "lat": 120.0, "lng": 0.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/monitoring/bob/location",
        Some(json!({ "lat": 40.7, "lng": -74.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app.router, "GET", "/api/v1/monitoring/bob/status", None).await;
    assert_eq!(body["location"]["lat"], 40.7);
}

#[tokio::test]
async fn test_auto_alert_toggle_requires_session() {
    let app = app();

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/monitoring/alice/auto-alert",
        Some(json!({ "enabled": false })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(&app.router, "POST", "/api/v1/monitoring/alice/start", None).await;
    let (status, body) = send(
        &app.router,
        "POST",
        "/api/v1/monitoring/alice/auto-alert",
        Some(json!({ "enabled": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["auto_alert"], false);
}

#[tokio::test]
async fn test_stop_logout_and_overview() {
    let app = app();
    send(&app.router, "POST", "/api/v1/monitoring/alice/start", None).await;
    send(&app.router, "POST", "/api/v1/monitoring/bob/start", None).await;

    let (_, body) = send(&app.router, "POST", "/api/v1/monitoring/alice/stop", None).await;
    assert_eq!(body["stopped"], true);
    let (_, body) = send(&app.router, "POST", "/api/v1/monitoring/alice/stop", None).await;
    assert_eq!(body["stopped"], false);

    let (_, body) = send(&app.router, "GET", "/api/v1/monitoring", None).await;
    assert_eq!(body["count"], 2);
    assert_eq!(body["active_count"], 1);

    let (_, body) = send(&app.router, "POST", "/api/v1/monitoring/bob/logout", None).await;
    assert_eq!(body["stopped"], true);

    let (status, _) = send(&app.router, "GET", "/api/v1/monitoring/bob/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_without_recorder() {
    let app = app();
    let (status, _) = send(&app.router, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
