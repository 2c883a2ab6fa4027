//! Monitoring Session Routes

use alerting::Location;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use monitor::{SessionHandle, SosOutcome, StatusSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use threat_state::Event;

use crate::{ApiError, AppState};

/// Response for stop and logout
#[derive(Debug, Serialize, Deserialize)]
pub struct StopResponse {
    pub user: String,
    pub stopped: bool,
}

/// Response for the admin overview
#[derive(Debug, Serialize, Deserialize)]
pub struct OverviewResponse {
    pub data: Vec<StatusSnapshot>,
    pub count: usize,
    pub active_count: usize,
}

/// Query parameters for history endpoint
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of events
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub data: Vec<Event>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct AutoAlertRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AutoAlertResponse {
    pub user: String,
    pub auto_alert: bool,
}

/// Start monitoring
pub async fn start(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<(StatusCode, Json<SessionHandle>), ApiError> {
    let handle = state.manager.start(&user).await?;
    Ok((StatusCode::CREATED, Json(handle)))
}

/// Stop monitoring (idempotent)
pub async fn stop(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Json<StopResponse> {
    let stopped = state.manager.stop(&user);
    Json(StopResponse { user, stopped })
}

/// Stop and forget the session and its sensor feed
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Json<StopResponse> {
    let stopped = state.manager.is_active(&user);
    state.manager.logout(&user);
    state.feeds.remove(&user);
    Json(StopResponse { user, stopped })
}

/// Current threat status
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<Json<StatusSnapshot>, ApiError> {
    Ok(Json(state.manager.status(&user).await?))
}

/// Recent events, oldest first
pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = params.limit.min(state.manager.config().session.history_capacity);
    let data = state.manager.history(&user, limit).await?;

    Ok(Json(HistoryResponse {
        count: data.len(),
        data,
    }))
}

/// Every known session
pub async fn overview(State(state): State<Arc<AppState>>) -> Json<OverviewResponse> {
    let data = state.manager.overview().await;
    let active = data.iter().filter(|s| s.active).count();

    Json(OverviewResponse {
        count: data.len(),
        active_count: active,
        data,
    })
}

/// Trigger SOS. Answers only after contacts were notified (or failed).
pub async fn sos(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<Json<SosOutcome>, ApiError> {
    Ok(Json(state.manager.sos(&user).await?))
}

/// Release the SOS hold
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<Json<StatusSnapshot>, ApiError> {
    Ok(Json(state.manager.resolve(&user).await?))
}

pub async fn set_auto_alert(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
    Json(body): Json<AutoAlertRequest>,
) -> Result<Json<AutoAlertResponse>, ApiError> {
    state.manager.set_auto_alert(&user, body.enabled)?;
    Ok(Json(AutoAlertResponse {
        user,
        auto_alert: body.enabled,
    }))
}

/// Store the last known position, sent with later alerts
pub async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
    Json(location): Json<Location>,
) -> Result<StatusCode, ApiError> {
    let valid = (-90.0..=90.0).contains(&location.lat) && (-180.0..=180.0).contains(&location.lng);
    if !valid {
        return Err(ApiError::BadRequest(format!(
            "location out of range: {}, {}",
            location.lat, location.lng
        )));
    }

    state.manager.update_location(&user, location)?;
    Ok(StatusCode::NO_CONTENT)
}
