//! Sensor Reading Ingestion
//!
//! The capture layer (camera pose classifier, speech classifier) posts its
//! latest outputs here; the user's session samples them on the next tick.

use axum::{
    extract::{Path, State},
    Json,
};
use monitor::MonitorError;
use serde::{Deserialize, Serialize};
use signal_fusion::SignalSource;
use std::sync::Arc;
use tracing::debug;

use crate::{ApiError, AppState};

/// Classifier outputs in [0, 1]; either may be omitted
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ReadingsRequest {
    pub motion: Option<f64>,
    pub speech: Option<f64>,
    /// Reason a sensor failed, reported instead of a value
    pub motion_error: Option<String>,
    pub speech_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadingsResponse {
    pub user: String,
    pub accepted: usize,
}

fn check(source: SignalSource, value: f64) -> Result<f64, ApiError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ApiError::BadRequest(format!(
            "{} value must be within [0, 1], got {}",
            source, value
        )))
    }
}

/// Publish readings into the user's sensor feed
pub async fn publish(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
    Json(body): Json<ReadingsRequest>,
) -> Result<Json<ReadingsResponse>, ApiError> {
    let motion = body
        .motion
        .map(|v| check(SignalSource::Motion, v))
        .transpose()?;
    let speech = body
        .speech
        .map(|v| check(SignalSource::Speech, v))
        .transpose()?;

    let updates: Vec<_> = [
        (SignalSource::Motion, motion, body.motion_error),
        (SignalSource::Speech, speech, body.speech_error),
    ]
    .into_iter()
    .filter(|(_, value, error)| value.is_some() || error.is_some())
    .collect();

    if updates.is_empty() {
        return Err(ApiError::BadRequest(
            "at least one reading is required".to_string(),
        ));
    }

    // Feeds exist only for monitored users
    if !state.manager.is_active(&user) {
        return Err(MonitorError::NotActive(user).into());
    }

    let accepted = updates.len();
    let feed = state.feeds.feed(&user);
    for (source, value, error) in updates {
        match (value, error) {
            (Some(value), _) => feed.publish(source, value),
            (None, Some(reason)) => feed.publish_failure(source, reason),
            (None, None) => {}
        }
    }

    debug!("Accepted {} reading(s) for {}", accepted, user);
    Ok(Json(ReadingsResponse { user, accepted }))
}
