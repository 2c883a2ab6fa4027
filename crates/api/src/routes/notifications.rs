//! Notification History Routes

use alerting::NotificationRecord;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;

/// Query parameters for notifications endpoint
#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    /// Only notifications for this user
    pub user: Option<String>,
    /// Maximum number of records
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Response for notifications endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub data: Vec<NotificationRecord>,
    pub count: usize,
    pub failed_count: usize,
}

/// Get recent notifications, newest first
pub async fn get_notifications(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NotificationQuery>,
) -> Json<NotificationResponse> {
    let limit = params.limit.min(500);
    let dispatcher = state.manager.dispatcher();

    let data: Vec<NotificationRecord> = match params.user.as_deref() {
        Some(user) => dispatcher
            .history(usize::MAX)
            .into_iter()
            .filter(|n| n.user == user)
            .take(limit)
            .collect(),
        None => dispatcher.history(limit),
    };
    let failed = data.iter().filter(|n| !n.delivered).count();

    Json(NotificationResponse {
        count: data.len(),
        failed_count: failed,
        data,
    })
}
