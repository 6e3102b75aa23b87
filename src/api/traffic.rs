use crate::api::errors::ApiError;
use crate::server::AppState;
use crate::storage::raw_views::{self, NewRawView};
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const MAX_URL_LEN: usize = 2048;
const MAX_IP_LEN: usize = 64;
const MAX_USER_AGENT_LEN: usize = 1024;

/// One view as reported by a tracked site.
#[derive(Debug, Deserialize)]
pub struct ReportedView {
    pub url: String,
    pub ip_address: String,
    #[serde(default)]
    pub user_agent: String,
    /// RFC 3339 or naive ISO-8601; offsets are normalized to UTC.
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct TrafficReport {
    pub traffic: Vec<ReportedView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrafficAccepted {
    pub accepted: usize,
}

fn parse_reported_time(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

impl ReportedView {
    /// Trim every field and check it is storable.
    fn into_raw_view(self, index: usize) -> Result<NewRawView, ApiError> {
        let url = self.url.trim().to_string();
        let ip_address = self.ip_address.trim().to_string();
        let user_agent = self.user_agent.trim().to_string();
        let timestamp_text = self.timestamp.trim();

        if url.is_empty() || ip_address.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "traffic[{index}]: url and ip_address must not be empty"
            )));
        }
        if url.len() > MAX_URL_LEN
            || ip_address.len() > MAX_IP_LEN
            || user_agent.len() > MAX_USER_AGENT_LEN
        {
            return Err(ApiError::BadRequest(format!(
                "traffic[{index}]: field exceeds maximum length"
            )));
        }
        let timestamp = parse_reported_time(timestamp_text).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "traffic[{index}]: invalid timestamp '{timestamp_text}'"
            ))
        })?;

        Ok(NewRawView {
            url,
            ip_address,
            user_agent,
            timestamp,
        })
    }
}

/// POST /api/v1/traffic: Store a batch of reported views for later processing.
pub async fn report_traffic(
    State(state): State<Arc<AppState>>,
    Json(report): Json<TrafficReport>,
) -> Result<Json<TrafficAccepted>, ApiError> {
    let count = report.traffic.len();
    if count == 0 {
        return Err(ApiError::BadRequest(
            "The request did not contain any traffic".to_string(),
        ));
    }
    if count > state.max_views_per_request {
        return Err(ApiError::BadRequest(format!(
            "Too many views in one request: {count} (maximum {})",
            state.max_views_per_request
        )));
    }

    let views = report
        .traffic
        .into_iter()
        .enumerate()
        .map(|(i, view)| view.into_raw_view(i))
        .collect::<Result<Vec<_>, _>>()?;

    let state2 = Arc::clone(&state);
    let accepted = tokio::task::spawn_blocking(move || {
        let mut conn = state2.conn.lock();
        raw_views::insert_batch(&mut conn, &views)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Insert task panicked: {e}")))??;

    state
        .views_reported_total
        .fetch_add(accepted as u64, Ordering::Relaxed);
    tracing::debug!(accepted, "Traffic stored");

    Ok(Json(TrafficAccepted { accepted }))
}
