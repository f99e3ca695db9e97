//! Administrative CRUD and liveness/stats endpoints (C19). Thin handlers
//! over the same ports the pipeline uses; no independent business logic
//! lives here, matching §6's "no independent business logic" requirement.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waf_common::model::IpListKind;
use waf_common::ports::RecordStore;

use crate::state::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct AddIpListEntryRequest {
    pub ip: String,
    pub kind: IpListKind,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct AdminError {
    pub error: String,
}

pub async fn add_ip_list_entry(
    State(state): State<AppState>,
    Json(body): Json<AddIpListEntryRequest>,
) -> Result<StatusCode, (StatusCode, Json<AdminError>)> {
    state
        .ip_list
        .add(&*state.kv, &*state.records, &body.ip, body.kind, body.reason, body.expires_at)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|err| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AdminError { error: err.to_string() }),
            )
        })
}

#[derive(Debug, Deserialize)]
pub struct RemoveIpListEntryQuery {
    pub kind: IpListKind,
}

pub async fn remove_ip_list_entry(
    State(state): State<AppState>,
    Path(ip): Path<String>,
    Query(query): Query<RemoveIpListEntryQuery>,
) -> Result<StatusCode, (StatusCode, Json<AdminError>)> {
    state
        .ip_list
        .remove(&*state.kv, &*state.records, &ip, query.kind)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|err| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AdminError { error: err.to_string() }),
            )
        })
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_security_events: u64,
    pub total_blocked: u64,
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, (StatusCode, Json<AdminError>)> {
    let total_security_events = state.records.total_security_event_count().await.map_err(|err| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AdminError { error: err.to_string() }),
        )
    })?;
    let total_blocked = state.records.total_blocked_count().await.map_err(|err| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AdminError { error: err.to_string() }),
        )
    })?;
    Ok(Json(StatsResponse {
        total_security_events,
        total_blocked,
    }))
}
