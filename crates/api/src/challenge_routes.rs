//! Verification endpoints for the challenge ladder (C19): one handler per
//! challenge kind, each a thin wrapper over `ChallengeSystem`'s verify
//! methods. Challenge verification is always fail-closed (§7): a
//! `WafError` from the verify call is treated the same as an explicit
//! `false`, never surfaced as a 5xx.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use waf_common::error::WafError;
use waf_common::model::ChallengeKind;

use crate::client_ip::derive as derive_client_ip;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub verified: bool,
    pub message: String,
}

impl VerifyResponse {
    fn ok(verified: bool) -> Self {
        let message = if verified {
            "challenge verified".to_string()
        } else {
            "challenge verification failed".to_string()
        };
        Self { verified, message }
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyPowRequest {
    pub token: String,
    pub nonce: String,
    pub ip_address: String,
}

pub async fn verify_pow(State(state): State<AppState>, Json(body): Json<VerifyPowRequest>) -> Json<VerifyResponse> {
    let result = state.challenges.verify_pow(&*state.kv, &body.ip_address, &body.token, &body.nonce).await;
    let verified = fail_closed(result, "pow");
    if !verified {
        record_bypass(&state, &body.ip_address, ChallengeKind::Pow).await;
    }
    Json(VerifyResponse::ok(verified))
}

#[derive(Debug, Deserialize)]
pub struct VerifyCookieRequest {
    pub token: String,
    pub ip_address: String,
}

pub async fn verify_cookie(
    State(state): State<AppState>,
    Json(body): Json<VerifyCookieRequest>,
) -> Json<VerifyResponse> {
    let result = state.challenges.verify_cookie(&*state.kv, &body.ip_address, &body.token).await;
    let verified = fail_closed(result, "cookie");
    if !verified {
        record_bypass(&state, &body.ip_address, ChallengeKind::Cookie).await;
    }
    Json(VerifyResponse::ok(verified))
}

#[derive(Debug, Deserialize)]
pub struct VerifyTarpitRequest {
    pub token: String,
    pub solution: String,
    pub solve_time: u64,
}

pub async fn verify_tarpit(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<VerifyTarpitRequest>,
) -> Json<VerifyResponse> {
    let ip = derive_client_ip(&headers, remote);
    let result = state
        .challenges
        .verify_tarpit(&*state.kv, &ip, &body.token, &body.solution, body.solve_time)
        .await;
    let verified = fail_closed(result, "tarpit");
    if !verified {
        record_bypass(&state, &ip, ChallengeKind::Tarpit).await;
    }
    Json(VerifyResponse::ok(verified))
}

#[derive(Debug, Deserialize)]
pub struct VerifyEncryptedCookieRequest {
    pub token: String,
    pub encrypted_data: String,
}

pub async fn verify_encrypted_cookie(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<VerifyEncryptedCookieRequest>,
) -> Json<VerifyResponse> {
    let ip = derive_client_ip(&headers, remote);
    let result = state.challenges.verify_encrypted_cookie(&*state.kv, &ip, &body.encrypted_data).await;
    let verified = fail_closed(result, "encrypted_cookie");
    if !verified {
        record_bypass(&state, &ip, ChallengeKind::EncryptedCookie).await;
    }
    Json(VerifyResponse::ok(verified))
}

fn fail_closed(result: Result<bool, WafError>, kind: &str) -> bool {
    match result {
        Ok(verified) => verified,
        Err(err) => {
            tracing::warn!(challenge_kind = kind, error = %err, "verification errored, failing closed");
            false
        }
    }
}

async fn record_bypass(state: &AppState, ip: &str, kind: ChallengeKind) {
    if let Err(err) = state.challenges.record_bypass(&*state.kv, ip, kind, None).await {
        tracing::warn!(ip, error = %err, "failed to record challenge bypass");
    }
}
