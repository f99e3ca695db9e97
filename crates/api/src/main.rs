//! WAF admin/verification HTTP surface (C19): boots an axum server exposing
//! the challenge verification endpoints and the IP-list admin CRUD,
//! following the teacher's `axum::serve`-over-`TcpListener` bootstrap
//! pattern (`security_api/crates/api/src/main.rs`), generalized from a
//! single `/api/analyze` route to this crate's router.

mod admin_routes;
mod challenge_routes;
mod client_ip;
mod state;

use std::net::SocketAddr;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use waf_common::config::Config;

use state::AppState;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(detail) => {
            tracing::error!(%detail, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let bind_addr: SocketAddr = match config.bind_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            tracing::error!(bind_addr = %config.bind_addr, error = %err, "invalid bind address");
            std::process::exit(1);
        }
    };

    let state = AppState::new(config);

    let app = Router::new()
        .route("/health", get(admin_routes::health))
        .route("/challenges/verify-pow", post(challenge_routes::verify_pow))
        .route("/challenges/verify-cookie", post(challenge_routes::verify_cookie))
        .route("/challenges/verify-tarpit", post(challenge_routes::verify_tarpit))
        .route(
            "/challenges/verify-encrypted-cookie",
            post(challenge_routes::verify_encrypted_cookie),
        )
        .route("/admin/ip-list", post(admin_routes::add_ip_list_entry))
        .route("/admin/ip-list/:ip", delete(admin_routes::remove_ip_list_entry))
        .route("/admin/stats", get(admin_routes::stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(bind_addr = %bind_addr, error = %err, "failed to bind listener");
            std::process::exit(1);
        }
    };

    tracing::info!(%bind_addr, "waf-api listening");

    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!(error = %err, "server exited with an error");
    }
}
