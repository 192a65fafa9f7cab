use axum::{routing::get, Router};
use shared::protocol::PROBE_SENTINEL;

/// Answers registry probes so this host stays marked reachable.
pub fn router() -> Router {
    Router::new().route("/", get(answer).post(answer))
}

async fn answer() -> &'static str {
    PROBE_SENTINEL
}
