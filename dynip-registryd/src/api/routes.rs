use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::Utc;
use shared::protocol::{
    API_PREFIX, FORM_CODE, FORM_PORT, HEADER_FORWARDED_FOR, HEADER_FORWARDED_PROTO, PROBE_SENTINEL,
};
use shared::types::ServiceEndpoint;
use crate::error::{RegistrationError, ResolveError};
use crate::registrar::{Announcement, Forwarding, Registrar};
use crate::resolver::StatusResolver;
use crate::store::EndpointStore;

const REGISTERED: &str = "200 - OK";
const FORBIDDEN: &str = "403 - Forbidden";
const STORE_FAILED: &str = "500 - Internal Server Error : failed to query storage";
const NOT_AVAILABLE: &str = "Service is not available";

#[derive(Clone)]
pub struct AppState {
    pub registrar: Arc<Registrar>,
    pub resolver: Arc<StatusResolver>,
    pub store: Arc<dyn EndpointStore>,
    /// Service id for the routes without one
    pub default_service: Arc<str>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(&format!("{API_PREFIX}/register"), post(register_default))
        .route(&format!("{API_PREFIX}/register/:id"), post(register_service))
        .route(&format!("{API_PREFIX}/status"), get(status_default).post(status_default))
        .route(&format!("{API_PREFIX}/status/:id"), get(status_service).post(status_service))
        .route(&format!("{API_PREFIX}/endpoints"), get(list_endpoints))
        .route(&format!("{API_PREFIX}/health"), get(health))
        .with_state(state)
}

async fn register_default(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    form: Option<Form<HashMap<String, String>>>,
) -> (StatusCode, &'static str) {
    let service_id = state.default_service.to_string();
    register(&state, service_id, peer, &headers, form).await
}

async fn register_service(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    form: Option<Form<HashMap<String, String>>>,
) -> (StatusCode, &'static str) {
    register(&state, service_id, peer, &headers, form).await
}

async fn register(
    state: &AppState,
    service_id: String,
    peer: SocketAddr,
    headers: &HeaderMap,
    form: Option<Form<HashMap<String, String>>>,
) -> (StatusCode, &'static str) {
    // A missing or unparsable form reads as no fields at all.
    let mut fields = form.map(|Form(fields)| fields).unwrap_or_default();

    let announcement = Announcement {
        service_id,
        secret: fields.remove(FORM_CODE),
        source_address: peer.ip().to_canonical().to_string(),
        source_port: peer.port(),
        forwarding: Forwarding {
            forwarded_for: header_value(headers, HEADER_FORWARDED_FOR),
            forwarded_proto: header_value(headers, HEADER_FORWARDED_PROTO),
        },
        requested_port: fields.remove(FORM_PORT),
    };

    match state.registrar.register(announcement, Utc::now()).await {
        Ok(_) => (StatusCode::OK, REGISTERED),
        Err(RegistrationError::Unauthorized) => (StatusCode::FORBIDDEN, FORBIDDEN),
        Err(RegistrationError::StoreUnavailable(_)) => (StatusCode::INTERNAL_SERVER_ERROR, STORE_FAILED),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn status_default(State(state): State<AppState>) -> (StatusCode, String) {
    let service_id = state.default_service.clone();
    status(&state, &service_id).await
}

async fn status_service(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> (StatusCode, String) {
    status(&state, &service_id).await
}

async fn status(state: &AppState, service_id: &str) -> (StatusCode, String) {
    match state.resolver.resolve(service_id, Utc::now()).await {
        Ok(endpoint) => (StatusCode::OK, endpoint.to_string()),
        Err(ResolveError::NotAvailable | ResolveError::StoreUnavailable(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, NOT_AVAILABLE.to_string())
        }
    }
}

async fn list_endpoints(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServiceEndpoint>>, StatusCode> {
    state
        .store
        .list()
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to list endpoints: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn health() -> &'static str {
    PROBE_SENTINEL
}
