use std::sync::Arc;
use chrono::{DateTime, Utc};
use shared::protocol::{DEFAULT_PORT, TLS_PORT};
use shared::types::ServiceEndpoint;
use crate::error::RegistrationError;
use crate::store::{EndpointStore, UpsertOutcome};

/// Proxy headers seen on an announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forwarding {
    /// Raw `X-Forwarded-For` value
    pub forwarded_for: Option<String>,
    /// Raw `X-Forwarded-Proto` value
    pub forwarded_proto: Option<String>,
}

/// A service announcing where it can currently be reached.
#[derive(Debug, Clone)]
pub struct Announcement {
    pub service_id: String,
    pub secret: Option<String>,
    /// Transport-level peer address
    pub source_address: String,
    /// Transport-level peer port
    pub source_port: u16,
    pub forwarding: Forwarding,
    /// Raw `port` form field, if the client sent one
    pub requested_port: Option<String>,
}

/// Acknowledgement of a recorded announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub endpoint: ServiceEndpoint,
    pub outcome: UpsertOutcome,
}

pub struct Registrar {
    store: Arc<dyn EndpointStore>,
    secret: String,
}

impl Registrar {
    pub fn new(store: Arc<dyn EndpointStore>, secret: impl Into<String>) -> Self {
        Self {
            store,
            secret: secret.into(),
        }
    }

    /// Verify the announcement and record its origin as the active endpoint.
    pub async fn register(
        &self,
        announcement: Announcement,
        now: DateTime<Utc>,
    ) -> Result<Ack, RegistrationError> {
        let presented = announcement.secret.as_deref().unwrap_or_default();
        if !constant_time_eq(presented.as_bytes(), self.secret.as_bytes()) {
            tracing::warn!(
                "Rejected announcement for {} from {}: invalid code",
                announcement.service_id,
                announcement.source_address
            );
            return Err(RegistrationError::Unauthorized);
        }

        let (address, port) = derive_origin(&announcement);
        let endpoint = ServiceEndpoint::active(&announcement.service_id, address, port, now);

        let outcome = self
            .store
            .upsert(endpoint.clone())
            .await
            .map_err(|e| {
                tracing::error!("Failed to record endpoint for {}: {:#}", endpoint.id, e);
                RegistrationError::StoreUnavailable(e)
            })?;

        match outcome {
            UpsertOutcome::Created | UpsertOutcome::Moved => tracing::info!(
                "{} registered at {}:{} ({:?})",
                endpoint.id,
                endpoint.address,
                endpoint.port,
                outcome
            ),
            UpsertOutcome::Refreshed => tracing::debug!(
                "{} refreshed at {}:{}",
                endpoint.id,
                endpoint.address,
                endpoint.port
            ),
        }

        Ok(Ack { endpoint, outcome })
    }
}

/// Work out which address and port the announcing service is reachable at.
///
/// Forwarding headers from a reverse proxy take precedence over the
/// transport peer. A forwarded scheme pins the port to 443 or 80; otherwise
/// the requested port is used, then the peer port.
pub fn derive_origin(announcement: &Announcement) -> (String, u16) {
    let forwarded_address = announcement
        .forwarding
        .forwarded_for
        .as_deref()
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|addr| !addr.is_empty());

    let address = forwarded_address
        .unwrap_or(&announcement.source_address)
        .to_string();

    let forwarded_proto = announcement
        .forwarding
        .forwarded_proto
        .as_deref()
        .map(str::trim)
        .filter(|proto| !proto.is_empty());

    let port = match (forwarded_proto, announcement.requested_port.as_deref()) {
        (Some(proto), _) if proto.eq_ignore_ascii_case("https") => TLS_PORT,
        (Some(_), _) => DEFAULT_PORT,
        (None, Some(requested)) => validate_port(requested).unwrap_or_else(|| {
            tracing::debug!("Ignoring invalid requested port {:?}", requested);
            DEFAULT_PORT
        }),
        (None, None) => announcement.source_port,
    };

    (address, port)
}

/// Parse a decimal port in 1..=65535.
///
/// Accepts surrounding whitespace and an explicit sign; rejects leading
/// zeros, fractions and anything out of range.
pub fn validate_port(raw: &str) -> Option<u16> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix('+')
        .or_else(|| trimmed.strip_prefix('-'))
        .unwrap_or(trimmed);

    if digits.is_empty()
        || !digits.bytes().all(|b| b.is_ascii_digit())
        || (digits.len() > 1 && digits.starts_with('0'))
    {
        return None;
    }

    let value: i64 = trimmed.parse().ok()?;
    u16::try_from(value).ok().filter(|port| *port >= 1)
}

// Out of line so the optimizer cannot short-circuit the comparison.
#[inline(never)]
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
