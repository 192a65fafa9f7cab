use chrono::{DateTime, Duration, Utc};
use shared::types::{EndpointStatus, ServiceEndpoint};

/// Whether a registration can still be handed to consumers.
///
/// Fresh means active and registered no longer than `max_age` before `now`.
/// Stale records are reported unavailable even before the prober resets them.
pub fn is_fresh(endpoint: &ServiceEndpoint, now: DateTime<Utc>, max_age: Duration) -> bool {
    endpoint.status == EndpointStatus::Active && now - endpoint.last_updated <= max_age
}
