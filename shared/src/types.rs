use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::protocol::{DEFAULT_PORT, UNREACHABLE_ADDRESS};

/// Liveness state of a registered endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Active,
    Inactive,
}

impl EndpointStatus {
    pub fn is_active(self) -> bool {
        matches!(self, EndpointStatus::Active)
    }
}

/// The last-known address of a dynamically addressed service.
/// One record exists per service id once it has registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Stable service id, e.g. "loc1"
    pub id: String,

    /// Host the service was last seen at (IP or hostname)
    pub address: String,

    /// Port the service was last seen at
    pub port: u16,

    pub status: EndpointStatus,

    /// Time of the most recent successful registration
    pub last_updated: DateTime<Utc>,
}

impl ServiceEndpoint {
    /// A freshly registered endpoint.
    pub fn active(
        id: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            status: EndpointStatus::Active,
            last_updated: now,
        }
    }

    /// True when this record points at the unreachable sentinel.
    pub fn is_reset(&self) -> bool {
        self.status == EndpointStatus::Inactive
            && self.address == UNREACHABLE_ADDRESS
            && self.port == DEFAULT_PORT
    }
}
