pub mod db;
#[cfg(test)]
pub mod testing;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::types::ServiceEndpoint;

/// What an upsert did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First registration for this id
    Created,
    /// Address, port or status changed
    Moved,
    /// Only the timestamp advanced
    Refreshed,
}

/// Keyed endpoint storage shared by the registrar, resolver and prober.
///
/// Implementations must apply each call atomically per service id.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<ServiceEndpoint>>;

    async fn upsert(&self, endpoint: ServiceEndpoint) -> Result<UpsertOutcome>;

    async fn reset(&self, id: &str) -> Result<bool>;

    async fn reset_if_unchanged(&self, id: &str, observed: DateTime<Utc>) -> Result<bool>;

    async fn list(&self) -> Result<Vec<ServiceEndpoint>>;
}
