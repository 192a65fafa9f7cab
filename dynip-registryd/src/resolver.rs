use std::fmt;
use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use crate::error::ResolveError;
use crate::freshness::is_fresh;
use crate::store::EndpointStore;

/// Where a consumer should connect right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for ResolvedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Answers status queries from the stored record, gated on freshness.
/// Read-only: a stale record is reported unavailable but left in place.
pub struct StatusResolver {
    store: Arc<dyn EndpointStore>,
    max_age: Duration,
}

impl StatusResolver {
    pub fn new(store: Arc<dyn EndpointStore>, max_age: Duration) -> Self {
        Self { store, max_age }
    }

    pub async fn resolve(
        &self,
        service_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedEndpoint, ResolveError> {
        let endpoint = self
            .store
            .get(service_id)
            .await
            .map_err(|e| {
                tracing::error!("Failed to read endpoint for {}: {:#}", service_id, e);
                ResolveError::StoreUnavailable(e)
            })?;

        match endpoint {
            Some(endpoint) if is_fresh(&endpoint, now, self.max_age) => Ok(ResolvedEndpoint {
                address: endpoint.address,
                port: endpoint.port,
            }),
            Some(endpoint) => {
                tracing::debug!(
                    "{} not available: {:?}, last registered {}",
                    service_id,
                    endpoint.status,
                    endpoint.last_updated
                );
                Err(ResolveError::NotAvailable)
            }
            None => {
                tracing::debug!("{} not available: never registered", service_id);
                Err(ResolveError::NotAvailable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::db::EndpointDb;
    use crate::store::testing::FaultyStore;
    use crate::store_manager::StoreHandle;
    use shared::types::ServiceEndpoint;

    fn memory_store() -> Arc<StoreHandle> {
        Arc::new(StoreHandle::spawn(EndpointDb::open(":memory:").unwrap()))
    }

    #[tokio::test]
    async fn test_unknown_service_not_available() {
        let resolver = StatusResolver::new(memory_store(), Duration::seconds(60));
        let result = resolver.resolve("loc1", Utc::now()).await;
        assert!(matches!(result, Err(ResolveError::NotAvailable)));
    }

    #[tokio::test]
    async fn test_fresh_then_stale() {
        let store = memory_store();
        let registered = Utc::now();
        store
            .upsert(ServiceEndpoint::active("loc1", "203.0.113.5", 5000, registered))
            .await
            .unwrap();

        let resolver = StatusResolver::new(store.clone(), Duration::seconds(60));

        let resolved = resolver
            .resolve("loc1", registered + Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(resolved.to_string(), "203.0.113.5:5000");

        let result = resolver.resolve("loc1", registered + Duration::seconds(90)).await;
        assert!(matches!(result, Err(ResolveError::NotAvailable)));

        // Stale reads are not persisted.
        let stored = store.get("loc1").await.unwrap().unwrap();
        assert!(stored.status.is_active());
    }

    #[tokio::test]
    async fn test_reset_endpoint_not_available() {
        let store = memory_store();
        let now = Utc::now();
        store
            .upsert(ServiceEndpoint::active("loc1", "203.0.113.5", 5000, now))
            .await
            .unwrap();
        store.reset("loc1").await.unwrap();

        let resolver = StatusResolver::new(store, Duration::seconds(60));
        let result = resolver.resolve("loc1", now).await;
        assert!(matches!(result, Err(ResolveError::NotAvailable)));
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let resolver = StatusResolver::new(Arc::new(FaultyStore::unavailable()), Duration::seconds(60));
        let result = resolver.resolve("loc1", Utc::now()).await;
        assert!(matches!(result, Err(ResolveError::StoreUnavailable(_))));
    }
}
