use std::thread;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use shared::types::ServiceEndpoint;
use crate::store::{db::EndpointDb, EndpointStore, UpsertOutcome};

/// Commands sent to the store thread
pub enum StoreCommand {
    Get(String, oneshot::Sender<Result<Option<ServiceEndpoint>>>),
    Upsert(ServiceEndpoint, oneshot::Sender<Result<UpsertOutcome>>),
    Reset(String, oneshot::Sender<Result<bool>>),
    ResetIfUnchanged {
        id: String,
        observed: DateTime<Utc>,
        reply: oneshot::Sender<Result<bool>>,
    },
    List(oneshot::Sender<Result<Vec<ServiceEndpoint>>>),
    Shutdown,
}

/// Handle to the thread that owns the database connection.
/// Commands are applied one at a time, so each is atomic per record.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Spawn a new store thread with the given database
    pub fn spawn(db: EndpointDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::Get(id, reply) => {
                        let _ = reply.send(db.get_endpoint(&id));
                    }
                    StoreCommand::Upsert(endpoint, reply) => {
                        let _ = reply.send(db.upsert_endpoint(&endpoint));
                    }
                    StoreCommand::Reset(id, reply) => {
                        let _ = reply.send(db.reset_endpoint(&id));
                    }
                    StoreCommand::ResetIfUnchanged { id, observed, reply } => {
                        let _ = reply.send(db.reset_endpoint_if_unchanged(&id, observed));
                    }
                    StoreCommand::List(reply) => {
                        let _ = reply.send(db.get_all_endpoints());
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> StoreCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| anyhow::anyhow!("Store thread is not running"))?;
        rx.await.context("Store thread dropped the request")?
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| anyhow::anyhow!("Store thread is not running"))?;
        Ok(())
    }
}

#[async_trait]
impl EndpointStore for StoreHandle {
    async fn get(&self, id: &str) -> Result<Option<ServiceEndpoint>> {
        let id = id.to_string();
        self.request(|reply| StoreCommand::Get(id, reply)).await
    }

    async fn upsert(&self, endpoint: ServiceEndpoint) -> Result<UpsertOutcome> {
        self.request(|reply| StoreCommand::Upsert(endpoint, reply)).await
    }

    async fn reset(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.request(|reply| StoreCommand::Reset(id, reply)).await
    }

    async fn reset_if_unchanged(&self, id: &str, observed: DateTime<Utc>) -> Result<bool> {
        let id = id.to_string();
        self.request(|reply| StoreCommand::ResetIfUnchanged { id, observed, reply }).await
    }

    async fn list(&self) -> Result<Vec<ServiceEndpoint>> {
        self.request(StoreCommand::List).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_round_trips_through_thread() {
        let store = StoreHandle::spawn(EndpointDb::open(":memory:").unwrap());
        let endpoint = ServiceEndpoint::active("loc1", "203.0.113.5", 5000, Utc::now());

        assert_eq!(store.upsert(endpoint.clone()).await.unwrap(), UpsertOutcome::Created);
        assert_eq!(store.get("loc1").await.unwrap(), Some(endpoint.clone()));
        assert_eq!(store.list().await.unwrap(), vec![endpoint]);

        assert!(store.reset("loc1").await.unwrap());
        assert!(store.get("loc1").await.unwrap().unwrap().is_reset());
    }

    #[tokio::test]
    async fn test_requests_fail_after_shutdown() {
        let store = StoreHandle::spawn(EndpointDb::open(":memory:").unwrap());
        store.shutdown().await.unwrap();

        // Queued behind the shutdown, so the reply is dropped with the receiver.
        assert!(store.get("loc1").await.is_err());
    }
}
