use std::collections::HashSet;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::types::ServiceEndpoint;
use super::db::EndpointDb;
use super::{EndpointStore, UpsertOutcome};
use crate::store_manager::StoreHandle;

/// In-memory store that can be told to fail selected calls.
pub struct FaultyStore {
    inner: StoreHandle,
    down: bool,
    unreadable: HashSet<String>,
    reset_fails: bool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: StoreHandle::spawn(EndpointDb::open(":memory:").unwrap()),
            down: false,
            unreadable: HashSet::new(),
            reset_fails: false,
        }
    }

    /// Every call fails.
    pub fn unavailable() -> Self {
        Self { down: true, ..Self::new() }
    }

    /// `get` fails for this id only.
    pub fn failing_get(mut self, id: &str) -> Self {
        self.unreadable.insert(id.to_string());
        self
    }

    /// Both reset calls fail.
    pub fn failing_reset(mut self) -> Self {
        self.reset_fails = true;
        self
    }

    /// The working store underneath, for seeding and inspection.
    pub fn inner(&self) -> &StoreHandle {
        &self.inner
    }
}

#[async_trait]
impl EndpointStore for FaultyStore {
    async fn get(&self, id: &str) -> Result<Option<ServiceEndpoint>> {
        if self.down || self.unreadable.contains(id) {
            bail!("database is locked");
        }
        self.inner.get(id).await
    }

    async fn upsert(&self, endpoint: ServiceEndpoint) -> Result<UpsertOutcome> {
        if self.down {
            bail!("database is locked");
        }
        self.inner.upsert(endpoint).await
    }

    async fn reset(&self, id: &str) -> Result<bool> {
        if self.down || self.reset_fails {
            bail!("database is locked");
        }
        self.inner.reset(id).await
    }

    async fn reset_if_unchanged(&self, id: &str, observed: DateTime<Utc>) -> Result<bool> {
        if self.down || self.reset_fails {
            bail!("database is locked");
        }
        self.inner.reset_if_unchanged(id, observed).await
    }

    async fn list(&self) -> Result<Vec<ServiceEndpoint>> {
        if self.down {
            bail!("database is locked");
        }
        self.inner.list().await
    }
}
