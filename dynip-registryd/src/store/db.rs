use std::path::Path;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params, OptionalExtension};
use shared::protocol::{DEFAULT_PORT, UNREACHABLE_ADDRESS};
use shared::types::{EndpointStatus, ServiceEndpoint};
use crate::store::UpsertOutcome;

pub struct EndpointDb {
    conn: Connection,
}

impl EndpointDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS endpoints (
                id           TEXT PRIMARY KEY,
                address      TEXT NOT NULL,
                port         INTEGER NOT NULL,
                status       INTEGER NOT NULL DEFAULT 0,
                last_updated TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Create or update the record for `endpoint.id` and report what changed.
    pub fn upsert_endpoint(&self, endpoint: &ServiceEndpoint) -> Result<UpsertOutcome> {
        let existing = self
            .get_endpoint(&endpoint.id)
            .context("Failed to query existing endpoint")?;

        let outcome = match &existing {
            None => UpsertOutcome::Created,
            Some(old) if endpoint_moved(old, endpoint) => UpsertOutcome::Moved,
            Some(_) => UpsertOutcome::Refreshed,
        };

        self.conn.execute(
            r#"
            INSERT INTO endpoints (id, address, port, status, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                address = excluded.address,
                port = excluded.port,
                status = excluded.status,
                last_updated = excluded.last_updated
            "#,
            params![
                &endpoint.id,
                &endpoint.address,
                endpoint.port,
                status_to_int(endpoint.status),
                endpoint.last_updated.to_rfc3339(),
            ],
        )
        .context("Failed to upsert endpoint")?;

        Ok(outcome)
    }

    /// Point an endpoint at the unreachable sentinel and mark it inactive.
    /// Returns false when no record exists for `id`.
    pub fn reset_endpoint(&self, id: &str) -> Result<bool> {
        let count = self.conn.execute(
            "UPDATE endpoints SET address = ?1, port = ?2, status = 0 WHERE id = ?3",
            params![UNREACHABLE_ADDRESS, DEFAULT_PORT, id],
        )
        .context("Failed to reset endpoint")?;

        Ok(count > 0)
    }

    /// Reset only if the endpoint is still active and has not been
    /// re-registered since `observed` was read.
    pub fn reset_endpoint_if_unchanged(&self, id: &str, observed: DateTime<Utc>) -> Result<bool> {
        let count = self.conn.execute(
            "UPDATE endpoints SET address = ?1, port = ?2, status = 0
             WHERE id = ?3 AND status = 1 AND last_updated = ?4",
            params![UNREACHABLE_ADDRESS, DEFAULT_PORT, id, observed.to_rfc3339()],
        )
        .context("Failed to conditionally reset endpoint")?;

        Ok(count > 0)
    }

    /// Get a single endpoint by service id
    pub fn get_endpoint(&self, id: &str) -> Result<Option<ServiceEndpoint>> {
        let result = self
            .conn
            .query_row(
                "SELECT id, address, port, status, last_updated
                 FROM endpoints WHERE id = ?1",
                params![id],
                Self::row_to_endpoint,
            )
            .optional()
            .context("Failed to query endpoint")?;

        Ok(result)
    }

    /// Get all endpoints, ordered by id
    pub fn get_all_endpoints(&self) -> Result<Vec<ServiceEndpoint>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, address, port, status, last_updated
                 FROM endpoints ORDER BY id"
            )
            .context("Failed to prepare query")?;

        let endpoints = stmt
            .query_map([], Self::row_to_endpoint)
            .context("Failed to query endpoints")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect endpoints")?;

        Ok(endpoints)
    }

    fn row_to_endpoint(row: &rusqlite::Row) -> Result<ServiceEndpoint, rusqlite::Error> {
        let status_int: i32 = row.get(3)?;
        let last_updated_str: String = row.get(4)?;

        let last_updated = DateTime::parse_from_rfc3339(&last_updated_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?
            .with_timezone(&Utc);

        Ok(ServiceEndpoint {
            id: row.get(0)?,
            address: row.get(1)?,
            port: row.get::<_, u16>(2)?,
            status: if status_int != 0 { EndpointStatus::Active } else { EndpointStatus::Inactive },
            last_updated,
        })
    }
}

fn status_to_int(status: EndpointStatus) -> i32 {
    match status {
        EndpointStatus::Active => 1,
        EndpointStatus::Inactive => 0,
    }
}

/// Anything other than the timestamp counts as a move.
fn endpoint_moved(old: &ServiceEndpoint, new: &ServiceEndpoint) -> bool {
    old.address != new.address
        || old.port != new.port
        || old.status != new.status
}
