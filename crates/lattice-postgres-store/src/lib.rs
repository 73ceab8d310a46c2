// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `PostgreSQL` event publication store for Lattice
//!
//! Persists publications in the relational reference schema with a
//! hash-friendly `(listener_id, serialized_event)` index and a
//! `completion_date` index for incomplete-publication scans.
//!
//! # Example
//!
//! ```rust,ignore
//! use lattice::{EventMulticaster, PublicationRegistry};
//! use lattice_postgres_store::PostgresEventPublicationStore;
//! use std::sync::Arc;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection_string = "host=localhost user=postgres password=postgres dbname=lattice";
//!     let store = PostgresEventPublicationStore::new(connection_string).await?;
//!     let registry = Arc::new(PublicationRegistry::new(Arc::new(store)));
//!     let multicaster = EventMulticaster::new(registry);
//!     // ... register listeners, publish events ...
//!     Ok(())
//! }
//! ```
//!
//! # See Also
//!
//! - [`lattice::EventPublicationStore`] - The trait this implements
//! - [`lattice-mongodb-store`](https://docs.rs/lattice-mongodb-store) - Alternative: document-store persistence

mod error;

pub use error::Error as PostgresStoreError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lattice::{
    EventPublication, EventPublicationStore, PublicationStatus, PublicationTargetIdentifier,
    Result as LatticeResult,
};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Longest unquoted identifier PostgreSQL accepts.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Checks a table name before it is spliced into SQL.
///
/// Only the unquoted-identifier alphabet passes: underscores, ASCII
/// letters anywhere, ASCII digits after the first character. Everything
/// else is rejected so a caller-supplied name can never smuggle SQL.
fn validate_identifier(name: &str) -> Result<(), PostgresStoreError> {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return Err(PostgresStoreError::InvalidIdentifier(format!(
            "table name must be between 1 and {} characters, got {}",
            MAX_IDENTIFIER_LEN,
            name.len()
        )));
    }

    match name.chars().enumerate().find(|(position, c)| {
        !(*c == '_' || c.is_ascii_alphabetic() || (*position > 0 && c.is_ascii_digit()))
    }) {
        Some((position, c)) => Err(PostgresStoreError::InvalidIdentifier(format!(
            "table name '{}' has illegal character '{}' at position {}",
            name, c, position
        ))),
        None => Ok(()),
    }
}

fn status_to_str(status: PublicationStatus) -> &'static str {
    match status {
        PublicationStatus::Published => "PUBLISHED",
        PublicationStatus::Processing => "PROCESSING",
        PublicationStatus::Completed => "COMPLETED",
        PublicationStatus::Failed => "FAILED",
        PublicationStatus::Resubmitted => "RESUBMITTED",
    }
}

fn status_from_str(value: &str) -> Result<PublicationStatus, PostgresStoreError> {
    match value {
        "PUBLISHED" => Ok(PublicationStatus::Published),
        "PROCESSING" => Ok(PublicationStatus::Processing),
        "COMPLETED" => Ok(PublicationStatus::Completed),
        "FAILED" => Ok(PublicationStatus::Failed),
        "RESUBMITTED" => Ok(PublicationStatus::Resubmitted),
        other => Err(PostgresStoreError::UnknownStatus(other.to_string())),
    }
}

/// PostgreSQL-backed event publication store
///
/// Stores publications in a table with the following schema:
/// - `id` (UUID PRIMARY KEY)
/// - `listener_id` (TEXT, part of the lookup index)
/// - `event_type` (TEXT)
/// - `serialized_event` (TEXT, part of the lookup index)
/// - `publication_date` (TIMESTAMPTZ)
/// - `sequence` (BIGINT, insertion order tie-break)
/// - `completion_date` (TIMESTAMPTZ, NULL while incomplete; indexed)
/// - `status` (TEXT)
/// - `completion_attempts` (INT)
/// - `last_resubmission_date` (TIMESTAMPTZ)
pub struct PostgresEventPublicationStore {
    client: tokio::sync::Mutex<Client>,
    table_name: String,
}

const COLUMNS: &str = "id, listener_id, event_type, serialized_event, publication_date, \
                       sequence, completion_date, status, completion_attempts, \
                       last_resubmission_date";

impl PostgresEventPublicationStore {
    /// Create a new `PostgreSQL` publication store
    ///
    /// # Arguments
    /// * `connection_string` - `PostgreSQL` connection string (e.g., "host=localhost user=postgres password=postgres dbname=lattice")
    ///
    /// # Errors
    /// Returns error if connection fails or table creation fails
    pub async fn new(connection_string: &str) -> Result<Self, PostgresStoreError> {
        Self::with_table_name(connection_string, "event_publication").await
    }

    /// Create a new `PostgreSQL` publication store with a custom table name
    ///
    /// # Errors
    /// Returns `InvalidIdentifier` if `table_name` is not a valid SQL
    /// identifier (prevents SQL injection through the table name).
    pub async fn with_table_name(
        connection_string: &str,
        table_name: &str,
    ) -> Result<Self, PostgresStoreError> {
        validate_identifier(table_name)?;

        info!("Connecting to PostgreSQL");
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .map_err(|e| {
                error!("Failed to connect to PostgreSQL: {}", e);
                PostgresStoreError::Connection(e.to_string())
            })?;

        // Spawn connection task
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        let store = Self {
            client: tokio::sync::Mutex::new(client),
            table_name: table_name.to_string(),
        };

        store.initialize_schema().await?;
        Ok(store)
    }

    /// Initialize the database schema
    async fn initialize_schema(&self) -> Result<(), PostgresStoreError> {
        let create_table_sql = format!(
            r"
            CREATE TABLE IF NOT EXISTS {t} (
                id UUID PRIMARY KEY,
                listener_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                serialized_event TEXT NOT NULL,
                publication_date TIMESTAMP WITH TIME ZONE NOT NULL,
                sequence BIGINT NOT NULL DEFAULT 0,
                completion_date TIMESTAMP WITH TIME ZONE NULL,
                status TEXT NULL,
                completion_attempts INT NULL,
                last_resubmission_date TIMESTAMP WITH TIME ZONE NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{t}_listener_event ON {t} (listener_id, serialized_event);
            CREATE INDEX IF NOT EXISTS idx_{t}_completion_date ON {t} (completion_date);
            ",
            t = self.table_name
        );

        self.client
            .lock()
            .await
            .batch_execute(&create_table_sql)
            .await
            .map_err(|e| {
                error!("Failed to create table: {}", e);
                PostgresStoreError::Query(e.to_string())
            })?;

        debug!("PostgreSQL schema initialized: table={}", self.table_name);
        Ok(())
    }

    fn publication_from_row(row: &Row) -> Result<EventPublication, PostgresStoreError> {
        let id: Uuid = row.get(0);
        let listener_id: String = row.get(1);
        let event_type: String = row.get(2);
        let serialized_event: String = row.get(3);
        let publication_date: DateTime<Utc> = row.get(4);
        let sequence: i64 = row.get(5);
        let completion_date: Option<DateTime<Utc>> = row.get(6);
        let status: Option<String> = row.get(7);
        let completion_attempts: Option<i32> = row.get(8);
        let last_resubmission_date: Option<DateTime<Utc>> = row.get(9);

        let status = match status {
            Some(value) => status_from_str(&value)?,
            None => PublicationStatus::Published,
        };
        let target = PublicationTargetIdentifier::of(listener_id)
            .map_err(|e| PostgresStoreError::Query(e.to_string()))?;

        Ok(EventPublication::from_parts(
            id,
            event_type,
            serialized_event,
            target,
            publication_date,
            sequence as u64,
            status,
            completion_date,
            completion_attempts.unwrap_or(0) as u32,
            last_resubmission_date,
        ))
    }

    async fn query_publications(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<EventPublication>, PostgresStoreError> {
        let rows = self.client.lock().await.query(sql, params).await?;
        rows.iter().map(Self::publication_from_row).collect()
    }

    async fn require_row(&self, id: Uuid, updated: u64) -> Result<(), PostgresStoreError> {
        if updated > 0 {
            return Ok(());
        }
        let sql = format!("SELECT 1 FROM {} WHERE id = $1", self.table_name);
        let exists = self.client.lock().await.query_opt(&sql, &[&id]).await?;
        if exists.is_none() {
            return Err(PostgresStoreError::NotFound(id.to_string()));
        }
        // The row exists but was in a state the update skips (already
        // completed, for instance); that is a no-op, not an error.
        Ok(())
    }
}

#[async_trait]
impl EventPublicationStore for PostgresEventPublicationStore {
    async fn create_all(&self, publications: &[EventPublication]) -> LatticeResult<()> {
        let mut client = self.client.lock().await;
        let transaction = client
            .transaction()
            .await
            .map_err(PostgresStoreError::from)?;

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            self.table_name, COLUMNS
        );
        for publication in publications {
            transaction
                .execute(
                    &sql,
                    &[
                        &publication.id(),
                        &publication.target().as_str(),
                        &publication.event_type(),
                        &publication.serialized_event(),
                        &publication.published_at(),
                        &(publication.sequence() as i64),
                        &publication.completed_at(),
                        &status_to_str(publication.status()),
                        &(publication.completion_attempts() as i32),
                        &publication.last_resubmission_at(),
                    ],
                )
                .await
                .map_err(PostgresStoreError::from)?;
        }

        transaction.commit().await.map_err(PostgresStoreError::from)?;
        debug!(count = publications.len(), "publications persisted");
        Ok(())
    }

    async fn mark_processing(&self, id: Uuid) -> LatticeResult<()> {
        let sql = format!(
            "UPDATE {} SET status = 'PROCESSING' WHERE id = $1 \
             AND (status IS NULL OR status NOT IN ('COMPLETED', 'FAILED'))",
            self.table_name
        );
        let updated = self
            .client
            .lock()
            .await
            .execute(&sql, &[&id])
            .await
            .map_err(PostgresStoreError::from)?;
        self.require_row(id, updated).await?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        event_identity: &str,
        target: &PublicationTargetIdentifier,
        at: DateTime<Utc>,
    ) -> LatticeResult<()> {
        // Complete the oldest incomplete match; already-completed rows
        // are untouched, which keeps the operation idempotent.
        let sql = format!(
            "UPDATE {t} SET completion_date = $3, status = 'COMPLETED' \
             WHERE id = (SELECT id FROM {t} \
                         WHERE listener_id = $1 AND serialized_event = $2 \
                           AND completion_date IS NULL \
                         ORDER BY publication_date, sequence LIMIT 1)",
            t = self.table_name
        );
        self.client
            .lock()
            .await
            .execute(&sql, &[&target.as_str(), &event_identity, &at])
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn mark_completed_by_id(&self, id: Uuid, at: DateTime<Utc>) -> LatticeResult<()> {
        let sql = format!(
            "UPDATE {} SET completion_date = $2, status = 'COMPLETED' \
             WHERE id = $1 AND completion_date IS NULL",
            self.table_name
        );
        self.client
            .lock()
            .await
            .execute(&sql, &[&id, &at])
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        _at: DateTime<Utc>,
        reason: Option<&str>,
    ) -> LatticeResult<()> {
        if let Some(reason) = reason {
            debug!(id = %id, reason, "marking publication failed");
        }
        let sql = format!(
            "UPDATE {} SET status = 'FAILED' WHERE id = $1 AND completion_date IS NULL",
            self.table_name
        );
        let updated = self
            .client
            .lock()
            .await
            .execute(&sql, &[&id])
            .await
            .map_err(PostgresStoreError::from)?;
        self.require_row(id, updated).await?;
        Ok(())
    }

    async fn mark_resubmitted(&self, id: Uuid, at: DateTime<Utc>) -> LatticeResult<()> {
        // The resubmission instant never moves backwards.
        let sql = format!(
            "UPDATE {} SET status = 'RESUBMITTED', \
             completion_attempts = COALESCE(completion_attempts, 0) + 1, \
             last_resubmission_date = GREATEST(COALESCE(last_resubmission_date, $2), $2) \
             WHERE id = $1 AND completion_date IS NULL",
            self.table_name
        );
        let updated = self
            .client
            .lock()
            .await
            .execute(&sql, &[&id, &at])
            .await
            .map_err(PostgresStoreError::from)?;
        self.require_row(id, updated).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> LatticeResult<Option<EventPublication>> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1", COLUMNS, self.table_name);
        let row = self
            .client
            .lock()
            .await
            .query_opt(&sql, &[&id])
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(match row {
            Some(row) => Some(Self::publication_from_row(&row)?),
            None => None,
        })
    }

    async fn find_incomplete(&self) -> LatticeResult<Vec<EventPublication>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE completion_date IS NULL \
             ORDER BY publication_date, sequence",
            COLUMNS, self.table_name
        );
        Ok(self.query_publications(&sql, &[]).await?)
    }

    async fn find_incomplete_published_before(
        &self,
        instant: DateTime<Utc>,
    ) -> LatticeResult<Vec<EventPublication>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE completion_date IS NULL AND publication_date < $1 \
             ORDER BY publication_date, sequence",
            COLUMNS, self.table_name
        );
        Ok(self.query_publications(&sql, &[&instant]).await?)
    }

    async fn find_incomplete_by_event_and_target(
        &self,
        event_identity: &str,
        target: &PublicationTargetIdentifier,
    ) -> LatticeResult<Option<EventPublication>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE listener_id = $1 AND serialized_event = $2 \
             AND completion_date IS NULL ORDER BY publication_date, sequence LIMIT 1",
            COLUMNS, self.table_name
        );
        let row = self
            .client
            .lock()
            .await
            .query_opt(&sql, &[&target.as_str(), &event_identity])
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(match row {
            Some(row) => Some(Self::publication_from_row(&row)?),
            None => None,
        })
    }

    async fn find_completed(&self) -> LatticeResult<Vec<EventPublication>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE completion_date IS NOT NULL \
             ORDER BY publication_date, sequence",
            COLUMNS, self.table_name
        );
        Ok(self.query_publications(&sql, &[]).await?)
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> LatticeResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = ANY($1)", self.table_name);
        self.client
            .lock()
            .await
            .execute(&sql, &[&ids])
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn delete_completed_before(&self, instant: DateTime<Utc>) -> LatticeResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE completion_date IS NOT NULL AND completion_date < $1",
            self.table_name
        );
        self.client
            .lock()
            .await
            .execute(&sql, &[&instant])
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }
}
