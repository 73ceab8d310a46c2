// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! MongoDB event publication store for Lattice
//!
//! Document-store flavor of the publication store: one collection, one
//! document per publication, `_id` carrying the publication UUID.
//! Instants are stored as RFC 3339 strings and compared in process, so
//! the store behaves identically on any MongoDB topology.
//!
//! # Example
//!
//! ```rust,ignore
//! use lattice::PublicationRegistry;
//! use lattice_mongodb_store::MongoEventPublicationStore;
//! use std::sync::Arc;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store =
//!         MongoEventPublicationStore::new("mongodb://localhost:27017", "lattice").await?;
//!     let registry = Arc::new(PublicationRegistry::new(Arc::new(store)));
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lattice::{
    EventPublication, EventPublicationStore, PublicationStatus, PublicationTargetIdentifier,
    Result as LatticeResult,
};
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Client, Collection};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Default collection name for publications.
pub const DEFAULT_COLLECTION: &str = "event_publication";

/// Errors that can occur when using the MongoDB publication store
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MongoStoreError {
    /// Driver-level error
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// A stored document misses a field or carries the wrong type
    #[error("Malformed publication document: {0}")]
    MalformedDocument(String),

    /// Publication not found
    #[error("Publication not found: {0}")]
    NotFound(String),
}

/// Result type for MongoDB publication store operations
pub type Result<T> = std::result::Result<T, MongoStoreError>;

/// Convert MongoDB store errors to Lattice errors
impl From<MongoStoreError> for lattice::Error {
    fn from(err: MongoStoreError) -> Self {
        match err {
            MongoStoreError::NotFound(id) => lattice::Error::UnknownPublication(id),
            other => lattice::Error::Storage(other.to_string()),
        }
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

fn status_from_str(value: &str) -> Result<PublicationStatus> {
    match value {
        "PUBLISHED" => Ok(PublicationStatus::Published),
        "PROCESSING" => Ok(PublicationStatus::Processing),
        "COMPLETED" => Ok(PublicationStatus::Completed),
        "FAILED" => Ok(PublicationStatus::Failed),
        "RESUBMITTED" => Ok(PublicationStatus::Resubmitted),
        other => Err(MongoStoreError::MalformedDocument(format!(
            "unknown status '{}'",
            other
        ))),
    }
}

fn instant_to_bson(instant: Option<DateTime<Utc>>) -> Bson {
    match instant {
        Some(instant) => Bson::String(instant.to_rfc3339()),
        None => Bson::Null,
    }
}

fn required_str<'d>(document: &'d Document, field: &str) -> Result<&'d str> {
    document.get_str(field).map_err(|_| {
        MongoStoreError::MalformedDocument(format!("missing string field '{}'", field))
    })
}

fn optional_instant(document: &Document, field: &str) -> Result<Option<DateTime<Utc>>> {
    match document.get(field) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::String(value)) => DateTime::parse_from_rfc3339(value)
            .map(|parsed| Some(parsed.with_timezone(&Utc)))
            .map_err(|e| {
                MongoStoreError::MalformedDocument(format!("bad instant in '{}': {}", field, e))
            }),
        Some(other) => Err(MongoStoreError::MalformedDocument(format!(
            "field '{}' has unexpected type {:?}",
            field, other
        ))),
    }
}

/// MongoDB-backed event publication store
pub struct MongoEventPublicationStore {
    collection: Collection<Document>,
}

impl MongoEventPublicationStore {
    /// Connects and uses the default collection name.
    ///
    /// # Errors
    /// Returns error if the connection cannot be established.
    pub async fn new(uri: &str, database: &str) -> Result<Self> {
        Self::with_collection(uri, database, DEFAULT_COLLECTION).await
    }

    /// Connects with an explicit collection name.
    pub async fn with_collection(uri: &str, database: &str, collection: &str) -> Result<Self> {
        info!("Connecting to MongoDB");
        let client = Client::with_uri_str(uri).await.map_err(|e| {
            error!("Failed to connect to MongoDB: {}", e);
            MongoStoreError::Mongo(e)
        })?;
        let collection = client.database(database).collection::<Document>(collection);
        Ok(Self { collection })
    }

    /// Wraps an already-configured collection.
    pub fn from_collection(collection: Collection<Document>) -> Self {
        Self { collection }
    }

    fn to_document(publication: &EventPublication) -> Document {
        doc! {
            "_id": publication.id().to_string(),
            "listener_id": publication.target().as_str(),
            "event_type": publication.event_type(),
            "serialized_event": publication.serialized_event(),
            "publication_date": publication.published_at().to_rfc3339(),
            "sequence": publication.sequence() as i64,
            "completion_date": instant_to_bson(publication.completed_at()),
            "status": status_to_str(publication.status()),
            "completion_attempts": publication.completion_attempts() as i32,
            "last_resubmission_date": instant_to_bson(publication.last_resubmission_at()),
        }
    }

    fn from_document(document: &Document) -> Result<EventPublication> {
        let id = Uuid::parse_str(required_str(document, "_id")?).map_err(|e| {
            MongoStoreError::MalformedDocument(format!("bad publication id: {}", e))
        })?;
        let target = PublicationTargetIdentifier::of(required_str(document, "listener_id")?)
            .map_err(|e| MongoStoreError::MalformedDocument(e.to_string()))?;
        let published_at = optional_instant(document, "publication_date")?.ok_or_else(|| {
            MongoStoreError::MalformedDocument("missing publication_date".to_string())
        })?;
        let sequence = document.get_i64("sequence").unwrap_or(0);
        let status = status_from_str(document.get_str("status").unwrap_or("PUBLISHED"))?;

        Ok(EventPublication::from_parts(
            id,
            required_str(document, "event_type")?.to_string(),
            required_str(document, "serialized_event")?.to_string(),
            target,
            published_at,
            sequence as u64,
            status,
            optional_instant(document, "completion_date")?,
            document.get_i32("completion_attempts").unwrap_or(0) as u32,
            optional_instant(document, "last_resubmission_date")?,
        ))
    }

    async fn collect(&self, filter: Document) -> Result<Vec<EventPublication>> {
        let mut cursor = self.collection.find(filter).await?;
        let mut publications = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            publications.push(Self::from_document(&document)?);
        }
        publications.sort_by_key(|p| (p.published_at(), p.sequence()));
        Ok(publications)
    }

    async fn load(&self, id: Uuid) -> Result<EventPublication> {
        let document = self
            .collection
            .find_one(doc! {"_id": id.to_string()})
            .await?
            .ok_or_else(|| MongoStoreError::NotFound(id.to_string()))?;
        Self::from_document(&document)
    }

    async fn replace(&self, publication: &EventPublication) -> Result<()> {
        self.collection
            .replace_one(
                doc! {"_id": publication.id().to_string()},
                Self::to_document(publication),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventPublicationStore for MongoEventPublicationStore {
    async fn create_all(&self, publications: &[EventPublication]) -> LatticeResult<()> {
        if publications.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = publications.iter().map(|p| p.id().to_string()).collect();
        let colliding = self
            .collection
            .find_one(doc! {"_id": {"$in": ids.clone()}})
            .await
            .map_err(MongoStoreError::from)?;
        if let Some(existing) = colliding {
            return Err(lattice::Error::Storage(format!(
                "publication id {} already exists",
                existing.get_str("_id").unwrap_or("<unknown>")
            )));
        }

        let documents: Vec<Document> = publications.iter().map(Self::to_document).collect();
        if let Err(insert_error) = self.collection.insert_many(documents).await {
            // Keep the all-or-none contract observable: remove whatever
            // part of the batch made it in before the failure.
            if let Err(cleanup_error) = self
                .collection
                .delete_many(doc! {"_id": {"$in": ids}})
                .await
            {
                error!(%cleanup_error, "failed to roll back partial publication batch");
            }
            return Err(MongoStoreError::from(insert_error).into());
        }
        debug!(count = publications.len(), "publications persisted");
        Ok(())
    }

    async fn mark_processing(&self, id: Uuid) -> LatticeResult<()> {
        let mut publication = self.load(id).await.map_err(MongoStoreError::from)?;
        publication.mark_processing();
        self.replace(&publication).await.map_err(MongoStoreError::from)?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        event_identity: &str,
        target: &PublicationTargetIdentifier,
        at: DateTime<Utc>,
    ) -> LatticeResult<()> {
        let candidates = self
            .collect(doc! {
                "listener_id": target.as_str(),
                "serialized_event": event_identity,
                "completion_date": Bson::Null,
            })
            .await
            .map_err(MongoStoreError::from)?;
        if let Some(oldest) = candidates.into_iter().next() {
            let mut publication = oldest;
            publication.mark_completed(at);
            self.replace(&publication).await.map_err(MongoStoreError::from)?;
        }
        Ok(())
    }

    async fn mark_completed_by_id(&self, id: Uuid, at: DateTime<Utc>) -> LatticeResult<()> {
        let mut publication = self.load(id).await.map_err(MongoStoreError::from)?;
        publication.mark_completed(at);
        self.replace(&publication).await.map_err(MongoStoreError::from)?;
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
        let mut publication = self.load(id).await.map_err(MongoStoreError::from)?;
        publication.mark_failed();
        self.replace(&publication).await.map_err(MongoStoreError::from)?;
        Ok(())
    }

    async fn mark_resubmitted(&self, id: Uuid, at: DateTime<Utc>) -> LatticeResult<()> {
        let mut publication = self.load(id).await.map_err(MongoStoreError::from)?;
        publication.mark_resubmitted(at);
        self.replace(&publication).await.map_err(MongoStoreError::from)?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> LatticeResult<Option<EventPublication>> {
        match self.load(id).await {
            Ok(publication) => Ok(Some(publication)),
            Err(MongoStoreError::NotFound(_)) => Ok(None),
            Err(other) => Err(other.into()),
        }
    }

    async fn find_incomplete(&self) -> LatticeResult<Vec<EventPublication>> {
        Ok(self
            .collect(doc! {"completion_date": Bson::Null})
            .await
            .map_err(MongoStoreError::from)?)
    }

    async fn find_incomplete_published_before(
        &self,
        instant: DateTime<Utc>,
    ) -> LatticeResult<Vec<EventPublication>> {
        let incomplete = self.find_incomplete().await?;
        Ok(incomplete
            .into_iter()
            .filter(|p| p.published_at() < instant)
            .collect())
    }

    async fn find_incomplete_by_event_and_target(
        &self,
        event_identity: &str,
        target: &PublicationTargetIdentifier,
    ) -> LatticeResult<Option<EventPublication>> {
        let candidates = self
            .collect(doc! {
                "listener_id": target.as_str(),
                "serialized_event": event_identity,
                "completion_date": Bson::Null,
            })
            .await
            .map_err(MongoStoreError::from)?;
        Ok(candidates.into_iter().next())
    }

    async fn find_completed(&self) -> LatticeResult<Vec<EventPublication>> {
        Ok(self
            .collect(doc! {"completion_date": {"$ne": Bson::Null}})
            .await
            .map_err(MongoStoreError::from)?)
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> LatticeResult<()> {
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        self.collection
            .delete_many(doc! {"_id": {"$in": ids}})
            .await
            .map_err(MongoStoreError::from)?;
        Ok(())
    }

    async fn delete_completed_before(&self, instant: DateTime<Utc>) -> LatticeResult<()> {
        let stale: Vec<String> = self
            .find_completed()
            .await?
            .into_iter()
            .filter(|p| matches!(p.completed_at(), Some(at) if at < instant))
            .map(|p| p.id().to_string())
            .collect();
        if stale.is_empty() {
            return Ok(());
        }
        self.collection
            .delete_many(doc! {"_id": {"$in": stale}})
            .await
            .map_err(MongoStoreError::from)?;
        Ok(())
    }
}
