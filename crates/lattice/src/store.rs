// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Publication store capability interface
//!
//! The registry has no preference for a storage engine; everything it needs
//! is behind [`EventPublicationStore`]. Backends exist for relational and
//! document stores (see the `lattice-postgres-store` and
//! `lattice-mongodb-store` crates); [`MemoryEventPublicationStore`] serves
//! tests and short-lived processes.
//!
//! Event identity is the serialized event form: equal serialized forms
//! compare equal, and implementations may hash-index that column.

use crate::error::{Error, Result};
use crate::ids::PublicationTargetIdentifier;
use crate::publication::EventPublication;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Abstract CRUD over stored publications.
///
/// Implementations must keep `create_all` atomic (all rows or none) and
/// `mark_completed` idempotent. Queries returning collections order by
/// `published_at` ascending, insertion sequence breaking ties.
#[async_trait]
pub trait EventPublicationStore: Send + Sync {
    /// Inserts the given publications atomically.
    ///
    /// # Errors
    /// Fails with `Storage` if any id already exists; in that case none of
    /// the publications are persisted.
    async fn create_all(&self, publications: &[EventPublication]) -> Result<()>;

    /// Marks dispatch of the given publication as started.
    async fn mark_processing(&self, id: Uuid) -> Result<()>;

    /// Completes the oldest incomplete publication matching the event
    /// identity and target. No-op if every match is already completed.
    async fn mark_completed(
        &self,
        event_identity: &str,
        target: &PublicationTargetIdentifier,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Completes a publication by id. No-op if already completed.
    async fn mark_completed_by_id(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Moves a publication to the terminal failed status.
    async fn mark_failed(&self, id: Uuid, at: DateTime<Utc>, reason: Option<&str>) -> Result<()>;

    /// Records a resubmission: bumps the attempt counter and advances the
    /// monotonic resubmission instant.
    async fn mark_resubmitted(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Looks up a publication by id.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<EventPublication>>;

    /// All publications whose completion instant is unset, oldest first.
    async fn find_incomplete(&self) -> Result<Vec<EventPublication>>;

    /// Incomplete publications published strictly before the instant.
    async fn find_incomplete_published_before(
        &self,
        instant: DateTime<Utc>,
    ) -> Result<Vec<EventPublication>>;

    /// The oldest incomplete publication for the given event identity and
    /// target, if any. Duplicate payloads resolve to the oldest match.
    async fn find_incomplete_by_event_and_target(
        &self,
        event_identity: &str,
        target: &PublicationTargetIdentifier,
    ) -> Result<Option<EventPublication>>;

    /// All completed publications, oldest first.
    async fn find_completed(&self) -> Result<Vec<EventPublication>>;

    /// Deletes publications by id. Missing ids are ignored.
    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<()>;

    /// Deletes completed publications whose completion instant lies before
    /// the given instant.
    async fn delete_completed_before(&self, instant: DateTime<Utc>) -> Result<()>;
}

/// In-memory publication storage.
///
/// Useful for testing and short-lived processes. Does not persist across
/// restarts.
#[derive(Clone, Default)]
pub struct MemoryEventPublicationStore {
    publications: Arc<Mutex<HashMap<Uuid, EventPublication>>>,
}

impl MemoryEventPublicationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored publications, completed included.
    pub fn len(&self) -> usize {
        self.publications.lock().len()
    }

    /// Whether the store holds no publications.
    pub fn is_empty(&self) -> bool {
        self.publications.lock().is_empty()
    }

    fn sorted(mut publications: Vec<EventPublication>) -> Vec<EventPublication> {
        publications.sort_by_key(|p| (p.published_at(), p.sequence()));
        publications
    }
}

#[async_trait]
impl EventPublicationStore for MemoryEventPublicationStore {
    async fn create_all(&self, publications: &[EventPublication]) -> Result<()> {
        let mut guard = self.publications.lock();
        for publication in publications {
            if guard.contains_key(&publication.id()) {
                return Err(Error::Storage(format!(
                    "publication id {} already exists",
                    publication.id()
                )));
            }
        }
        for publication in publications {
            guard.insert(publication.id(), publication.clone());
        }
        Ok(())
    }

    async fn mark_processing(&self, id: Uuid) -> Result<()> {
        let mut guard = self.publications.lock();
        match guard.get_mut(&id) {
            Some(publication) => {
                publication.mark_processing();
                Ok(())
            }
            None => Err(Error::UnknownPublication(id.to_string())),
        }
    }

    async fn mark_completed(
        &self,
        event_identity: &str,
        target: &PublicationTargetIdentifier,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut guard = self.publications.lock();
        let oldest = guard
            .values()
            .filter(|p| {
                p.is_incomplete() && p.serialized_event() == event_identity && p.target() == target
            })
            .min_by_key(|p| (p.published_at(), p.sequence()))
            .map(EventPublication::id);
        if let Some(id) = oldest {
            if let Some(publication) = guard.get_mut(&id) {
                publication.mark_completed(at);
            }
        }
        Ok(())
    }

    async fn mark_completed_by_id(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut guard = self.publications.lock();
        match guard.get_mut(&id) {
            Some(publication) => {
                publication.mark_completed(at);
                Ok(())
            }
            None => Err(Error::UnknownPublication(id.to_string())),
        }
    }

    async fn mark_failed(&self, id: Uuid, _at: DateTime<Utc>, reason: Option<&str>) -> Result<()> {
        let mut guard = self.publications.lock();
        match guard.get_mut(&id) {
            Some(publication) => {
                if let Some(reason) = reason {
                    tracing::debug!(id = %id, reason, "marking publication failed");
                }
                publication.mark_failed();
                Ok(())
            }
            None => Err(Error::UnknownPublication(id.to_string())),
        }
    }

    async fn mark_resubmitted(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut guard = self.publications.lock();
        match guard.get_mut(&id) {
            Some(publication) => {
                publication.mark_resubmitted(at);
                Ok(())
            }
            None => Err(Error::UnknownPublication(id.to_string())),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<EventPublication>> {
        Ok(self.publications.lock().get(&id).cloned())
    }

    async fn find_incomplete(&self) -> Result<Vec<EventPublication>> {
        let guard = self.publications.lock();
        Ok(Self::sorted(
            guard
                .values()
                .filter(|p| p.is_incomplete())
                .cloned()
                .collect(),
        ))
    }

    async fn find_incomplete_published_before(
        &self,
        instant: DateTime<Utc>,
    ) -> Result<Vec<EventPublication>> {
        let guard = self.publications.lock();
        Ok(Self::sorted(
            guard
                .values()
                .filter(|p| p.is_incomplete() && p.published_at() < instant)
                .cloned()
                .collect(),
        ))
    }

    async fn find_incomplete_by_event_and_target(
        &self,
        event_identity: &str,
        target: &PublicationTargetIdentifier,
    ) -> Result<Option<EventPublication>> {
        let guard = self.publications.lock();
        Ok(guard
            .values()
            .filter(|p| {
                p.is_incomplete() && p.serialized_event() == event_identity && p.target() == target
            })
            .min_by_key(|p| (p.published_at(), p.sequence()))
            .cloned())
    }

    async fn find_completed(&self) -> Result<Vec<EventPublication>> {
        let guard = self.publications.lock();
        Ok(Self::sorted(
            guard
                .values()
                .filter(|p| p.is_completed())
                .cloned()
                .collect(),
        ))
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<()> {
        let mut guard = self.publications.lock();
        for id in ids {
            guard.remove(id);
        }
        Ok(())
    }

    async fn delete_completed_before(&self, instant: DateTime<Utc>) -> Result<()> {
        let mut guard = self.publications.lock();
        guard.retain(|_, p| !matches!(p.completed_at(), Some(at) if at < instant));
        Ok(())
    }
}
