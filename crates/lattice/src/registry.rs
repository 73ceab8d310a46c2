// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Event publication registry
//!
//! Fronts the [`EventPublicationStore`]: registers one publication per
//! (event, listener) pair when an event is published, completes them when
//! listeners return, marks stale ones failed, and answers queries.
//!
//! Completion always goes straight to the store, independent of whatever
//! business work surrounds it, so a completion commit survives a later
//! abort of the surrounding operation.
//!
//! A process-local in-progress cache keyed by `(serialized event, target)`
//! lets synchronous listeners find their own publication without a store
//! round-trip.

use crate::config::CompletionMode;
use crate::error::Result;
use crate::ids::PublicationTargetIdentifier;
use crate::publication::EventPublication;
use crate::store::EventPublicationStore;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

type InProgressKey = (String, PublicationTargetIdentifier);

/// Registry of in-flight event publications.
pub struct PublicationRegistry {
    store: Arc<dyn EventPublicationStore>,
    in_progress: DashMap<InProgressKey, Uuid>,
    sequence: AtomicU64,
    last_published_at: Mutex<DateTime<Utc>>,
    completion_mode: CompletionMode,
}

impl PublicationRegistry {
    /// Creates a registry over the given store, completing by update.
    pub fn new(store: Arc<dyn EventPublicationStore>) -> Self {
        Self::with_completion_mode(store, CompletionMode::Update)
    }

    /// Creates a registry with an explicit completion mode.
    pub fn with_completion_mode(
        store: Arc<dyn EventPublicationStore>,
        completion_mode: CompletionMode,
    ) -> Self {
        Self {
            store,
            in_progress: DashMap::new(),
            sequence: AtomicU64::new(0),
            last_published_at: Mutex::new(DateTime::<Utc>::MIN_UTC),
            completion_mode,
        }
    }

    /// The store this registry fronts.
    pub fn store(&self) -> &Arc<dyn EventPublicationStore> {
        &self.store
    }

    /// Stamps a publication instant that never moves backwards within
    /// this process, so program order survives clock adjustments.
    fn next_publication_instant(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut last = self.last_published_at.lock();
        let stamped = if now > *last { now } else { *last };
        *last = stamped;
        stamped
    }

    /// Registers one publication per target for the given event, persisted
    /// as a single atomic batch. Publications carry identical publication
    /// instants and ascending sequences, preserving listener order.
    pub async fn register(
        &self,
        event_type: &str,
        serialized_event: &str,
        targets: &[PublicationTargetIdentifier],
    ) -> Result<Vec<EventPublication>> {
        let published_at = self.next_publication_instant();
        let publications: Vec<EventPublication> = targets
            .iter()
            .map(|target| {
                EventPublication::new(
                    event_type,
                    serialized_event,
                    target.clone(),
                    published_at,
                    self.sequence.fetch_add(1, Ordering::SeqCst),
                )
            })
            .collect();

        self.store.create_all(&publications).await?;

        for publication in &publications {
            let key = (
                publication.serialized_event().to_string(),
                publication.target().clone(),
            );
            // Atomic put-if-absent: a duplicate payload keeps the oldest
            // publication cached, matching completion order.
            self.in_progress.entry(key).or_insert(publication.id());
        }

        debug!(
            event_type,
            count = publications.len(),
            "registered event publications"
        );
        Ok(publications)
    }

    /// Looks up the in-progress publication for an event/target pair
    /// without touching the store.
    pub fn find_in_progress(
        &self,
        serialized_event: &str,
        target: &PublicationTargetIdentifier,
    ) -> Option<Uuid> {
        self.in_progress
            .get(&(serialized_event.to_string(), target.clone()))
            .map(|entry| *entry.value())
    }

    /// Explicitly evicts an in-progress cache entry.
    pub fn evict_in_progress(&self, serialized_event: &str, target: &PublicationTargetIdentifier) {
        self.in_progress
            .remove(&(serialized_event.to_string(), target.clone()));
    }

    /// Marks dispatch of a publication as started.
    pub async fn mark_processing(&self, id: Uuid) -> Result<()> {
        self.store.mark_processing(id).await
    }

    /// Completes the publication for the given event/target pair.
    ///
    /// Commits directly against the store, independent of the surrounding
    /// business operation. Idempotent. In delete completion mode the row
    /// is removed instead of updated.
    pub async fn mark_completed(
        &self,
        serialized_event: &str,
        target: &PublicationTargetIdentifier,
    ) -> Result<()> {
        let at = Utc::now();
        let cached = self.find_in_progress(serialized_event, target);

        match self.completion_mode {
            CompletionMode::Update => match cached {
                Some(id) => self.store.mark_completed_by_id(id, at).await?,
                None => {
                    self.store
                        .mark_completed(serialized_event, target, at)
                        .await?
                }
            },
            CompletionMode::Delete => {
                let id = match cached {
                    Some(id) => Some(id),
                    None => self
                        .store
                        .find_incomplete_by_event_and_target(serialized_event, target)
                        .await?
                        .map(|p| p.id()),
                };
                if let Some(id) = id {
                    self.store.delete_by_ids(&[id]).await?;
                }
            }
        }

        self.evict_in_progress(serialized_event, target);
        Ok(())
    }

    /// Moves a publication to the terminal failed status and evicts it
    /// from the in-progress cache.
    pub async fn mark_failed(&self, id: Uuid, reason: Option<&str>) -> Result<()> {
        self.store.mark_failed(id, Utc::now(), reason).await?;
        self.in_progress.retain(|_, cached| *cached != id);
        Ok(())
    }

    /// Records a resubmission on the publication.
    pub async fn mark_resubmitted(&self, id: Uuid) -> Result<()> {
        self.store.mark_resubmitted(id, Utc::now()).await
    }

    /// Fails every non-terminal publication older than the threshold.
    ///
    /// Returns the number of publications transitioned.
    pub async fn mark_stale_publications_failed(&self, threshold: Duration) -> Result<usize> {
        let now = Utc::now();
        let cutoff = now - threshold;
        let stale: Vec<EventPublication> = self
            .store
            .find_incomplete_published_before(cutoff)
            .await?
            .into_iter()
            .filter(|p| !p.status().is_terminal())
            .collect();

        for publication in &stale {
            warn!(
                id = %publication.id(),
                listener = %publication.target(),
                attempts = publication.completion_attempts(),
                published_at = %publication.published_at().to_rfc3339(),
                "publication exceeded staleness threshold"
            );
            self.store
                .mark_failed(publication.id(), now, Some("staleness threshold exceeded"))
                .await?;
            self.evict_in_progress(publication.serialized_event(), publication.target());
        }

        Ok(stale.len())
    }

    /// All publications still awaiting completion, oldest first.
    pub async fn find_incomplete(&self) -> Result<Vec<EventPublication>> {
        self.store.find_incomplete().await
    }

    /// All completed publications, oldest first.
    pub async fn find_completed(&self) -> Result<Vec<EventPublication>> {
        self.store.find_completed().await
    }

    /// Deletes completed publications older than the given age.
    pub async fn delete_completed_publications_older_than(&self, age: Duration) -> Result<()> {
        self.store.delete_completed_before(Utc::now() - age).await
    }

    /// Logs the count and identities of still-incomplete publications.
    ///
    /// Called on orderly shutdown; the publications themselves are left
    /// untouched for the next start's resubmission pass.
    pub async fn report_incomplete_on_shutdown(&self) -> Result<usize> {
        let incomplete = self.find_incomplete().await?;
        if incomplete.is_empty() {
            info!("shutting down with no incomplete event publications");
        } else {
            let ids: Vec<String> = incomplete.iter().map(|p| p.id().to_string()).collect();
            info!(
                count = incomplete.len(),
                ids = %ids.join(", "),
                "shutting down with incomplete event publications"
            );
        }
        Ok(incomplete.len())
    }
}
