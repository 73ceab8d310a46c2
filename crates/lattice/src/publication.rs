// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Durable record of one event delivery
//!
//! An [`EventPublication`] records that a particular event was handed to a
//! particular listener. It is the unit of at-least-once tracking: created
//! before dispatch, completed after a successful listener return, and
//! picked up by the supervisor when neither happened.
//!
//! One value type carries the whole lifecycle; completion is a state
//! transition on the `status` discriminant, not a separate subtype.

use crate::ids::PublicationTargetIdentifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a publication.
///
/// Progression: `Published → Processing → (Completed | Failed | Resubmitted)`.
/// `Resubmitted` is not terminal; the supervisor moves a publication back
/// through `Processing` on every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicationStatus {
    /// Persisted, not yet dispatched.
    Published,
    /// A listener invocation is in flight.
    Processing,
    /// The listener returned successfully; `completed_at` is set.
    Completed,
    /// Terminal failure (explicit or via staleness).
    Failed,
    /// Re-dispatched by the supervisor after a restart.
    Resubmitted,
}

impl PublicationStatus {
    /// Whether this status ends the lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A single event-to-listener delivery record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPublication {
    id: Uuid,
    event_type: String,
    serialized_event: String,
    target: PublicationTargetIdentifier,
    published_at: DateTime<Utc>,
    /// Insertion sequence; breaks `published_at` ties so program order
    /// within one transaction is preserved.
    sequence: u64,
    status: PublicationStatus,
    completed_at: Option<DateTime<Utc>>,
    completion_attempts: u32,
    last_resubmission_at: Option<DateTime<Utc>>,
}

impl EventPublication {
    /// Creates a freshly published record.
    pub fn new(
        event_type: impl Into<String>,
        serialized_event: impl Into<String>,
        target: PublicationTargetIdentifier,
        published_at: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            serialized_event: serialized_event.into(),
            target,
            published_at,
            sequence,
            status: PublicationStatus::Published,
            completed_at: None,
            completion_attempts: 0,
            last_resubmission_at: None,
        }
    }

    /// Restores a record from stored fields (used by store backends).
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: Uuid,
        event_type: String,
        serialized_event: String,
        target: PublicationTargetIdentifier,
        published_at: DateTime<Utc>,
        sequence: u64,
        status: PublicationStatus,
        completed_at: Option<DateTime<Utc>>,
        completion_attempts: u32,
        last_resubmission_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            event_type,
            serialized_event,
            target,
            published_at,
            sequence,
            status,
            completed_at,
            completion_attempts,
            last_resubmission_at,
        }
    }

    /// Immutable unique id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Logical type of the stored event.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Serialized event form; the registry's event identity.
    pub fn serialized_event(&self) -> &str {
        &self.serialized_event
    }

    /// The listener this delivery is destined for.
    pub fn target(&self) -> &PublicationTargetIdentifier {
        &self.target
    }

    /// When the publication was created.
    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    /// Insertion sequence within the creating process.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Current lifecycle status.
    pub fn status(&self) -> PublicationStatus {
        self.status
    }

    /// Completion instant; set iff status is `Completed`.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Number of completion attempts recorded so far.
    pub fn completion_attempts(&self) -> u32 {
        self.completion_attempts
    }

    /// Last resubmission instant, monotonic per id.
    pub fn last_resubmission_at(&self) -> Option<DateTime<Utc>> {
        self.last_resubmission_at
    }

    /// Whether completion has been recorded.
    pub fn is_completed(&self) -> bool {
        self.status == PublicationStatus::Completed
    }

    /// Whether the publication still awaits completion.
    pub fn is_incomplete(&self) -> bool {
        self.completed_at.is_none()
    }

    /// Whether the publication exceeded the staleness threshold at `now`.
    pub fn is_stale(&self, threshold: chrono::Duration, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.published_at + threshold < now
    }

    /// Marks dispatch as started.
    pub fn mark_processing(&mut self) {
        if !self.status.is_terminal() {
            self.status = PublicationStatus::Processing;
        }
    }

    /// Records successful completion. Idempotent: a second call with any
    /// instant leaves the first completion untouched.
    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        if self.is_completed() {
            return;
        }
        self.status = PublicationStatus::Completed;
        self.completed_at = Some(at);
    }

    /// Records a terminal failure. Never overwrites a completion.
    pub fn mark_failed(&mut self) {
        if !self.is_completed() {
            self.status = PublicationStatus::Failed;
        }
    }

    /// Records a resubmission: bumps the attempt counter and advances the
    /// resubmission instant, which never moves backwards.
    pub fn mark_resubmitted(&mut self, at: DateTime<Utc>) {
        if self.is_completed() {
            return;
        }
        self.status = PublicationStatus::Resubmitted;
        self.completion_attempts += 1;
        self.last_resubmission_at = Some(match self.last_resubmission_at {
            Some(previous) if previous > at => previous,
            _ => at,
        });
    }
}
