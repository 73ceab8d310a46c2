// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Event envelope and serializer collaborator
//!
//! Business code publishes [`DomainEvent`]s through the multicaster. The
//! envelope carries a type tag, an arbitrary JSON payload, and an optional
//! externalization declaration (`target` or `target::key`, either half an
//! embedded `#{…}` expression).
//!
//! Event identity for the publication registry is the serialized form
//! produced by the [`EventSerializer`]: equal serialized forms compare
//! equal, and stores may hash-index that form.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// An application event flowing through the multicaster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Logical event type, e.g. `order.completed`.
    event_type: String,

    /// Arbitrary JSON payload.
    payload: serde_json::Value,

    /// Raw externalization declaration, when the event is externalizable.
    /// Parsed into a routing target by the externalization router.
    #[serde(skip_serializing_if = "Option::is_none")]
    externalized_to: Option<String>,
}

impl DomainEvent {
    /// Creates an event with the given type tag and payload.
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            externalized_to: None,
        }
    }

    /// Declares this event externalizable to the given routing target.
    ///
    /// The declaration uses the textual routing form, e.g. `"orders"` or
    /// `"orders::#{payload.id}"`.
    pub fn externalized_to(mut self, routing: impl Into<String>) -> Self {
        self.externalized_to = Some(routing.into());
        self
    }

    /// The logical event type.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The event payload.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// The raw externalization declaration, if any.
    pub fn externalization_declaration(&self) -> Option<&str> {
        self.externalized_to.as_deref()
    }

    /// Whether the event carries an externalization declaration.
    pub fn is_externalized(&self) -> bool {
        self.externalized_to.is_some()
    }

    /// The evaluation root for routing expressions: the event rendered as
    /// a JSON object with `type` and `payload` fields.
    pub fn expression_root(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.event_type,
            "payload": self.payload,
        })
    }
}

/// Serializes events for durable storage and restores them for
/// resubmission.
///
/// Implementations must be deterministic: serializing the same event twice
/// yields the same string, since the registry keys its in-progress cache
/// and completion lookups on the serialized form.
pub trait EventSerializer: Send + Sync {
    /// Serializes the event into its durable textual form.
    fn serialize(&self, event: &DomainEvent) -> Result<String>;

    /// Restores an event from its durable form.
    ///
    /// `event_type` is the type tag recorded alongside the blob; it lets
    /// implementations validate the blob against the expected type.
    fn deserialize(&self, blob: &str, event_type: &str) -> Result<DomainEvent>;
}

/// JSON implementation of [`EventSerializer`].
///
/// Serializes the full envelope so resubmitted events keep their
/// externalization declaration.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventSerializer;

impl JsonEventSerializer {
    /// Creates the serializer.
    pub fn new() -> Self {
        Self
    }
}

impl EventSerializer for JsonEventSerializer {
    fn serialize(&self, event: &DomainEvent) -> Result<String> {
        serde_json::to_string(event)
            .map_err(|e| Error::Serialization(format!("failed to serialize event: {}", e)))
    }

    fn deserialize(&self, blob: &str, event_type: &str) -> Result<DomainEvent> {
        let event: DomainEvent = serde_json::from_str(blob)
            .map_err(|e| Error::Serialization(format!("failed to deserialize event: {}", e)))?;
        if event.event_type() != event_type {
            return Err(Error::Serialization(format!(
                "stored event type '{}' does not match expected '{}'",
                event.event_type(),
                event_type
            )));
        }
        Ok(event)
    }
}
