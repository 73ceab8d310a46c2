// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Externalization router
//!
//! A distinguished listener that forwards externalizable events to the
//! outside world. Selection defaults to "the event carries an
//! externalization declaration"; the declaration parses into a
//! [`RoutingTarget`] whose halves may be `#{…}` expressions evaluated
//! against the event.
//!
//! In broker mode the router runs as an asynchronous listener and calls
//! the [`BrokerSender`]; send completion is the listener result, so a
//! successful send completes the publication and a failed one leaves it
//! for retry. In outbox mode the router runs synchronously inside the
//! business transaction, writes the message to the caller-provided
//! [`Outbox`], and reports success immediately.

use crate::config::{ExternalizationConfig, ExternalizationMode};
use crate::error::{Error, Result};
use crate::event::{DomainEvent, EventSerializer, JsonEventSerializer};
use crate::ids::{PublicationTargetIdentifier, RoutingTarget};
use crate::multicaster::{DispatchMode, EventListener, EventSink};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Publication target identifier under which the router subscribes.
pub const ROUTER_TARGET_ID: &str = "lattice.externalization.router";

/// Evaluates `#{…}` routing expressions against an event.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluates the expression with the given JSON root.
    ///
    /// # Errors
    /// Returns `Expression` when the expression cannot be evaluated or
    /// resolves to nothing.
    fn evaluate(&self, expression: &str, root: &Value) -> Result<String>;
}

/// Default evaluator: dot-separated path lookup over the event's JSON
/// rendering (`payload.id`, `type`, …).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPathEvaluator;

impl JsonPathEvaluator {
    /// Creates the evaluator.
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEvaluator for JsonPathEvaluator {
    fn evaluate(&self, expression: &str, root: &Value) -> Result<String> {
        let path = expression
            .strip_prefix("#{")
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(expression)
            .trim();
        if path.is_empty() {
            return Err(Error::Expression("empty routing expression".to_string()));
        }

        let mut current = root;
        for segment in path.split('.') {
            current = current.get(segment).ok_or_else(|| {
                Error::Expression(format!(
                    "path '{}' does not resolve against the event (missing '{}')",
                    path, segment
                ))
            })?;
        }

        match current {
            Value::String(value) => Ok(value.clone()),
            Value::Number(value) => Ok(value.to_string()),
            Value::Bool(value) => Ok(value.to_string()),
            Value::Null => Err(Error::Expression(format!(
                "path '{}' resolved to null",
                path
            ))),
            other => Err(Error::Expression(format!(
                "path '{}' resolved to a non-scalar value: {}",
                path, other
            ))),
        }
    }
}

/// Body of an externalized message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Structured payload, handed to the transport as-is.
    Structured(Value),
    /// Pre-serialized textual form.
    Text(String),
}

/// A transport-framed message: headers plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalizedMessage {
    headers: BTreeMap<String, String>,
    body: MessageBody,
}

impl ExternalizedMessage {
    /// Creates a message with a structured body and no headers.
    pub fn structured(body: Value) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: MessageBody::Structured(body),
        }
    }

    /// Creates a message with a pre-serialized body and no headers.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: MessageBody::Text(body.into()),
        }
    }

    /// Adds a header, replacing an existing value.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// The message headers.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// The message body.
    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Adds a header only when absent, so producer-supplied headers are
    /// never overwritten.
    fn augment_header(&mut self, key: String, value: String) {
        self.headers.entry(key).or_insert(value);
    }

    fn serialize_body(self) -> Result<Self> {
        let body = match self.body {
            MessageBody::Structured(value) => MessageBody::Text(
                serde_json::to_string(&value)
                    .map_err(|e| Error::Serialization(format!("failed to serialize body: {}", e)))?,
            ),
            text @ MessageBody::Text(_) => text,
        };
        Ok(Self {
            headers: self.headers,
            body,
        })
    }
}

/// Broker-agnostic send contract. Implementations wrap the concrete
/// client (AMQP, Kafka, JMS, cloud messaging).
#[async_trait::async_trait]
pub trait BrokerSender: Send + Sync {
    /// Sends one message to the resolved routing target. The target's
    /// key, when present, lets the transport preserve per-key order.
    async fn send(&self, target: &RoutingTarget, message: &ExternalizedMessage) -> Result<()>;
}

/// Durable queue co-located with the business database; enqueue commits
/// atomically with the surrounding business write.
#[async_trait::async_trait]
pub trait Outbox: Send + Sync {
    /// Schedules one message for a later send by the outbox worker.
    async fn schedule(&self, target: &RoutingTarget, message: &ExternalizedMessage) -> Result<()>;
}

type SupportsFn = dyn Fn(&DomainEvent) -> bool + Send + Sync;
type MapperFn = dyn Fn(&DomainEvent) -> ExternalizedMessage + Send + Sync;
type HeadersFn = dyn Fn(&DomainEvent) -> BTreeMap<String, String> + Send + Sync;

/// The externalization router listener.
pub struct EventExternalizer {
    config: ExternalizationConfig,
    evaluator: Arc<dyn ExpressionEvaluator>,
    serializer: Arc<dyn EventSerializer>,
    sender: Option<Arc<dyn BrokerSender>>,
    outbox: Option<Arc<dyn Outbox>>,
    supports: Option<Box<SupportsFn>>,
    mapper: Option<Box<MapperFn>>,
    headers: Option<Box<HeadersFn>>,
}

impl EventExternalizer {
    /// Creates a router with the given configuration and defaults for
    /// every collaborator that has one.
    pub fn new(config: ExternalizationConfig) -> Self {
        Self {
            config,
            evaluator: Arc::new(JsonPathEvaluator::new()),
            serializer: Arc::new(JsonEventSerializer::new()),
            sender: None,
            outbox: None,
            supports: None,
            mapper: None,
            headers: None,
        }
    }

    /// Sets the broker sender used in broker mode.
    pub fn with_sender(mut self, sender: Arc<dyn BrokerSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Sets the outbox used in outbox mode.
    pub fn with_outbox(mut self, outbox: Arc<dyn Outbox>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    /// Replaces the selection predicate. The default selects events that
    /// carry an externalization declaration.
    pub fn with_supports<F>(mut self, supports: F) -> Self
    where
        F: Fn(&DomainEvent) -> bool + Send + Sync + 'static,
    {
        self.supports = Some(Box::new(supports));
        self
    }

    /// Replaces the payload mapping. The default ships the event payload
    /// unchanged.
    pub fn with_payload_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&DomainEvent) -> ExternalizedMessage + Send + Sync + 'static,
    {
        self.mapper = Some(Box::new(mapper));
        self
    }

    /// Installs a header function. Produced headers augment but never
    /// overwrite headers the payload mapper set.
    pub fn with_headers<F>(mut self, headers: F) -> Self
    where
        F: Fn(&DomainEvent) -> BTreeMap<String, String> + Send + Sync + 'static,
    {
        self.headers = Some(Box::new(headers));
        self
    }

    /// Replaces the expression evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Replaces the serializer used when serialize-externalization is on.
    pub fn with_serializer(mut self, serializer: Arc<dyn EventSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Resolves the event's routing declaration into a concrete target,
    /// evaluating embedded expressions against the event.
    pub fn resolve_routing(&self, event: &DomainEvent) -> Result<RoutingTarget> {
        let declaration = event.externalization_declaration().ok_or_else(|| {
            Error::Expression(format!(
                "event '{}' has no externalization declaration",
                event.event_type()
            ))
        })?;
        let routing = RoutingTarget::parse(declaration).to_routing_target()?;
        let root = event.expression_root();

        let target = if routing.has_target_expression() {
            self.evaluator.evaluate(routing.target(), &root)?
        } else {
            routing.target().to_string()
        };

        let resolved = match routing.key() {
            Some(key) if routing.has_key_expression() => {
                RoutingTarget::for_target(target).and_key(self.evaluator.evaluate(key, &root)?)
            }
            Some(key) => RoutingTarget::for_target(target).and_key(key),
            None => RoutingTarget::for_target(target).without_key(),
        };
        Ok(resolved)
    }

    fn build_message(&self, event: &DomainEvent) -> Result<ExternalizedMessage> {
        let mut message = match &self.mapper {
            Some(mapper) => mapper(event),
            None => ExternalizedMessage::structured(event.payload().clone()),
        };

        if let Some(headers) = &self.headers {
            for (key, value) in headers(event) {
                message.augment_header(key, value);
            }
        }

        if self.config.serialize_externalization {
            message = message.serialize_body()?;
        }
        Ok(message)
    }
}

#[async_trait::async_trait]
impl EventListener for EventExternalizer {
    fn id(&self) -> PublicationTargetIdentifier {
        #[allow(clippy::expect_used)] // SAFETY: the constant is non-empty
        PublicationTargetIdentifier::of(ROUTER_TARGET_ID).expect("router target id is valid")
    }

    fn dispatch_mode(&self) -> DispatchMode {
        match self.config.mode {
            // The outbox write must join the business transaction.
            ExternalizationMode::Outbox => DispatchMode::Synchronous,
            ExternalizationMode::Broker => DispatchMode::Asynchronous,
        }
    }

    fn supports(&self, event: &DomainEvent) -> bool {
        if !self.config.enabled {
            return false;
        }
        match &self.supports {
            Some(supports) => supports(event),
            None => event.is_externalized(),
        }
    }

    async fn handle(&self, event: &DomainEvent, _sink: &EventSink) -> Result<()> {
        let target = self.resolve_routing(event)?;
        let message = self.build_message(event)?;

        match self.config.mode {
            ExternalizationMode::Outbox => {
                let outbox = self.outbox.as_ref().ok_or_else(|| {
                    Error::Transport("outbox mode selected but no outbox configured".to_string())
                })?;
                outbox.schedule(&target, &message).await?;
                debug!(routing = %target, event_type = event.event_type(), "event scheduled to outbox");
            }
            ExternalizationMode::Broker => {
                let sender = self.sender.as_ref().ok_or_else(|| {
                    Error::Transport("broker mode selected but no sender configured".to_string())
                })?;
                sender.send(&target, &message).await?;
                debug!(routing = %target, event_type = event.event_type(), "event sent to broker");
            }
        }
        Ok(())
    }
}
