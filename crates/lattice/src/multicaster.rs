// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Event multicaster
//!
//! Intercepts event publication. Within the business transaction the
//! multicaster resolves supporting listeners, persists one publication per
//! listener as a single atomic batch, and dispatches synchronous listeners
//! on the caller's task. Asynchronous listeners are handed to a bounded
//! worker pool over a channel once the transaction commits.
//!
//! A successful listener return completes the matching publication with an
//! independent store commit; a failure leaves the publication incomplete
//! for the supervisor to retry.
//!
//! Re-entrancy: an event published by a synchronous listener (through its
//! [`EventSink`]) joins the surrounding transaction and is processed after
//! the current listener returns. An event published by an asynchronous
//! listener starts a business transaction of its own, since the async
//! boundary sits after the original commit.

use crate::error::{Error, Result};
use crate::event::{DomainEvent, EventSerializer, JsonEventSerializer};
use crate::ids::PublicationTargetIdentifier;
use crate::publication::EventPublication;
use crate::registry::PublicationRegistry;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};
use uuid::Uuid;

/// Default upper bound on concurrently running asynchronous dispatches.
pub const DEFAULT_ASYNC_CONCURRENCY: usize = 8;

/// How a listener wants to be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// On the publisher's task, inside the business transaction.
    Synchronous,
    /// On the worker pool, after the business transaction commits.
    Asynchronous,
}

/// Collects events published while a listener runs.
///
/// Synchronous listeners use it to publish follow-up events into the
/// surrounding transaction; asynchronous listeners get a fresh transaction
/// per collected event.
#[derive(Debug, Default)]
pub struct EventSink {
    queue: Mutex<VecDeque<DomainEvent>>,
}

impl EventSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages an event for publication after the current listener returns.
    pub fn publish(&self, event: DomainEvent) {
        self.queue.lock().push_back(event);
    }

    fn drain(&self) -> Vec<DomainEvent> {
        self.queue.lock().drain(..).collect()
    }
}

/// An in-process event listener.
#[async_trait::async_trait]
pub trait EventListener: Send + Sync {
    /// Stable identifier; becomes the publication target.
    fn id(&self) -> PublicationTargetIdentifier;

    /// Whether the listener runs on the publisher's task or the pool.
    fn dispatch_mode(&self) -> DispatchMode {
        DispatchMode::Synchronous
    }

    /// Whether the listener wants the given event.
    fn supports(&self, _event: &DomainEvent) -> bool {
        true
    }

    /// Handles one event. Follow-up events go through the sink.
    async fn handle(&self, event: &DomainEvent, sink: &EventSink) -> Result<()>;
}

type HandlerFn = dyn Fn(&DomainEvent) -> futures::future::BoxFuture<'static, Result<()>>
    + Send
    + Sync;
type SupportsFn = dyn Fn(&DomainEvent) -> bool + Send + Sync;

/// Closure-backed [`EventListener`], convenient for wiring and tests.
pub struct FunctionalEventListener {
    id: PublicationTargetIdentifier,
    mode: DispatchMode,
    supports: Option<Box<SupportsFn>>,
    handler: Box<HandlerFn>,
}

impl FunctionalEventListener {
    /// Creates a synchronous listener from a handler closure.
    pub fn new<F>(id: PublicationTargetIdentifier, handler: F) -> Self
    where
        F: Fn(&DomainEvent) -> futures::future::BoxFuture<'static, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id,
            mode: DispatchMode::Synchronous,
            supports: None,
            handler: Box::new(handler),
        }
    }

    /// Switches the listener to asynchronous dispatch.
    pub fn asynchronous(mut self) -> Self {
        self.mode = DispatchMode::Asynchronous;
        self
    }

    /// Restricts the events the listener receives.
    pub fn with_supports<F>(mut self, supports: F) -> Self
    where
        F: Fn(&DomainEvent) -> bool + Send + Sync + 'static,
    {
        self.supports = Some(Box::new(supports));
        self
    }
}

#[async_trait::async_trait]
impl EventListener for FunctionalEventListener {
    fn id(&self) -> PublicationTargetIdentifier {
        self.id.clone()
    }

    fn dispatch_mode(&self) -> DispatchMode {
        self.mode
    }

    fn supports(&self, event: &DomainEvent) -> bool {
        self.supports.as_ref().map_or(true, |f| f(event))
    }

    async fn handle(&self, event: &DomainEvent, _sink: &EventSink) -> Result<()> {
        (self.handler)(event).await
    }
}

/// One unit of after-commit work: an event bound for one async listener
/// whose publication is already persisted.
struct AsyncDispatch {
    event: DomainEvent,
    serialized: String,
    listener: Arc<dyn EventListener>,
    publication_id: Uuid,
    /// Span captured at enqueue time so worker logs correlate with the
    /// publishing request.
    span: Span,
}

/// Channel handle that counts outstanding after-commit work, so shutdown
/// can tell queued-but-unstarted dispatches from a drained pool.
#[derive(Clone)]
struct Handoff {
    tx: mpsc::UnboundedSender<AsyncDispatch>,
    outstanding: Arc<AtomicUsize>,
}

impl Handoff {
    fn send(&self, dispatch: AsyncDispatch) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(dispatch).is_err() {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            warn!("worker pool is gone; async publication stays incomplete until restart");
        }
    }

    fn finish(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Dispatch machinery shared between the publisher path and the worker
/// pool.
struct Core {
    registry: Arc<PublicationRegistry>,
    serializer: Arc<dyn EventSerializer>,
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl Core {
    /// Runs one business transaction: registers and synchronously
    /// dispatches the event and everything synchronous listeners publish
    /// re-entrantly. Returns the async work to hand off after commit.
    async fn publish_transaction(&self, initial: DomainEvent) -> Result<Vec<AsyncDispatch>> {
        let mut queue = VecDeque::from([initial]);
        let mut async_dispatches = Vec::new();

        while let Some(event) = queue.pop_front() {
            let listeners: Vec<Arc<dyn EventListener>> = self
                .listeners
                .read()
                .iter()
                .filter(|l| l.supports(&event))
                .cloned()
                .collect();
            if listeners.is_empty() {
                debug!(event_type = event.event_type(), "no listeners for event");
                continue;
            }

            let serialized = self.serializer.serialize(&event)?;
            let targets: Vec<PublicationTargetIdentifier> =
                listeners.iter().map(|l| l.id()).collect();
            // Persistence failure aborts the whole business transaction.
            let publications = self
                .registry
                .register(event.event_type(), &serialized, &targets)
                .await?;

            for (listener, publication) in listeners.iter().zip(publications.iter()) {
                match listener.dispatch_mode() {
                    DispatchMode::Synchronous => {
                        self.dispatch_sync(&event, &serialized, listener, publication, &mut queue)
                            .await;
                    }
                    DispatchMode::Asynchronous => async_dispatches.push(AsyncDispatch {
                        event: event.clone(),
                        serialized: serialized.clone(),
                        listener: listener.clone(),
                        publication_id: publication.id(),
                        span: Span::current(),
                    }),
                }
            }
        }

        Ok(async_dispatches)
    }

    async fn dispatch_sync(
        &self,
        event: &DomainEvent,
        serialized: &str,
        listener: &Arc<dyn EventListener>,
        publication: &EventPublication,
        queue: &mut VecDeque<DomainEvent>,
    ) {
        if let Err(error) = self.registry.mark_processing(publication.id()).await {
            warn!(id = %publication.id(), %error, "failed to mark publication processing");
        }

        let sink = EventSink::new();
        match listener.handle(event, &sink).await {
            Ok(()) => self.complete(serialized, &listener.id()).await,
            Err(error) => warn!(
                listener = %listener.id(),
                event_type = event.event_type(),
                %error,
                "listener failed; publication left incomplete"
            ),
        }
        // Re-entrant publications join this transaction and are processed
        // after the current listener has returned.
        queue.extend(sink.drain());
    }

    /// Completes in its own store commit, so it survives a later abort of
    /// the surrounding business operation. A completion failure is logged
    /// and left for the supervisor.
    async fn complete(&self, serialized: &str, target: &PublicationTargetIdentifier) {
        if let Err(error) = self.registry.mark_completed(serialized, target).await {
            warn!(listener = %target, %error, "failed to complete publication");
        }
    }

    async fn dispatch_async(&self, dispatch: AsyncDispatch, follow_up: &Handoff) {
        if let Err(error) = self.registry.mark_processing(dispatch.publication_id).await {
            warn!(id = %dispatch.publication_id, %error, "failed to mark publication processing");
        }

        let sink = EventSink::new();
        match dispatch.listener.handle(&dispatch.event, &sink).await {
            Ok(()) => {
                self.complete(&dispatch.serialized, &dispatch.listener.id())
                    .await
            }
            Err(error) => warn!(
                listener = %dispatch.listener.id(),
                event_type = dispatch.event.event_type(),
                %error,
                "async listener failed; publication left incomplete"
            ),
        }

        // Events published by an async listener start their own business
        // transactions; the original one committed long ago.
        for event in sink.drain() {
            match self.publish_transaction(event).await {
                Ok(dispatches) => {
                    for dispatch in dispatches {
                        follow_up.send(dispatch);
                    }
                }
                Err(error) => warn!(%error, "re-entrant publication from async listener failed"),
            }
        }
    }
}

/// The event multicaster.
///
/// Construction spawns the worker-pool drain task, so a Tokio runtime
/// must be current.
pub struct EventMulticaster {
    core: Arc<Core>,
    handoff: Handoff,
    shutdown_tx: watch::Sender<bool>,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl EventMulticaster {
    /// Creates a multicaster with the JSON serializer and default pool
    /// bound.
    pub fn new(registry: Arc<PublicationRegistry>) -> Self {
        Self::with_serializer(registry, Arc::new(JsonEventSerializer::new()))
    }

    /// Creates a multicaster with an explicit serializer.
    pub fn with_serializer(
        registry: Arc<PublicationRegistry>,
        serializer: Arc<dyn EventSerializer>,
    ) -> Self {
        Self::build(registry, serializer, DEFAULT_ASYNC_CONCURRENCY)
    }

    /// Creates a multicaster with an explicit async concurrency bound.
    pub fn with_async_concurrency(
        registry: Arc<PublicationRegistry>,
        serializer: Arc<dyn EventSerializer>,
        concurrency: usize,
    ) -> Self {
        Self::build(registry, serializer, concurrency.max(1))
    }

    fn build(
        registry: Arc<PublicationRegistry>,
        serializer: Arc<dyn EventSerializer>,
        concurrency: usize,
    ) -> Self {
        let core = Arc::new(Core {
            registry,
            serializer,
            listeners: RwLock::new(Vec::new()),
        });
        let (async_tx, async_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handoff = Handoff {
            tx: async_tx,
            outstanding: Arc::new(AtomicUsize::new(0)),
        };

        let drain_task = tokio::spawn(Self::drain(
            async_rx,
            handoff.clone(),
            core.clone(),
            Arc::new(Semaphore::new(concurrency)),
            shutdown_rx,
        ));

        Self {
            core,
            handoff,
            shutdown_tx,
            drain_task: Mutex::new(Some(drain_task)),
        }
    }

    /// Registers a listener. Registration order is the dispatch and
    /// publication order for each event.
    pub fn register_listener(&self, listener: Arc<dyn EventListener>) {
        self.core.listeners.write().push(listener);
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.core.listeners.read().len()
    }

    /// Publishes an event: one business transaction covering publication
    /// persistence and synchronous dispatch, then after-commit handoff of
    /// asynchronous work.
    ///
    /// # Errors
    /// Fails when serialization or publication persistence fails; the
    /// business transaction is considered rolled back in that case.
    pub async fn publish(&self, event: DomainEvent) -> Result<()> {
        let dispatches = self.core.publish_transaction(event).await?;
        for dispatch in dispatches {
            self.handoff.send(dispatch);
        }
        Ok(())
    }

    /// Re-dispatches a stored publication to its target listener.
    ///
    /// Used by the supervisor for restart resubmission and retries.
    pub async fn resubmit(&self, publication: &EventPublication) -> Result<()> {
        let event = self
            .core
            .serializer
            .deserialize(publication.serialized_event(), publication.event_type())?;
        let listener = self
            .core
            .listeners
            .read()
            .iter()
            .find(|l| &l.id() == publication.target())
            .cloned()
            .ok_or_else(|| {
                Error::Listener(format!(
                    "no listener registered for target '{}'",
                    publication.target()
                ))
            })?;

        self.core.registry.mark_resubmitted(publication.id()).await?;
        if let Err(error) = self.core.registry.mark_processing(publication.id()).await {
            warn!(id = %publication.id(), %error, "failed to mark publication processing");
        }

        let sink = EventSink::new();
        let outcome = listener.handle(&event, &sink).await;
        match &outcome {
            Ok(()) => {
                self.core
                    .complete(publication.serialized_event(), publication.target())
                    .await
            }
            Err(error) => warn!(
                id = %publication.id(),
                listener = %publication.target(),
                %error,
                "resubmitted listener failed; publication stays incomplete"
            ),
        }

        // Follow-up events from a resubmitted listener are fresh
        // transactions.
        for follow_up in sink.drain() {
            self.publish(follow_up).await?;
        }

        outcome
    }

    /// Stops intake, waits up to `grace` for queued and in-flight async
    /// dispatches, then logs the incomplete-publication diagnostic.
    ///
    /// Returns the number of publications still incomplete.
    pub async fn shutdown(&self, grace: Duration) -> Result<usize> {
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + grace;
        while self.handoff.outstanding.load(Ordering::SeqCst) > 0
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let left_over = self.handoff.outstanding.load(Ordering::SeqCst);
        if left_over > 0 {
            warn!(
                outstanding = left_over,
                "async dispatches still running after shutdown grace period"
            );
        }

        if let Some(task) = self.drain_task.lock().take() {
            task.abort();
        }

        self.core.registry.report_incomplete_on_shutdown().await
    }

    async fn drain(
        mut rx: mpsc::UnboundedReceiver<AsyncDispatch>,
        handoff: Handoff,
        core: Arc<Core>,
        semaphore: Arc<Semaphore>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let spawn_dispatch = |dispatch: AsyncDispatch,
                              permit: tokio::sync::OwnedSemaphorePermit| {
            let core = core.clone();
            let handoff = handoff.clone();
            let span = dispatch.span.clone();
            tokio::spawn(
                async move {
                    let _permit = permit;
                    core.dispatch_async(dispatch, &handoff).await;
                    handoff.finish();
                }
                .instrument(span),
            );
        };

        loop {
            let dispatch = tokio::select! {
                biased;
                received = rx.recv() => match received {
                    Some(dispatch) => dispatch,
                    None => return,
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        // Stop intake, but run whatever was already
                        // queued before the signal arrived.
                        while let Ok(dispatch) = rx.try_recv() {
                            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                return;
                            };
                            spawn_dispatch(dispatch, permit);
                        }
                        info!("async dispatch intake stopped");
                        return;
                    }
                    continue;
                }
            };

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                return;
            };
            spawn_dispatch(dispatch, permit);
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EventPublicationStore, MemoryEventPublicationStore};
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn target(name: &str) -> PublicationTargetIdentifier {
        PublicationTargetIdentifier::of(name).unwrap()
    }

    fn setup() -> (EventMulticaster, Arc<PublicationRegistry>, Arc<MemoryEventPublicationStore>) {
        let store = Arc::new(MemoryEventPublicationStore::new());
        let registry = Arc::new(PublicationRegistry::new(store.clone()));
        let multicaster = EventMulticaster::new(registry.clone());
        (multicaster, registry, store)
    }

    fn counting_listener(
        name: &str,
        calls: Arc<AtomicU32>,
        fail: bool,
    ) -> Arc<FunctionalEventListener> {
        Arc::new(FunctionalEventListener::new(target(name), move |_event| {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err(Error::Listener("boom".to_string()))
                } else {
                    Ok(())
                }
            })
        }))
    }

    async fn eventually<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within two seconds");
    }

    #[tokio::test]
    async fn test_sync_listener_success_completes_publication() {
        let (multicaster, registry, store) = setup();
        let calls = Arc::new(AtomicU32::new(0));
        multicaster.register_listener(counting_listener("sync", calls.clone(), false));

        multicaster
            .publish(DomainEvent::new("order.completed", json!({"orderId": "42"})))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.find_incomplete().await.unwrap().is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_listener_leaves_publication_incomplete() {
        let (multicaster, registry, _) = setup();
        let calls = Arc::new(AtomicU32::new(0));
        multicaster.register_listener(counting_listener("failing", calls.clone(), true));

        multicaster
            .publish(DomainEvent::new("order.completed", json!({})))
            .await
            .unwrap();

        let incomplete = registry.find_incomplete().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].target(), &target("failing"));
    }

    #[tokio::test]
    async fn test_one_publication_per_listener_in_registration_order() {
        let (multicaster, _, store) = setup();
        let calls = Arc::new(AtomicU32::new(0));
        multicaster.register_listener(counting_listener("first", calls.clone(), true));
        multicaster.register_listener(counting_listener("second", calls.clone(), true));
        multicaster.register_listener(counting_listener("third", calls.clone(), true));

        multicaster
            .publish(DomainEvent::new("order.completed", json!({})))
            .await
            .unwrap();

        let incomplete = store.find_incomplete().await.unwrap();
        let targets: Vec<&str> = incomplete.iter().map(|p| p.target().as_str()).collect();
        assert_eq!(targets, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_unsupporting_listener_gets_no_publication() {
        let (multicaster, _, store) = setup();
        let calls = Arc::new(AtomicU32::new(0));
        let listener = FunctionalEventListener::new(target("picky"), {
            let calls = calls.clone();
            move |_| {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }
        })
        .with_supports(|event| event.event_type() == "order.completed");
        multicaster.register_listener(Arc::new(listener));

        multicaster
            .publish(DomainEvent::new("order.cancelled", json!({})))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_async_listener_completes_after_commit() {
        let (multicaster, registry, _) = setup();
        let calls = Arc::new(AtomicU32::new(0));
        let listener = Arc::new(
            FunctionalEventListener::new(target("async"), {
                let calls = calls.clone();
                move |_| {
                    let calls = calls.clone();
                    Box::pin(async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }
            })
            .asynchronous(),
        );
        multicaster.register_listener(listener);

        multicaster
            .publish(DomainEvent::new("order.completed", json!({})))
            .await
            .unwrap();

        eventually(|| {
            let registry = registry.clone();
            async move { registry.find_incomplete().await.unwrap().is_empty() }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reentrant_sync_publication_processed_in_same_transaction() {
        let (multicaster, registry, store) = setup();

        struct Cascading {
            id: PublicationTargetIdentifier,
        }
        #[async_trait::async_trait]
        impl EventListener for Cascading {
            fn id(&self) -> PublicationTargetIdentifier {
                self.id.clone()
            }
            fn supports(&self, event: &DomainEvent) -> bool {
                event.event_type() == "order.completed"
            }
            async fn handle(&self, _event: &DomainEvent, sink: &EventSink) -> Result<()> {
                sink.publish(DomainEvent::new("invoice.requested", json!({})));
                Ok(())
            }
        }

        let invoice_calls = Arc::new(AtomicU32::new(0));
        multicaster.register_listener(Arc::new(Cascading { id: target("cascading") }));
        multicaster.register_listener(Arc::new(
            FunctionalEventListener::new(target("invoicing"), {
                let invoice_calls = invoice_calls.clone();
                move |_| {
                    let invoice_calls = invoice_calls.clone();
                    Box::pin(async move {
                        invoice_calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }
            })
            .with_supports(|event| event.event_type() == "invoice.requested"),
        ));

        multicaster
            .publish(DomainEvent::new("order.completed", json!({})))
            .await
            .unwrap();

        // Both the original and the re-entrant event were registered and
        // completed before publish returned.
        assert_eq!(invoice_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 2);
        assert!(registry.find_incomplete().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resubmit_retries_failed_listener() {
        let (multicaster, registry, _) = setup();
        let attempts = Arc::new(AtomicU32::new(0));
        let listener = Arc::new(FunctionalEventListener::new(target("flaky"), {
            let attempts = attempts.clone();
            move |_| {
                let attempts = attempts.clone();
                Box::pin(async move {
                    // Fail on the first call, succeed afterwards.
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(Error::Listener("first attempt fails".to_string()))
                    } else {
                        Ok(())
                    }
                })
            }
        }));
        multicaster.register_listener(listener);

        multicaster
            .publish(DomainEvent::new("order.completed", json!({"orderId": "42"})))
            .await
            .unwrap();

        let incomplete = registry.find_incomplete().await.unwrap();
        assert_eq!(incomplete.len(), 1);

        multicaster.resubmit(&incomplete[0]).await.unwrap();
        assert!(registry.find_incomplete().await.unwrap().is_empty());

        let completed = registry.find_completed().await.unwrap();
        assert_eq!(completed[0].completion_attempts(), 1);
    }

    #[tokio::test]
    async fn test_resubmit_without_listener_errors() {
        let (multicaster, registry, _) = setup();
        let calls = Arc::new(AtomicU32::new(0));
        multicaster.register_listener(counting_listener("gone", calls, true));
        multicaster
            .publish(DomainEvent::new("order.completed", json!({})))
            .await
            .unwrap();

        let incomplete = registry.find_incomplete().await.unwrap();
        let orphan = EventPublication::new(
            "order.completed",
            incomplete[0].serialized_event(),
            target("never-registered"),
            chrono::Utc::now(),
            99,
        );
        assert!(multicaster.resubmit(&orphan).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_reports_incomplete_publications() {
        let (multicaster, _, _) = setup();
        let calls = Arc::new(AtomicU32::new(0));
        multicaster.register_listener(counting_listener("failing", calls, true));

        multicaster
            .publish(DomainEvent::new("order.completed", json!({})))
            .await
            .unwrap();

        let remaining = multicaster.shutdown(Duration::from_millis(100)).await.unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_async_work() {
        let (multicaster, registry, _) = setup();
        let listener = Arc::new(
            FunctionalEventListener::new(target("slow"), |_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(())
                })
            })
            .asynchronous(),
        );
        multicaster.register_listener(listener);

        multicaster
            .publish(DomainEvent::new("order.completed", json!({})))
            .await
            .unwrap();

        let remaining = multicaster.shutdown(Duration::from_secs(2)).await.unwrap();
        assert_eq!(remaining, 0);
        assert!(registry.find_incomplete().await.unwrap().is_empty());
    }
}
