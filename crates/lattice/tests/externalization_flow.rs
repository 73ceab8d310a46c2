// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! End-to-end externalization through the multicaster: broker mode and
//! outbox mode.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use lattice::{
    BrokerSender, DomainEvent, EventExternalizer, EventMulticaster, ExternalizationConfig,
    ExternalizationMode, ExternalizedMessage, MemoryEventPublicationStore, Outbox,
    PublicationRegistry, Result, RoutingTarget,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(RoutingTarget, ExternalizedMessage)>>,
}

#[async_trait::async_trait]
impl BrokerSender for RecordingSender {
    async fn send(&self, target: &RoutingTarget, message: &ExternalizedMessage) -> Result<()> {
        self.sent.lock().push((target.clone(), message.clone()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingOutbox {
    scheduled: Mutex<Vec<(RoutingTarget, ExternalizedMessage)>>,
}

#[async_trait::async_trait]
impl Outbox for RecordingOutbox {
    async fn schedule(&self, target: &RoutingTarget, message: &ExternalizedMessage) -> Result<()> {
        self.scheduled.lock().push((target.clone(), message.clone()));
        Ok(())
    }
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
async fn outbox_mode_schedules_within_the_transaction() {
    let store = Arc::new(MemoryEventPublicationStore::new());
    let registry = Arc::new(PublicationRegistry::new(store.clone()));
    let multicaster = EventMulticaster::new(registry.clone());

    let sender = Arc::new(RecordingSender::default());
    let outbox = Arc::new(RecordingOutbox::default());
    let config = ExternalizationConfig {
        mode: ExternalizationMode::Outbox,
        ..ExternalizationConfig::default()
    };
    multicaster.register_listener(Arc::new(
        EventExternalizer::new(config)
            .with_sender(sender.clone())
            .with_outbox(outbox.clone()),
    ));

    multicaster
        .publish(
            DomainEvent::new("order.completed", json!({"id": "7"}))
                .externalized_to("orders::#{payload.id}"),
        )
        .await
        .unwrap();

    // Exactly one outbox schedule with the evaluated key; the broker
    // sender was never touched.
    let scheduled = outbox.scheduled.lock();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].0.target(), "orders");
    assert_eq!(scheduled[0].0.key(), Some("7"));
    assert!(sender.sent.lock().is_empty());

    // The outbox write ran synchronously, so the publication completed
    // before publish returned.
    assert!(registry.find_incomplete().await.unwrap().is_empty());
}

#[tokio::test]
async fn broker_mode_sends_after_commit_and_completes() {
    let store = Arc::new(MemoryEventPublicationStore::new());
    let registry = Arc::new(PublicationRegistry::new(store.clone()));
    let multicaster = EventMulticaster::new(registry.clone());

    let sender = Arc::new(RecordingSender::default());
    multicaster.register_listener(Arc::new(
        EventExternalizer::new(ExternalizationConfig::default()).with_sender(sender.clone()),
    ));

    multicaster
        .publish(
            DomainEvent::new("order.completed", json!({"id": "7"}))
                .externalized_to("orders::#{payload.id}"),
        )
        .await
        .unwrap();

    eventually(|| {
        let registry = registry.clone();
        async move { registry.find_incomplete().await.unwrap().is_empty() }
    })
    .await;

    let sent = sender.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.key(), Some("7"));
}

#[tokio::test]
async fn non_externalized_events_bypass_the_router() {
    let store = Arc::new(MemoryEventPublicationStore::new());
    let registry = Arc::new(PublicationRegistry::new(store.clone()));
    let multicaster = EventMulticaster::new(registry.clone());

    let sender = Arc::new(RecordingSender::default());
    multicaster.register_listener(Arc::new(
        EventExternalizer::new(ExternalizationConfig::default()).with_sender(sender.clone()),
    ));

    multicaster
        .publish(DomainEvent::new("order.completed", json!({"id": "7"})))
        .await
        .unwrap();

    // No declaration, no routing, no publication.
    assert!(store.is_empty());
    assert!(sender.sent.lock().is_empty());
}
