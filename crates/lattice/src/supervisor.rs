// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Staleness and restart supervisor
//!
//! Two independent loops reconcile the publication registry:
//!
//! 1. A periodic scan failing publications older than the staleness
//!    threshold, spaced by the configured check interval.
//! 2. A restart-time pass re-dispatching incomplete publications through
//!    the multicaster, optionally guarded by a distributed lock so only
//!    one node of a cluster resubmits.
//!
//! Both loops honor the shutdown signal and stop without starting new
//! work. No lock is ever held while a listener or the store is invoked,
//! except the resubmission lock, which is scoped to the resubmission
//! pass by design of the contract.

use crate::config::LatticeConfig;
use crate::error::{Error, Result};
use crate::multicaster::EventMulticaster;
use crate::registry::PublicationRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default timeout for acquiring the resubmission lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Name under which the resubmission lock is acquired.
pub const RESUBMISSION_LOCK_NAME: &str = "lattice.event-publications.resubmission";

/// A held lock; released on drop.
pub trait LockLease: Send + Sync {}

/// Cluster-wide mutual exclusion contract.
#[async_trait::async_trait]
pub trait DistributedLock: Send + Sync {
    /// Acquires the named lock, waiting at most `timeout`.
    ///
    /// # Errors
    /// Returns `LockUnavailable` when the lock is not obtained in time.
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<Box<dyn LockLease>>;
}

struct LocalLease {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

impl LockLease for LocalLease {}

/// Process-local [`DistributedLock`] for single-node deployments and
/// tests.
#[derive(Clone, Default)]
pub struct LocalLock {
    inner: Arc<tokio::sync::Mutex<()>>,
}

impl LocalLock {
    /// Creates a fresh lock.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DistributedLock for LocalLock {
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<Box<dyn LockLease>> {
        match tokio::time::timeout(timeout, self.inner.clone().lock_owned()).await {
            Ok(guard) => Ok(Box::new(LocalLease { _guard: guard })),
            Err(_) => Err(Error::LockUnavailable(format!(
                "lock '{}' not acquired within {:?}",
                name, timeout
            ))),
        }
    }
}

/// Supervises publication staleness and restart resubmission.
pub struct PublicationSupervisor {
    registry: Arc<PublicationRegistry>,
    multicaster: Arc<EventMulticaster>,
    config: LatticeConfig,
    lock: Option<Arc<dyn DistributedLock>>,
    lock_timeout: Duration,
    check_interval_override: Option<Duration>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PublicationSupervisor {
    /// Creates a supervisor; nothing runs until [`start`](Self::start).
    pub fn new(
        registry: Arc<PublicationRegistry>,
        multicaster: Arc<EventMulticaster>,
        config: LatticeConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            multicaster,
            config,
            lock: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            check_interval_override: None,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Guards restart resubmission with the given lock.
    pub fn with_lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Overrides the lock acquisition timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Overrides the staleness check spacing, regardless of the
    /// configured seconds value.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval_override = Some(interval);
        self
    }

    fn check_interval(&self) -> Duration {
        self.check_interval_override
            .unwrap_or_else(|| self.config.staleness_check_interval())
            .max(Duration::from_millis(1))
    }

    /// Starts the loops the configuration enables.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();

        if self.config.republish_on_restart {
            let registry = self.registry.clone();
            let multicaster = self.multicaster.clone();
            let lock = self.lock.clone();
            let lock_timeout = self.lock_timeout;
            let shutdown_rx = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                resubmission_pass(registry, multicaster, lock, lock_timeout, shutdown_rx).await;
            }));
        } else {
            debug!("restart resubmission disabled");
        }

        if self.config.monitor_staleness {
            let registry = self.registry.clone();
            let threshold = self.config.staleness_threshold();
            let interval = self.check_interval();
            let shutdown_rx = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                staleness_loop(registry, threshold, interval, shutdown_rx).await;
            }));
        } else {
            debug!("staleness monitoring disabled");
        }
    }

    /// Signals shutdown and waits for the loops to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn staleness_loop(
    registry: Arc<PublicationRegistry>,
    threshold: chrono::Duration,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                match registry.mark_stale_publications_failed(threshold).await {
                    Ok(count) => info!(count, "staleness scan finished"),
                    Err(error) => warn!(%error, "staleness scan failed"),
                }
            }
        }
    }
}

async fn resubmission_pass(
    registry: Arc<PublicationRegistry>,
    multicaster: Arc<EventMulticaster>,
    lock: Option<Arc<dyn DistributedLock>>,
    lock_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
) {
    // The lease spans the whole pass and is dropped right after it.
    let _lease = match &lock {
        Some(lock) => match lock.acquire(RESUBMISSION_LOCK_NAME, lock_timeout).await {
            Ok(lease) => Some(lease),
            Err(error) => {
                info!(%error, "resubmission lock unavailable; skipping restart resubmission");
                return;
            }
        },
        None => None,
    };

    let incomplete = match registry.find_incomplete().await {
        Ok(incomplete) => incomplete,
        Err(error) => {
            warn!(%error, "could not enumerate incomplete publications");
            return;
        }
    };
    if incomplete.is_empty() {
        info!("no incomplete publications to resubmit");
        return;
    }

    info!(count = incomplete.len(), "resubmitting incomplete publications");
    let mut resubmitted = 0usize;
    for publication in incomplete {
        if *shutdown_rx.borrow() {
            info!(resubmitted, "resubmission interrupted by shutdown");
            return;
        }
        match multicaster.resubmit(&publication).await {
            Ok(()) => resubmitted += 1,
            Err(error) => warn!(
                id = %publication.id(),
                listener = %publication.target(),
                %error,
                "resubmission failed; publication stays incomplete"
            ),
        }
    }
    info!(resubmitted, "restart resubmission finished");
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DomainEvent;
    use crate::ids::PublicationTargetIdentifier;
    use crate::multicaster::FunctionalEventListener;
    use crate::store::{EventPublicationStore, MemoryEventPublicationStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn target(name: &str) -> PublicationTargetIdentifier {
        PublicationTargetIdentifier::of(name).unwrap()
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

    fn flaky_listener(attempts: Arc<AtomicU32>) -> Arc<FunctionalEventListener> {
        Arc::new(FunctionalEventListener::new(target("flaky"), move |_| {
            let attempts = attempts.clone();
            Box::pin(async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::Listener("first attempt fails".to_string()))
                } else {
                    Ok(())
                }
            })
        }))
    }

    #[tokio::test]
    async fn test_local_lock_times_out_when_held() {
        let lock = LocalLock::new();
        let lease = lock
            .acquire(RESUBMISSION_LOCK_NAME, Duration::from_millis(50))
            .await
            .unwrap();
        let second = lock
            .acquire(RESUBMISSION_LOCK_NAME, Duration::from_millis(50))
            .await;
        assert!(matches!(second, Err(Error::LockUnavailable(_))));

        drop(lease);
        assert!(lock
            .acquire(RESUBMISSION_LOCK_NAME, Duration::from_millis(50))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_restart_resubmission_completes_publication() {
        let store = Arc::new(MemoryEventPublicationStore::new());
        let registry = Arc::new(PublicationRegistry::new(store.clone()));
        let multicaster = Arc::new(EventMulticaster::new(registry.clone()));
        let attempts = Arc::new(AtomicU32::new(0));
        multicaster.register_listener(flaky_listener(attempts.clone()));

        multicaster
            .publish(DomainEvent::new("order.completed", json!({"orderId": "42"})))
            .await
            .unwrap();
        assert_eq!(registry.find_incomplete().await.unwrap().len(), 1);

        let supervisor = PublicationSupervisor::new(
            registry.clone(),
            multicaster,
            LatticeConfig::default().with_republish_on_restart(true),
        );
        supervisor.start();

        eventually(|| {
            let registry = registry.clone();
            async move { registry.find_incomplete().await.unwrap().is_empty() }
        })
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_lock_loser_skips_resubmission() {
        let store = Arc::new(MemoryEventPublicationStore::new());
        let registry = Arc::new(PublicationRegistry::new(store.clone()));
        let multicaster = Arc::new(EventMulticaster::new(registry.clone()));
        let attempts = Arc::new(AtomicU32::new(0));
        multicaster.register_listener(flaky_listener(attempts.clone()));

        multicaster
            .publish(DomainEvent::new("order.completed", json!({})))
            .await
            .unwrap();

        let lock = LocalLock::new();
        // Another node holds the lock for the whole test.
        let _held = lock
            .acquire(RESUBMISSION_LOCK_NAME, Duration::from_millis(50))
            .await
            .unwrap();

        let supervisor = PublicationSupervisor::new(
            registry.clone(),
            multicaster,
            LatticeConfig::default().with_republish_on_restart(true),
        )
        .with_lock(Arc::new(lock))
        .with_lock_timeout(Duration::from_millis(50));
        supervisor.start();
        supervisor.shutdown().await;

        // Only the original failed attempt happened; the pass was skipped.
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(registry.find_incomplete().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_staleness_loop_fails_old_publications() {
        let store = Arc::new(MemoryEventPublicationStore::new());
        let registry = Arc::new(PublicationRegistry::new(store.clone()));
        let multicaster = Arc::new(EventMulticaster::new(registry.clone()));
        let calls = Arc::new(AtomicU32::new(0));
        multicaster.register_listener(Arc::new(FunctionalEventListener::new(
            target("failing"),
            {
                let calls = calls.clone();
                move |_| {
                    let calls = calls.clone();
                    Box::pin(async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(Error::Listener("always fails".to_string()))
                    })
                }
            },
        )));

        multicaster
            .publish(DomainEvent::new("order.completed", json!({})))
            .await
            .unwrap();

        let config = LatticeConfig::default().with_staleness_monitoring(60, 0);
        let supervisor = PublicationSupervisor::new(registry.clone(), multicaster, config)
            .with_check_interval(Duration::from_millis(20));
        supervisor.start();

        eventually(|| {
            let store = store.clone();
            async move {
                store
                    .find_incomplete()
                    .await
                    .unwrap()
                    .iter()
                    .all(|p| p.status().is_terminal())
            }
        })
        .await;

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_loops() {
        let store = Arc::new(MemoryEventPublicationStore::new());
        let registry = Arc::new(PublicationRegistry::new(store));
        let multicaster = Arc::new(EventMulticaster::new(registry.clone()));
        let config = LatticeConfig::default()
            .with_republish_on_restart(true)
            .with_staleness_monitoring(60, 300);
        let supervisor = PublicationSupervisor::new(registry, multicaster, config)
            .with_check_interval(Duration::from_millis(20));
        supervisor.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        supervisor.shutdown().await;
    }
}
