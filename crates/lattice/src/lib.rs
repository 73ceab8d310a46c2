// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)
// Lattice - Modular-Monolith Runtime Toolkit

//! # Lattice
//!
//! Runtime toolkit for applications partitioned into logically separate
//! modules. Two tightly coupled cores:
//!
//! - **Module model and verifier**: derives a module graph from compiled
//!   artifact metadata (modules, named interfaces, allowed dependencies,
//!   typed references, listener relationships) and checks it against
//!   architectural rules.
//! - **Event publication registry**: a transactional, durable log of
//!   in-flight event deliveries with at-least-once dispatch to in-process
//!   listeners and external brokers, completion tracking, staleness
//!   detection, and restart resubmission over pluggable stores.
//!
//! Both cores correlate through stable identifiers: the
//! [`ApplicationModuleIdentifier`] and the [`PublicationTargetIdentifier`].
//!
//! ## Module model
//!
//! ```rust
//! use lattice::{ApplicationModules, StaticTypeProvider, TypeDescriptor, TypeReference};
//!
//! let provider = StaticTypeProvider::new()
//!     .with_type(
//!         TypeDescriptor::new("shop.orders.OrderService")
//!             .with_reference(TypeReference::type_use("shop.inventory.InventoryService")),
//!     )
//!     .with_type(TypeDescriptor::new("shop.inventory.InventoryService"));
//!
//! let modules = ApplicationModules::of(&provider, "shop")?;
//! modules.verify()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Durable event publications
//!
//! ```rust,no_run
//! use lattice::{
//!     DomainEvent, EventMulticaster, MemoryEventPublicationStore, PublicationRegistry,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> lattice::Result<()> {
//! let store = Arc::new(MemoryEventPublicationStore::new());
//! let registry = Arc::new(PublicationRegistry::new(store));
//! let multicaster = EventMulticaster::new(registry.clone());
//!
//! multicaster
//!     .publish(DomainEvent::new("order.completed", serde_json::json!({"orderId": "42"})))
//!     .await?;
//! assert!(registry.find_incomplete().await?.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod event;
pub mod externalization;
pub mod ids;
pub mod modules;
pub mod multicaster;
pub mod publication;
pub mod registry;
pub mod store;
pub mod supervisor;
pub mod verifier;

pub use catalog::{
    Annotation, PackageInfo, ReferenceKind, StaticTypeProvider, TypeCatalog, TypeDescriptor,
    TypeProvider, TypeReference,
};
pub use config::{
    CompletionMode, DetectionStrategySelector, ExternalizationConfig, ExternalizationMode,
    LatticeConfig,
};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventSerializer, JsonEventSerializer};
pub use externalization::{
    BrokerSender, EventExternalizer, ExpressionEvaluator, ExternalizedMessage, JsonPathEvaluator,
    MessageBody, Outbox,
};
pub use ids::{
    ApplicationModuleIdentifier, ParsedRoutingTarget, PublicationTargetIdentifier, RoutingTarget,
};
pub use modules::{
    ApplicationModule, ApplicationModules, DeclaredDependency, DependencyType,
    DirectSubPackagesStrategy, ExplicitlyAnnotatedStrategy, ExportVerbosity,
    ModuleDetectionStrategy, NamedInterface, SystemMetadata,
};
pub use multicaster::{
    DispatchMode, EventListener, EventMulticaster, EventSink, FunctionalEventListener,
};
pub use publication::{EventPublication, PublicationStatus};
pub use registry::PublicationRegistry;
pub use store::{EventPublicationStore, MemoryEventPublicationStore};
pub use supervisor::{DistributedLock, LocalLock, LockLease, PublicationSupervisor};
pub use verifier::Violations;
