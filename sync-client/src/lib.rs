//! # sync-client
//!
//! Client library for Homestock offline-first sync.
//!
//! This is the main library that applications use to keep their local
//! collections in step with the sync authority.
//!
//! ## Features
//!
//! - **Offline-first**: every edit lands in the local store first and is
//!   pushed later
//! - **Race-safe merges**: collections are re-read after each round trip
//! - **Transport Abstraction**: HTTP, in-process loopback, mock
//! - **Pure core**: merge rules and scheduling come from sync-core
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sync_client::{FixedDeviceId, HttpTransport, JsonFileStore, SyncConfig, SyncOrchestrator};
//!
//! let config = SyncConfig::from_file("sync.toml".as_ref())?;
//! let orchestrator = SyncOrchestrator::new(
//!     Arc::new(JsonFileStore::new("data")),
//!     Arc::new(HttpTransport::new(&config.http)?),
//!     Arc::new(FixedDeviceId::random()),
//!     config.registry()?,
//! );
//!
//! let report = orchestrator.run_cycle().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod repository;
pub mod scheduler;
pub mod store;
pub mod transport;

pub use config::{ConfigError, HttpConfig, ScheduleConfig, SyncConfig};
pub use device::{DeviceIdProvider, FixedDeviceId};
pub use engine::{engine_for, EntitySync, SyncEngine};
pub use error::ClientError;
pub use orchestrator::{CycleReport, PairFailure, SyncEvent, SyncOrchestrator};
pub use repository::LocalRepository;
pub use scheduler::{CycleRunner, SchedulerHandle, SyncScheduler};
pub use store::{EntityStore, JsonFileStore, MemoryStore, StoreError, StoredCollection};
pub use transport::{
    HttpTransport, LoopbackRemote, MockTransport, RemoteSyncTransport, ServerRecord,
    TransportError,
};
