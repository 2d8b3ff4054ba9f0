//! # sync-core
//!
//! Pure logic for Homestock sync (no I/O, instant tests).
//!
//! This crate implements the record lifecycle, merge rules and scheduling
//! state machine for sync without any network or disk I/O, enabling fast
//! unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (storage, network, timers) is performed by `sync-client`,
//! which reads collections, calls the merge functions here and writes the
//! result back.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod collection;
pub mod cycle;
pub mod delta;
pub mod entity;
pub mod mapping;
pub mod merge;
pub mod model;
pub mod registry;

pub use checkpoint::Checkpoint;
pub use collection::LocalCollection;
pub use cycle::{
    CycleAction, CycleEvent, CycleState, Debounce, TriggerKind, DEFAULT_DEBOUNCE,
    DEFAULT_PERIODIC_INTERVAL,
};
pub use delta::{DeltaAccumulator, Keyed, Patch, SyncDelta};
pub use entity::{DeleteOutcome, LifecycleError, Record, SyncMeta};
pub use mapping::{MappingError, SyncableEntity, ValidationError, WireMeta};
pub use merge::{apply_pull, apply_push_outcomes, build_push, MergeError, PushBatch};
pub use model::{
    Category, CategoryEntity, CategoryFields, CategoryUpdate, Home, HomeEntity, HomeFields,
    HomeUpdate, InventoryItem, InventoryItemEntity, InventoryItemFields, InventoryItemUpdate,
    Location, LocationEntity, LocationFields, LocationUpdate, NewTodo, Settings, SettingsEntity,
    SettingsFields, SettingsUpdate, Theme, Todo, TodoCategory, TodoCategoryEntity,
    TodoCategoryFields, TodoCategoryUpdate, TodoEntity, TodoFields, TodoUpdate,
};
pub use registry::{EntityDescriptor, EntityRegistry, Permission, RegistryBuilder, RegistryError};
