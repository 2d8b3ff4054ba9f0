//! # sync-types
//!
//! Wire format types for the Homestock batch sync protocol.
//!
//! This crate provides the foundational types used across all Homestock sync crates:
//! - [`EntityId`], [`HomeId`], [`DeviceId`] - Identity types
//! - [`EntityType`] - The synced collections, in their wire spelling
//! - [`BatchSyncRequest`] / [`BatchSyncResponse`] - The single combined push+pull call
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod entity_type;
mod error;
mod ids;
mod messages;

pub use entity_type::EntityType;
pub use error::WireError;
pub use ids::{DeviceId, EntityId, HomeId};
pub use messages::{
    BatchSyncRequest, BatchSyncResponse, PendingEnvelope, PullCheckpoint, PullRequest,
    PullResult, PushOutcome, PushRequest, PushResultSet, PushStatus, Winner, WireEntity,
};
