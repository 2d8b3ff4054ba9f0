//! Pull cursor tracking.
//!
//! A [`Checkpoint`] is persisted per (home, entity type) alongside the
//! collection. The version only moves forward and only when the server
//! says so; the sync time follows every applied response.

use chrono::{DateTime, Utc};
use sync_types::PullCheckpoint;

/// Durable pull cursor for one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// Highest change version pulled
    pub last_pulled_version: u64,
    /// Server timestamp of the last applied response
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Restore from stored values.
    pub fn new(last_pulled_version: Option<u64>, last_sync_time: Option<DateTime<Utc>>) -> Self {
        Self {
            last_pulled_version: last_pulled_version.unwrap_or(0),
            last_sync_time,
        }
    }

    /// The cursor to send in pull and push requests.
    pub fn pull_checkpoint(&self) -> PullCheckpoint {
        PullCheckpoint {
            last_pulled_version: self.last_pulled_version,
        }
    }

    /// Apply a server response.
    ///
    /// Returns true if the pulled version moved forward.
    pub fn advance(
        &mut self,
        server: Option<PullCheckpoint>,
        server_timestamp: DateTime<Utc>,
    ) -> bool {
        self.last_sync_time = Some(server_timestamp);
        match server {
            Some(cp) if cp.last_pulled_version > self.last_pulled_version => {
                self.last_pulled_version = cp.last_pulled_version;
                true
            }
            _ => false,
        }
    }
}
