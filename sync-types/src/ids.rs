//! Identity types for Homestock sync.
//!
//! Ids are opaque strings on the wire. Locally generated ids are UUID v4;
//! ids minted by the server are accepted verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing id string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a single synced record.
    EntityId,
    "EntityId"
);

string_id!(
    /// Identifier of a home, the tenant/partition boundary.
    HomeId,
    "HomeId"
);

string_id!(
    /// Identifier of the device issuing sync requests.
    DeviceId,
    "DeviceId"
);

impl EntityId {
    /// Generate a new random id (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl DeviceId {
    /// Create a new random DeviceId.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl HomeId {
    /// The partition id a home record lives under is the home's own id.
    pub fn from_entity(id: &EntityId) -> Self {
        Self(id.as_str().to_string())
    }

    /// The home's own record id.
    pub fn as_entity(&self) -> EntityId {
        EntityId(self.0.clone())
    }
}
