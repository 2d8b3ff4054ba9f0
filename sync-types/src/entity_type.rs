//! The synced collections.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::WireError;

/// A synced collection, spelled the way the server names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    /// Homes (the tenant records themselves)
    Homes,
    /// Inventory categories
    Categories,
    /// Storage locations
    Locations,
    /// Inventory items
    InventoryItems,
    /// Todo items
    Todos,
    /// Todo categories
    TodoCategories,
    /// Per-home settings
    Settings,
}

impl EntityType {
    /// Every entity type, homes first.
    pub const ALL: [EntityType; 7] = [
        EntityType::Homes,
        EntityType::Categories,
        EntityType::Locations,
        EntityType::InventoryItems,
        EntityType::Todos,
        EntityType::TodoCategories,
        EntityType::Settings,
    ];

    /// Wire name of this entity type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Homes => "homes",
            EntityType::Categories => "categories",
            EntityType::Locations => "locations",
            EntityType::InventoryItems => "inventoryItems",
            EntityType::Todos => "todos",
            EntityType::TodoCategories => "todoCategories",
            EntityType::Settings => "settings",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| WireError::UnknownEntityType(s.to_string()))
    }
}
