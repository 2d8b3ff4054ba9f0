//! Registry of synced entity types.
//!
//! The registry fixes the order in which a home's collections are synced.
//! `homes` always comes first: a child record pushed before its home exists
//! on the server would be rejected.

use serde_json::Value;
use sync_types::EntityType;
use thiserror::Error;

use crate::mapping::{validate_wire, SyncableEntity, ValidationError};
use crate::model::{
    CategoryEntity, HomeEntity, InventoryItemEntity, LocationEntity, SettingsEntity,
    TodoCategoryEntity, TodoEntity,
};

/// Registry construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// `homes` was not registered.
    #[error("the homes entity type must be registered")]
    MissingHomes,

    /// An entity type was registered twice.
    #[error("entity type registered twice: {0}")]
    Duplicate(EntityType),
}

/// Role required to read or write a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    /// Any member, including read-only guests
    Viewer,
    /// Regular household member
    Member,
    /// Home owner
    Owner,
}

/// Payload validator stored in a descriptor.
pub type Validator = fn(&Value) -> Result<(), ValidationError>;

/// Static description of one entity type.
#[derive(Debug, Clone, Copy)]
pub struct EntityDescriptor {
    /// Collection described
    pub entity_type: EntityType,
    /// Whether deletes leave tombstones
    pub supports_soft_delete: bool,
    /// Role needed to read
    pub read_permission: Permission,
    /// Role needed to write
    pub write_permission: Permission,
    /// Validates a wire payload
    pub validate: Validator,
}

impl EntityDescriptor {
    /// Describe `E` with member-level write access.
    pub fn of<E: SyncableEntity>() -> Self {
        Self {
            entity_type: E::ENTITY_TYPE,
            supports_soft_delete: E::SUPPORTS_SOFT_DELETE,
            read_permission: Permission::Viewer,
            write_permission: Permission::Member,
            validate: validate_wire::<E>,
        }
    }

    /// Override the write permission.
    pub fn with_write_permission(mut self, permission: Permission) -> Self {
        self.write_permission = permission;
        self
    }

    /// Override the read permission.
    pub fn with_read_permission(mut self, permission: Permission) -> Self {
        self.read_permission = permission;
        self
    }
}

/// Ordered set of entity types, `homes` first.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    ordered: Vec<EntityDescriptor>,
}

impl EntityRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// All seven Homestock collections.
    pub fn standard() -> Self {
        Self {
            ordered: vec![
                EntityDescriptor::of::<HomeEntity>().with_write_permission(Permission::Owner),
                EntityDescriptor::of::<CategoryEntity>(),
                EntityDescriptor::of::<LocationEntity>(),
                EntityDescriptor::of::<InventoryItemEntity>(),
                EntityDescriptor::of::<TodoEntity>(),
                EntityDescriptor::of::<TodoCategoryEntity>(),
                EntityDescriptor::of::<SettingsEntity>().with_write_permission(Permission::Owner),
            ],
        }
    }

    /// The standard descriptors for just the listed types.
    ///
    /// An empty list selects every type. The list must include `homes`.
    pub fn standard_subset(types: &[EntityType]) -> Result<Self, RegistryError> {
        if types.is_empty() {
            return Ok(Self::standard());
        }
        let standard = Self::standard();
        let mut builder = Self::builder();
        for entity_type in types {
            if let Some(descriptor) = standard.get(*entity_type) {
                builder = builder.register(*descriptor);
            }
        }
        builder.build()
    }

    /// Descriptors in sync order.
    pub fn ordered(&self) -> &[EntityDescriptor] {
        &self.ordered
    }

    /// Entity types in sync order.
    pub fn entity_types(&self) -> impl Iterator<Item = EntityType> + '_ {
        self.ordered.iter().map(|d| d.entity_type)
    }

    /// Look up one descriptor.
    pub fn get(&self, entity_type: EntityType) -> Option<&EntityDescriptor> {
        self.ordered.iter().find(|d| d.entity_type == entity_type)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Always false for a built registry; `homes` is mandatory.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Builder for [`EntityRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    descriptors: Vec<EntityDescriptor>,
}

impl RegistryBuilder {
    /// Add an entity type. Order of registration is sync order after `homes`.
    pub fn register(mut self, descriptor: EntityDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Validate and freeze the ordering.
    pub fn build(self) -> Result<EntityRegistry, RegistryError> {
        let mut seen = Vec::with_capacity(self.descriptors.len());
        for d in &self.descriptors {
            if seen.contains(&d.entity_type) {
                return Err(RegistryError::Duplicate(d.entity_type));
            }
            seen.push(d.entity_type);
        }

        let (homes, rest): (Vec<_>, Vec<_>) = self
            .descriptors
            .into_iter()
            .partition(|d| d.entity_type == EntityType::Homes);
        if homes.is_empty() {
            return Err(RegistryError::MissingHomes);
        }

        let ordered: Vec<_> = homes.into_iter().chain(rest).collect();
        debug_assert_eq!(ordered[0].entity_type, EntityType::Homes);
        Ok(EntityRegistry { ordered })
    }
}
