//! The synced entity kinds.
//!
//! Each kind is a field struct (what travels as wire `data`), create and
//! update inputs, and a zero-sized marker implementing [`SyncableEntity`].
//! Update inputs use `None` for "leave unchanged"; optional fields take
//! `Some(None)` to clear them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sync_types::{EntityId, EntityType, HomeId};

use crate::entity::Record;
use crate::mapping::{require_text, SyncableEntity, ValidationError};

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

// ===========================================
// Homes
// ===========================================

/// Home fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeFields {
    /// Display name
    pub name: String,
    /// Street address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Home update input.
#[derive(Debug, Clone, Default)]
pub struct HomeUpdate {
    /// New name
    pub name: Option<String>,
    /// New address
    pub address: Option<Option<String>>,
}

/// A home record.
pub type Home = Record<HomeFields>;

/// Mapping for [`EntityType::Homes`].
///
/// A home's record id is its partition id.
#[derive(Debug, Clone, Copy, Default)]
pub struct HomeEntity;

impl SyncableEntity for HomeEntity {
    type Fields = HomeFields;
    type Create = HomeFields;
    type Update = HomeUpdate;
    const ENTITY_TYPE: EntityType = EntityType::Homes;

    fn create_fields(input: HomeFields, _now: DateTime<Utc>) -> HomeFields {
        input
    }

    fn update_fields(fields: &mut HomeFields, updates: HomeUpdate, _now: DateTime<Utc>) {
        set(&mut fields.name, updates.name);
        set(&mut fields.address, updates.address);
    }

    fn validate(fields: &HomeFields) -> Result<(), ValidationError> {
        require_text("name", &fields.name)
    }

    fn generate_id(home_id: &HomeId) -> EntityId {
        home_id.as_entity()
    }
}

// ===========================================
// Categories
// ===========================================

/// Inventory category fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryFields {
    /// Display name
    pub name: String,
    /// Icon name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// `#RRGGBB` color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Category update input.
#[derive(Debug, Clone, Default)]
pub struct CategoryUpdate {
    /// New name
    pub name: Option<String>,
    /// New icon
    pub icon: Option<Option<String>>,
    /// New color
    pub color: Option<Option<String>>,
}

/// A category record.
pub type Category = Record<CategoryFields>;

/// Mapping for [`EntityType::Categories`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryEntity;

impl SyncableEntity for CategoryEntity {
    type Fields = CategoryFields;
    type Create = CategoryFields;
    type Update = CategoryUpdate;
    const ENTITY_TYPE: EntityType = EntityType::Categories;

    fn create_fields(input: CategoryFields, _now: DateTime<Utc>) -> CategoryFields {
        input
    }

    fn update_fields(fields: &mut CategoryFields, updates: CategoryUpdate, _now: DateTime<Utc>) {
        set(&mut fields.name, updates.name);
        set(&mut fields.icon, updates.icon);
        set(&mut fields.color, updates.color);
    }

    fn validate(fields: &CategoryFields) -> Result<(), ValidationError> {
        require_text("name", &fields.name)?;
        match &fields.color {
            Some(color) if !is_hex_color(color) => Err(ValidationError::Invalid {
                field: "color",
                reason: format!("expected #RRGGBB, got {color:?}"),
            }),
            _ => Ok(()),
        }
    }
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

// ===========================================
// Locations
// ===========================================

/// Storage location fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationFields {
    /// Display name
    pub name: String,
    /// Icon name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Location update input.
#[derive(Debug, Clone, Default)]
pub struct LocationUpdate {
    /// New name
    pub name: Option<String>,
    /// New icon
    pub icon: Option<Option<String>>,
}

/// A location record.
pub type Location = Record<LocationFields>;

/// Mapping for [`EntityType::Locations`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationEntity;

impl SyncableEntity for LocationEntity {
    type Fields = LocationFields;
    type Create = LocationFields;
    type Update = LocationUpdate;
    const ENTITY_TYPE: EntityType = EntityType::Locations;

    fn create_fields(input: LocationFields, _now: DateTime<Utc>) -> LocationFields {
        input
    }

    fn update_fields(fields: &mut LocationFields, updates: LocationUpdate, _now: DateTime<Utc>) {
        set(&mut fields.name, updates.name);
        set(&mut fields.icon, updates.icon);
    }

    fn validate(fields: &LocationFields) -> Result<(), ValidationError> {
        require_text("name", &fields.name)
    }
}

// ===========================================
// Inventory items
// ===========================================

/// Inventory item fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItemFields {
    /// Item title
    pub title: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Category reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<EntityId>,
    /// Location reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<EntityId>,
    /// Where inside the location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detailed_location: Option<String>,
    /// Purchase price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Quantity on hand
    #[serde(default = "default_amount")]
    pub amount: u32,
    /// End of warranty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warranty_until: Option<NaiveDate>,
    /// Date of purchase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_date: Option<NaiveDate>,
    /// Best-before date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
}

fn default_amount() -> u32 {
    1
}

impl InventoryItemFields {
    /// An item with just a title and an amount of one.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            category_id: None,
            location_id: None,
            detailed_location: None,
            price: None,
            amount: default_amount(),
            warranty_until: None,
            purchase_date: None,
            expiry_date: None,
        }
    }
}

/// Inventory item update input.
#[derive(Debug, Clone, Default)]
pub struct InventoryItemUpdate {
    /// New title
    pub title: Option<String>,
    /// New description
    pub description: Option<Option<String>>,
    /// New category
    pub category_id: Option<Option<EntityId>>,
    /// New location
    pub location_id: Option<Option<EntityId>>,
    /// New detailed location
    pub detailed_location: Option<Option<String>>,
    /// New price
    pub price: Option<Option<f64>>,
    /// New amount
    pub amount: Option<u32>,
    /// New warranty end
    pub warranty_until: Option<Option<NaiveDate>>,
    /// New purchase date
    pub purchase_date: Option<Option<NaiveDate>>,
    /// New expiry date
    pub expiry_date: Option<Option<NaiveDate>>,
}

/// An inventory item record.
pub type InventoryItem = Record<InventoryItemFields>;

/// Mapping for [`EntityType::InventoryItems`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryItemEntity;

impl SyncableEntity for InventoryItemEntity {
    type Fields = InventoryItemFields;
    type Create = InventoryItemFields;
    type Update = InventoryItemUpdate;
    const ENTITY_TYPE: EntityType = EntityType::InventoryItems;

    fn create_fields(input: InventoryItemFields, _now: DateTime<Utc>) -> InventoryItemFields {
        input
    }

    fn update_fields(
        fields: &mut InventoryItemFields,
        updates: InventoryItemUpdate,
        _now: DateTime<Utc>,
    ) {
        set(&mut fields.title, updates.title);
        set(&mut fields.description, updates.description);
        set(&mut fields.category_id, updates.category_id);
        set(&mut fields.location_id, updates.location_id);
        set(&mut fields.detailed_location, updates.detailed_location);
        set(&mut fields.price, updates.price);
        set(&mut fields.amount, updates.amount);
        set(&mut fields.warranty_until, updates.warranty_until);
        set(&mut fields.purchase_date, updates.purchase_date);
        set(&mut fields.expiry_date, updates.expiry_date);
    }

    fn validate(fields: &InventoryItemFields) -> Result<(), ValidationError> {
        require_text("title", &fields.title)?;
        if let Some(price) = fields.price {
            if !price.is_finite() || price < 0.0 {
                return Err(ValidationError::Invalid {
                    field: "price",
                    reason: format!("{price} is not a non-negative amount"),
                });
            }
        }
        Ok(())
    }
}

// ===========================================
// Todos
// ===========================================

/// Todo item fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoFields {
    /// What to do
    pub text: String,
    /// Done flag
    #[serde(default)]
    pub completed: bool,
    /// Sort position within the list
    #[serde(default)]
    pub position: i64,
    /// Extra note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Todo category reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<EntityId>,
    /// Due date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// When it was completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Todo create input.
#[derive(Debug, Clone, Default)]
pub struct NewTodo {
    /// What to do
    pub text: String,
    /// Sort position
    pub position: i64,
    /// Extra note
    pub note: Option<String>,
    /// Todo category reference
    pub category_id: Option<EntityId>,
    /// Due date
    pub due_date: Option<NaiveDate>,
}

impl NewTodo {
    /// A todo with just its text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Todo update input.
#[derive(Debug, Clone, Default)]
pub struct TodoUpdate {
    /// New text
    pub text: Option<String>,
    /// Mark done or not done
    pub completed: Option<bool>,
    /// New position
    pub position: Option<i64>,
    /// New note
    pub note: Option<Option<String>>,
    /// New category
    pub category_id: Option<Option<EntityId>>,
    /// New due date
    pub due_date: Option<Option<NaiveDate>>,
}

/// A todo record.
pub type Todo = Record<TodoFields>;

/// Mapping for [`EntityType::Todos`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TodoEntity;

impl SyncableEntity for TodoEntity {
    type Fields = TodoFields;
    type Create = NewTodo;
    type Update = TodoUpdate;
    const ENTITY_TYPE: EntityType = EntityType::Todos;

    fn create_fields(input: NewTodo, _now: DateTime<Utc>) -> TodoFields {
        TodoFields {
            text: input.text,
            completed: false,
            position: input.position,
            note: input.note,
            category_id: input.category_id,
            due_date: input.due_date,
            completed_at: None,
        }
    }

    fn update_fields(fields: &mut TodoFields, updates: TodoUpdate, now: DateTime<Utc>) {
        set(&mut fields.text, updates.text);
        set(&mut fields.position, updates.position);
        set(&mut fields.note, updates.note);
        set(&mut fields.category_id, updates.category_id);
        set(&mut fields.due_date, updates.due_date);
        if let Some(completed) = updates.completed {
            if completed != fields.completed {
                fields.completed = completed;
                fields.completed_at = completed.then_some(now);
            }
        }
    }

    fn validate(fields: &TodoFields) -> Result<(), ValidationError> {
        require_text("text", &fields.text)
    }
}

// ===========================================
// Todo categories
// ===========================================

/// Todo category fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoCategoryFields {
    /// Display name
    pub name: String,
    /// Sort position
    #[serde(default)]
    pub position: i64,
}

/// Todo category update input.
#[derive(Debug, Clone, Default)]
pub struct TodoCategoryUpdate {
    /// New name
    pub name: Option<String>,
    /// New position
    pub position: Option<i64>,
}

/// A todo category record.
pub type TodoCategory = Record<TodoCategoryFields>;

/// Mapping for [`EntityType::TodoCategories`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TodoCategoryEntity;

impl SyncableEntity for TodoCategoryEntity {
    type Fields = TodoCategoryFields;
    type Create = TodoCategoryFields;
    type Update = TodoCategoryUpdate;
    const ENTITY_TYPE: EntityType = EntityType::TodoCategories;

    fn create_fields(input: TodoCategoryFields, _now: DateTime<Utc>) -> TodoCategoryFields {
        input
    }

    fn update_fields(
        fields: &mut TodoCategoryFields,
        updates: TodoCategoryUpdate,
        _now: DateTime<Utc>,
    ) {
        set(&mut fields.name, updates.name);
        set(&mut fields.position, updates.position);
    }

    fn validate(fields: &TodoCategoryFields) -> Result<(), ValidationError> {
        require_text("name", &fields.name)
    }
}

// ===========================================
// Settings
// ===========================================

/// UI theme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Follow the OS
    #[default]
    System,
    /// Light
    Light,
    /// Dark
    Dark,
}

/// Per-home settings fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsFields {
    /// ISO 4217 currency code
    pub currency: String,
    /// BCP 47 language tag
    pub language: String,
    /// UI theme
    #[serde(default)]
    pub theme: Theme,
}

impl Default for SettingsFields {
    fn default() -> Self {
        Self {
            currency: "EUR".into(),
            language: "en".into(),
            theme: Theme::System,
        }
    }
}

/// Settings update input.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    /// New currency
    pub currency: Option<String>,
    /// New language
    pub language: Option<String>,
    /// New theme
    pub theme: Option<Theme>,
}

/// A settings record.
pub type Settings = Record<SettingsFields>;

/// Mapping for [`EntityType::Settings`].
///
/// Settings are never tombstoned; only an unsynced copy can be dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsEntity;

impl SyncableEntity for SettingsEntity {
    type Fields = SettingsFields;
    type Create = SettingsFields;
    type Update = SettingsUpdate;
    const ENTITY_TYPE: EntityType = EntityType::Settings;
    const SUPPORTS_SOFT_DELETE: bool = false;

    fn create_fields(input: SettingsFields, _now: DateTime<Utc>) -> SettingsFields {
        input
    }

    fn update_fields(fields: &mut SettingsFields, updates: SettingsUpdate, _now: DateTime<Utc>) {
        set(&mut fields.currency, updates.currency);
        set(&mut fields.language, updates.language);
        set(&mut fields.theme, updates.theme);
    }

    fn validate(fields: &SettingsFields) -> Result<(), ValidationError> {
        let currency = &fields.currency;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ValidationError::Invalid {
                field: "currency",
                reason: format!("expected a three-letter code, got {currency:?}"),
            });
        }
        require_text("language", &fields.language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn home_id_is_its_partition() {
        let home = HomeId::new("h1");
        assert_eq!(HomeEntity::generate_id(&home), EntityId::new("h1"));
        assert_ne!(TodoEntity::generate_id(&home), EntityId::new("h1"));
    }

    #[test]
    fn completing_a_todo_stamps_completed_at() {
        let mut fields = TodoEntity::create_fields(NewTodo::text("water plants"), now());
        assert!(fields.completed_at.is_none());

        let update = TodoUpdate {
            completed: Some(true),
            ..Default::default()
        };
        TodoEntity::update_fields(&mut fields, update, now());
        assert!(fields.completed);
        assert_eq!(fields.completed_at, Some(now()));

        let undo = TodoUpdate {
            completed: Some(false),
            ..Default::default()
        };
        TodoEntity::update_fields(&mut fields, undo, now());
        assert!(!fields.completed);
        assert!(fields.completed_at.is_none());
    }

    #[test]
    fn update_can_clear_optional_fields() {
        let mut fields = InventoryItemFields::titled("Drill");
        fields.description = Some("cordless".into());

        let update = InventoryItemUpdate {
            description: Some(None),
            amount: Some(3),
            ..Default::default()
        };
        InventoryItemEntity::update_fields(&mut fields, update, now());

        assert!(fields.description.is_none());
        assert_eq!(fields.amount, 3);
        assert_eq!(fields.title, "Drill");
    }

    #[test]
    fn inventory_item_wire_shape() {
        let mut fields = InventoryItemFields::titled("Drill");
        fields.category_id = Some(EntityId::new("c1"));
        fields.purchase_date = NaiveDate::from_ymd_opt(2023, 11, 2);

        let data = serde_json::to_value(&fields).unwrap();
        assert_eq!(
            data,
            json!({
                "title": "Drill",
                "categoryId": "c1",
                "amount": 1,
                "purchaseDate": "2023-11-02"
            })
        );
    }

    #[test]
    fn inventory_item_amount_defaults_to_one() {
        let fields: InventoryItemFields = serde_json::from_value(json!({"title": "Tent"})).unwrap();
        assert_eq!(fields.amount, 1);
    }

    // ===========================================
    // Validation
    // ===========================================

    #[test]
    fn blank_names_are_rejected() {
        let home = HomeFields {
            name: " ".into(),
            address: None,
        };
        assert_eq!(HomeEntity::validate(&home), Err(ValidationError::Empty("name")));

        let todo = TodoEntity::create_fields(NewTodo::text(""), now());
        assert_eq!(TodoEntity::validate(&todo), Err(ValidationError::Empty("text")));
    }

    #[test]
    fn category_color_must_be_hex() {
        let mut fields = CategoryFields {
            name: "Tools".into(),
            icon: None,
            color: Some("#12ab9F".into()),
        };
        assert!(CategoryEntity::validate(&fields).is_ok());

        fields.color = Some("red".into());
        assert!(matches!(
            CategoryEntity::validate(&fields),
            Err(ValidationError::Invalid { field: "color", .. })
        ));
    }

    #[test]
    fn negative_price_is_rejected() {
        let mut fields = InventoryItemFields::titled("Drill");
        fields.price = Some(-1.0);
        assert!(InventoryItemEntity::validate(&fields).is_err());

        fields.price = Some(f64::NAN);
        assert!(InventoryItemEntity::validate(&fields).is_err());

        fields.price = Some(49.9);
        assert!(InventoryItemEntity::validate(&fields).is_ok());
    }

    #[test]
    fn settings_currency_is_three_letters() {
        let mut fields = SettingsFields::default();
        assert!(SettingsEntity::validate(&fields).is_ok());

        fields.currency = "euro".into();
        assert!(SettingsEntity::validate(&fields).is_err());
    }

    #[test]
    fn theme_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Theme::Dark).unwrap(), "dark");
    }
}
