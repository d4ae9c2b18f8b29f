//! Schema descriptors for tables with protected fields.
//!
//! A [`Schema`] names the table, lists every column with its [`FieldRole`], and
//! optionally carries a default crypto profile. It is built once per model type
//! (by hand through [`SchemaBuilder`] or with `#[derive(Model)]`) and shared
//! immutably afterward.
//!
//! # Example
//!
//! ```text
//! #[derive(Model, Serialize, Deserialize)]
//! #[model(table = "users")]
//! pub struct User {
//!     #[field(pk)]
//!     pub id: Option<i64>,
//!     pub username: Option<String>,
//!     #[field(encrypt)]
//!     pub phone: Option<String>,
//!     #[field(hash)]
//!     pub secret: Option<String>,
//! }
//! ```
//!
//! # Column Naming
//!
//! `Encrypt` and `AutoCrypt` fields require a second stored column named
//! `__<field>` holding the checksum. Field names may not start with `__`.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{FieldRole, SHADOW_PREFIX, StorageError};

/// Declared SQL type of a column. Backends use it to bind parameters; values
/// of undeclared columns are bound by their JSON shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    BigInt,
    Boolean,
    Datetime,
    Json,
}

/// A row: column name to value, in insertion order.
pub type Row = serde_json::Map<String, Value>;

/// Immutable description of a table and the role of each of its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    table: String,
    fields: Vec<(String, FieldRole)>,
    column_types: Vec<(String, ColumnType)>,
    primary_key: Option<String>,
    profile_field: Option<String>,
    default_profile: Option<String>,
}

impl Schema {
    /// Start building a schema for `table`.
    pub fn builder(table: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            table: table.into(),
            fields: Vec::new(),
            column_types: Vec::new(),
            default_profile: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldRole)> {
        self.fields.iter().map(|(name, role)| (name.as_str(), *role))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn role(&self, field: &str) -> Option<FieldRole> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, role)| *role)
    }

    /// The declared type of `field`, if any.
    pub fn column_type(&self, field: &str) -> Option<ColumnType> {
        self.column_types
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, ty)| *ty)
    }

    /// The type a parameter bound against `column` should take.
    ///
    /// Hashed and encrypted fields hold provider output, and shadow columns
    /// hold checksums, so neither carries the declared type.
    pub fn param_type(&self, column: &str) -> Option<ColumnType> {
        match self.role(column) {
            Some(role) if !role.is_sensitive() => self.column_type(column),
            _ => None,
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.role(field).is_some()
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    /// The primary key, or `InvalidSchema` for tables without one.
    pub fn require_primary_key(&self) -> Result<&str, StorageError> {
        self.primary_key().ok_or_else(|| {
            StorageError::InvalidSchema(format!("table {} has no primary key", self.table))
        })
    }

    pub fn profile_field(&self) -> Option<&str> {
        self.profile_field.as_deref()
    }

    pub fn default_profile(&self) -> Option<&str> {
        self.default_profile.as_deref()
    }

    /// Fields that are hashed or encrypted.
    pub fn sensitive_fields(&self) -> impl Iterator<Item = &str> {
        self.fields()
            .filter(|(_, role)| role.is_sensitive())
            .map(|(name, _)| name)
    }

    /// Reject any key in `row` that is not a schema field.
    pub fn check_fields(&self, row: &Row) -> Result<(), StorageError> {
        match row.keys().find(|key| !self.has_field(key)) {
            Some(key) => Err(StorageError::UnknownField(format!("{}.{}", self.table, key))),
            None => Ok(()),
        }
    }

    /// Project a stored row onto the schema.
    ///
    /// The result carries every schema field in declaration order (missing
    /// ones as null) and nothing else, so shadow columns never leak out.
    pub fn normalize_row(&self, mut raw: Row) -> Row {
        self.fields
            .iter()
            .map(|(name, _)| (name.clone(), raw.remove(name).unwrap_or(Value::Null)))
            .collect()
    }

    /// A row with every schema field set to null.
    pub fn empty_row(&self) -> Row {
        self.fields
            .iter()
            .map(|(name, _)| (name.clone(), Value::Null))
            .collect()
    }
}

/// Builder for [`Schema`]. Validates the descriptor invariants in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    table: String,
    fields: Vec<(String, FieldRole)>,
    column_types: Vec<(String, ColumnType)>,
    default_profile: Option<String>,
}

impl SchemaBuilder {
    /// Add a field with the given role.
    pub fn field(mut self, name: impl Into<String>, role: FieldRole) -> Self {
        self.fields.push((name.into(), role));
        self
    }

    /// Add a plain field.
    pub fn plain(self, name: impl Into<String>) -> Self {
        self.field(name, FieldRole::Plain)
    }

    /// Add the primary-key field.
    pub fn primary_key(self, name: impl Into<String>) -> Self {
        self.field(name, FieldRole::PrimaryKey)
    }

    /// Declare the SQL type of an added field.
    pub fn column_type(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.column_types.push((name.into(), ty));
        self
    }

    /// Set the model-level crypto profile.
    pub fn default_profile(mut self, profile: impl Into<String>) -> Self {
        self.default_profile = Some(profile.into());
        self
    }

    pub fn build(self) -> Result<Schema, StorageError> {
        if self.table.is_empty() {
            return Err(StorageError::InvalidSchema("empty table name".to_string()));
        }

        let mut primary_key = None;
        let mut profile_field = None;

        for (idx, (name, role)) in self.fields.iter().enumerate() {
            if name.is_empty() {
                return Err(StorageError::InvalidSchema(format!(
                    "{}: empty field name",
                    self.table
                )));
            }
            if name.starts_with(SHADOW_PREFIX) {
                return Err(StorageError::InvalidSchema(format!(
                    "{}.{}: field names may not start with {}",
                    self.table, name, SHADOW_PREFIX
                )));
            }
            if self.fields[..idx].iter().any(|(other, _)| other == name) {
                return Err(StorageError::InvalidSchema(format!(
                    "{}.{}: duplicate field",
                    self.table, name
                )));
            }

            let slot = match role {
                FieldRole::PrimaryKey => &mut primary_key,
                FieldRole::ProfileSelector => &mut profile_field,
                _ => continue,
            };
            if let Some(existing) = slot.replace(name.clone()) {
                return Err(StorageError::InvalidSchema(format!(
                    "{}: both {} and {} are marked {:?}",
                    self.table, existing, name, role
                )));
            }
        }

        for (name, _) in &self.column_types {
            if !self.fields.iter().any(|(field, _)| field == name) {
                return Err(StorageError::InvalidSchema(format!(
                    "{}.{}: column type declared for unknown field",
                    self.table, name
                )));
            }
        }

        Ok(Schema {
            table: self.table,
            fields: self.fields,
            column_types: self.column_types,
            primary_key,
            profile_field,
            default_profile: self.default_profile,
        })
    }
}

/// Types stored through a [`RecordStore`](crate::RecordStore).
///
/// Generated by `#[derive(Model)]`. The type's serde representation must use
/// the schema's field names as keys.
pub trait Model: Serialize + DeserializeOwned + Send + Sync {
    /// The schema for this model's table.
    fn schema() -> Result<Schema, StorageError>;
}
