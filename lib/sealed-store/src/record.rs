//! Change-tracked records.
//!
//! A [`Record`] keeps the full state of one row plus a dirty map of the fields
//! set since the last synchronization with storage. Only the schema's fields
//! can be read or written.
//!
//! The record also remembers which fields currently hold their stored form
//! (ciphertext or a hash) so that `decrypt` and `encrypt` only transform
//! values that need it.
//!
//! There is no locking: two records for the same primary key can both
//! `save()`, and the last one wins.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::{
    FieldRole, Filter, Model, QueryExecutor, ReadMode, RecordStore, Row, Schema, StorageError,
};

/// A row with change tracking, bound to the store it came from.
pub struct Record<E> {
    store: Arc<RecordStore<E>>,
    state: Row,
    dirty: Row,
    sealed: HashSet<String>,
}

impl<E: QueryExecutor> Record<E> {
    /// An empty record: every field null, nothing dirty.
    pub fn new(store: Arc<RecordStore<E>>) -> Self {
        let state = store.schema().empty_row();
        Self {
            store,
            state,
            dirty: Row::new(),
            sealed: HashSet::new(),
        }
    }

    /// A record seeded with `values`. Every seeded field is dirty.
    pub fn with_values(store: Arc<RecordStore<E>>, values: Row) -> Result<Self, StorageError> {
        let mut record = Self::new(store);
        for (field, value) in values {
            record.set(&field, value)?;
        }
        Ok(record)
    }

    /// A record seeded from a typed model. Null fields are not marked dirty.
    pub fn from_model<M: Model>(store: Arc<RecordStore<E>>, model: &M) -> Result<Self, StorageError> {
        let values = match serde_json::to_value(model)? {
            Value::Object(values) => values,
            other => {
                return Err(StorageError::StorageError(format!(
                    "model did not serialize to an object: {}",
                    other
                )));
            }
        };
        let values = values.into_iter().filter(|(_, value)| !value.is_null()).collect();
        Self::with_values(store, values)
    }

    /// A clean record holding a row that came from storage.
    pub fn load(store: Arc<RecordStore<E>>, row: Row) -> Self {
        let mut record = Self::new(store);
        record.sync(row);
        record
    }

    /// Insert `row` and return it as a clean record.
    pub async fn create_from(
        store: Arc<RecordStore<E>>,
        row: Row,
        profile: Option<&str>,
    ) -> Result<Self, StorageError> {
        let created = store.create(row, profile).await?;
        Ok(Self::load(store, created))
    }

    /// Records for the rows matching `filter`.
    pub async fn find_all_by(
        store: Arc<RecordStore<E>>,
        filter: Filter,
        limit: Option<u64>,
        profile: Option<&str>,
    ) -> Result<Vec<Self>, StorageError> {
        let rows = store.find_by(filter, limit, profile).await?;
        Ok(rows
            .into_iter()
            .map(|row| Self::load(Arc::clone(&store), row))
            .collect())
    }

    /// The record with primary key `id`, if any.
    pub async fn find_by_id(
        store: Arc<RecordStore<E>>,
        id: impl Into<Value>,
        profile: Option<&str>,
    ) -> Result<Option<Self>, StorageError> {
        let row = store.find_by_id(id, profile).await?;
        Ok(row.map(|row| Self::load(store, row)))
    }

    pub fn schema(&self) -> &Schema {
        self.store.schema()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.state.get(field)
    }

    /// Set a field in both the full state and the dirty map.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<(), StorageError> {
        if !self.schema().has_field(field) {
            return Err(StorageError::UnknownField(format!(
                "{}.{}",
                self.schema().table(),
                field
            )));
        }
        let value = value.into();
        self.sealed.remove(field);
        self.dirty.insert(field.to_string(), value.clone());
        self.state.insert(field.to_string(), value);
        Ok(())
    }

    /// The primary-key value, null when unset.
    pub fn id(&self) -> &Value {
        self.schema()
            .primary_key()
            .and_then(|pk| self.state.get(pk))
            .unwrap_or(&Value::Null)
    }

    pub fn state(&self) -> &Row {
        &self.state
    }

    pub fn dirty(&self) -> &Row {
        &self.dirty
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// The profile named by the record's profile-selector field.
    pub fn profile(&self) -> Option<String> {
        let field = self.schema().profile_field()?;
        self.state
            .get(field)
            .and_then(Value::as_str)
            .filter(|profile| !profile.is_empty())
            .map(str::to_string)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.state.clone())
    }

    pub fn into_model<M: Model>(self) -> Result<M, StorageError> {
        Ok(serde_json::from_value(Value::Object(self.state))?)
    }

    /// Re-read the record by primary key. `NotFound` when it no longer exists.
    pub async fn find(&mut self) -> Result<&mut Self, StorageError> {
        let id = self.require_id()?;
        let profile = self.profile();
        match self.store.find_by_id(id.clone(), profile.as_deref()).await? {
            Some(row) => {
                self.sync(row);
                Ok(self)
            }
            None => Err(StorageError::NotFound(format!(
                "{} with id {}",
                self.schema().table(),
                id
            ))),
        }
    }

    /// Insert the dirty fields as a new row.
    pub async fn create(&mut self) -> Result<&mut Self, StorageError> {
        let profile = self.profile();
        let row = self
            .store
            .create(self.dirty.clone(), profile.as_deref())
            .await?;
        self.sync(row);
        Ok(self)
    }

    /// Write the dirty fields, if any.
    pub async fn save(&mut self) -> Result<&mut Self, StorageError> {
        if self.is_dirty() {
            let patch = self.dirty.clone();
            self.update(patch).await?;
        }
        Ok(self)
    }

    /// Apply `patch` to this record's row and re-sync from the result.
    pub async fn update(&mut self, patch: Row) -> Result<&mut Self, StorageError> {
        let id = self.require_id()?;
        let profile = self.profile();
        let row = self
            .store
            .update_by_id(id.clone(), patch, profile.as_deref())
            .await?
            .ok_or_else(|| {
                StorageError::WriteFailed(format!(
                    "update on {} returned no row for id {}",
                    self.schema().table(),
                    id
                ))
            })?;
        self.sync(row);
        Ok(self)
    }

    /// Delete this record's row. On success every field is nulled and the
    /// record can be reused for a fresh `create`.
    pub async fn delete(&mut self) -> Result<&mut Self, StorageError> {
        let id = self.require_id()?;
        let profile = self.profile();
        self.store.delete_by_id(id, profile.as_deref()).await?;
        self.state = self.schema().empty_row();
        self.dirty.clear();
        self.sealed.clear();
        Ok(self)
    }

    /// Decrypt the named fields in memory, including non-auto ones.
    ///
    /// Only fields still holding ciphertext are decrypted. When none of the
    /// names hold a value, every such field is.
    pub async fn decrypt(&mut self, fields: &[&str]) -> Result<&mut Self, StorageError> {
        let targets = self.pick(fields, |field, role| {
            self.sealed.contains(field) && role.decrypts_on(ReadMode::All)
        });
        if !targets.is_empty() {
            let profile = self.profile();
            let row = self
                .store
                .cipher()
                .transform_for_read(targets.clone(), profile.as_deref(), ReadMode::All)
                .await?;
            for (field, value) in row {
                if targets.contains_key(&field) {
                    self.sealed.remove(&field);
                    self.state.insert(field, value);
                }
            }
        }
        self.dirty.clear();
        Ok(self)
    }

    /// Encrypt or hash the named fields in memory, as a write would.
    ///
    /// Fields already in stored form are left alone. When none of the names
    /// hold a value, every sensitive plaintext field is transformed.
    pub async fn encrypt(&mut self, fields: &[&str]) -> Result<&mut Self, StorageError> {
        let targets = self.pick(fields, |field, role| {
            role.is_sensitive() && !self.sealed.contains(field)
        });
        if !targets.is_empty() {
            let profile = self.profile();
            let row = self
                .store
                .cipher()
                .transform_for_write(targets.clone(), profile.as_deref())
                .await?;
            // shadow checksums are storage-only
            for (field, value) in row {
                if targets.contains_key(&field) {
                    self.sealed.insert(field.clone());
                    self.state.insert(field, value);
                }
            }
        }
        self.dirty.clear();
        Ok(self)
    }

    /// Non-null values of the named fields that pass `eligible`. Falls back to
    /// every eligible field when none of the names hold a value.
    fn pick(&self, fields: &[&str], eligible: impl Fn(&str, FieldRole) -> bool) -> Row {
        let held = |field: &str| self.state.get(field).filter(|value| !value.is_null()).cloned();
        let named = fields.iter().any(|field| held(*field).is_some());

        self.schema()
            .fields()
            .filter(|(field, _)| !named || fields.iter().any(|name| name == field))
            .filter(|(field, role)| eligible(*field, *role))
            .filter_map(|(field, _)| held(field).map(|value| (field.to_string(), value)))
            .collect()
    }

    fn require_id(&self) -> Result<Value, StorageError> {
        let pk = self.schema().require_primary_key()?;
        match self.state.get(pk) {
            Some(id) if !id.is_null() => Ok(id.clone()),
            _ => Err(StorageError::NotFound(format!(
                "{} record has no {}",
                self.schema().table(),
                pk
            ))),
        }
    }

    /// Copy schema fields from a stored row into the state and clear the
    /// dirty map. Fields that stay encrypted or hashed after a read are sealed.
    fn sync(&mut self, row: Row) {
        for (field, value) in row {
            let Some(role) = self.schema().role(&field) else {
                continue;
            };
            if !value.is_null() && role.is_sensitive() && !role.decrypts_on(ReadMode::AutoOnly) {
                self.sealed.insert(field.clone());
            } else {
                self.sealed.remove(&field);
            }
            self.state.insert(field, value);
        }
        self.dirty.clear();
    }

    /// Overwrite a field in memory without marking it dirty.
    pub(crate) fn overwrite(&mut self, field: &str, value: Value) {
        self.sealed.remove(field);
        self.state.insert(field.to_string(), value);
    }
}

impl<E: QueryExecutor> fmt::Debug for Record<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("table", &self.store.schema().table())
            .field("state", &self.state)
            .field("dirty", &self.dirty)
            .finish()
    }
}
