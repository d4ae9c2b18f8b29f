//! Per-field encryption overlay.
//!
//! [`Cipher`] rewrites rows into their stored form on write, reverses that on
//! read, and rewrites filters on encrypted fields into checksum lookups on
//! their shadow columns. Every operation is a no-op while the provider
//! reports encryption disabled.

use serde_json::Value;

use crate::{
    CryptoProvider, DEFAULT_PROFILE, Filter, ReadMode, Row, Schema, StorageError, WriteStep,
    filter::Condition, shadow_name,
};

/// Applies a schema's field roles through a crypto provider.
#[derive(Clone, Copy)]
pub struct Cipher<'a> {
    schema: &'a Schema,
    crypto: &'a dyn CryptoProvider,
    store_profile: Option<&'a str>,
}

impl<'a> Cipher<'a> {
    pub fn new(schema: &'a Schema, crypto: &'a dyn CryptoProvider) -> Self {
        Self {
            schema,
            crypto,
            store_profile: None,
        }
    }

    /// Profile used when neither the call nor the schema names one.
    pub fn with_store_profile(mut self, profile: Option<&'a str>) -> Self {
        self.store_profile = profile;
        self
    }

    /// Resolve a profile: explicit > selector value > schema default > store default > `"default"`.
    pub fn resolve_profile(&self, explicit: Option<&str>, selected: Option<&Value>) -> String {
        explicit
            .or_else(|| selected.and_then(Value::as_str).filter(|s| !s.is_empty()))
            .or(self.schema.default_profile())
            .or(self.store_profile)
            .unwrap_or(DEFAULT_PROFILE)
            .to_string()
    }

    /// Profile for a row, reading its profile-selector field.
    pub fn profile_for_row(&self, explicit: Option<&str>, row: &Row) -> String {
        let selected = self.schema.profile_field().and_then(|field| row.get(field));
        self.resolve_profile(explicit, selected)
    }

    /// Profile for a filter, reading the first equality on the profile-selector field.
    pub fn profile_for_filter(&self, explicit: Option<&str>, filter: &Filter) -> String {
        let selected = self
            .schema
            .profile_field()
            .and_then(|field| filter.equality_value(field));
        self.resolve_profile(explicit, selected)
    }

    /// Convert a row (or patch) into its stored form.
    ///
    /// Only fields present in `row` are touched. Null values stay null and
    /// null their shadow column without calling the provider.
    pub async fn transform_for_write(
        &self,
        mut row: Row,
        profile: Option<&str>,
    ) -> Result<Row, StorageError> {
        if !self.crypto.is_enabled().await {
            return Ok(row);
        }
        let profile = self.profile_for_row(profile, &row);

        for (field, role) in self.schema.fields() {
            let Some(plain) = row.get(field).cloned() else {
                continue;
            };
            for step in role.write_steps() {
                match step {
                    WriteStep::Checksum => {
                        let sum = if plain.is_null() {
                            Value::Null
                        } else {
                            self.crypto.checksum(&plain, &profile).await?
                        };
                        row.insert(shadow_name(field), sum);
                    }
                    WriteStep::Encrypt if !plain.is_null() => {
                        let ciphertext = self.crypto.encrypt(&plain, &profile).await?;
                        row.insert(field.to_string(), ciphertext);
                    }
                    WriteStep::Hash if !plain.is_null() => {
                        let digest = self.crypto.hash(&plain, None, &profile).await?;
                        row.insert(field.to_string(), digest);
                    }
                    WriteStep::Encrypt | WriteStep::Hash => {}
                }
            }
        }

        Ok(row)
    }

    /// Decrypt the fields `mode` selects. Falsy values are left as they are.
    pub async fn transform_for_read(
        &self,
        mut row: Row,
        profile: Option<&str>,
        mode: ReadMode,
    ) -> Result<Row, StorageError> {
        if !self.crypto.is_enabled().await {
            return Ok(row);
        }
        let profile = self.profile_for_row(profile, &row);

        for (field, role) in self.schema.fields() {
            if !role.decrypts_on(mode) {
                continue;
            }
            if let Some(value) = row.get_mut(field) {
                if is_truthy(value) {
                    *value = self.crypto.decrypt(value, &profile).await?;
                }
            }
        }

        Ok(row)
    }

    /// Rewrite conditions on searchable encrypted fields into checksum
    /// comparisons against their shadow columns.
    ///
    /// Chain operators are left in place; null values stay null so they still
    /// compile to `IS NULL`.
    pub async fn rewrite_filter_for_search(
        &self,
        mut filter: Filter,
        profile: Option<&str>,
    ) -> Result<Filter, StorageError> {
        if !self.crypto.is_enabled().await {
            return Ok(filter);
        }
        let profile = self.profile_for_filter(profile, &filter);

        for group in filter.groups_mut() {
            for (field, condition) in group.fields_mut().iter_mut() {
                let searchable = self
                    .schema
                    .role(field.as_str())
                    .is_some_and(|role| role.is_searchable());
                if !searchable {
                    continue;
                }

                *field = shadow_name(field.as_str());
                match condition {
                    Condition::Equals(value) => self.checksum_in_place(value, &profile).await?,
                    Condition::Chain(chain) => {
                        for value in chain.values_mut() {
                            self.checksum_in_place(value, &profile).await?;
                        }
                    }
                }
            }
        }

        Ok(filter)
    }

    async fn checksum_in_place(&self, value: &mut Value, profile: &str) -> Result<(), StorageError> {
        if !value.is_null() {
            *value = self.crypto.checksum(value, profile).await?;
        }
        Ok(())
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
