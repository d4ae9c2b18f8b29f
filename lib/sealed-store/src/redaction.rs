//! Redaction of sensitive fields for presentation.

use serde_json::Value;

use crate::{QueryExecutor, Record, Row, Schema};

/// Replacement used when no censor string is given.
pub const DEFAULT_CENSOR: &str = "[redacted]";

/// Types that can blank out their hashed and encrypted fields in memory.
pub trait Redactable {
    /// Replace every sensitive field's value with `censor`. Never touches storage.
    fn redact(&mut self, censor: &str);

    fn redact_default(&mut self) {
        self.redact(DEFAULT_CENSOR);
    }
}

impl<E: QueryExecutor> Redactable for Record<E> {
    fn redact(&mut self, censor: &str) {
        let fields: Vec<String> = self.schema().sensitive_fields().map(str::to_string).collect();
        for field in fields {
            self.overwrite(&field, Value::String(censor.to_string()));
        }
    }
}

/// A copy of `row` with every non-empty sensitive field replaced by `censor`.
pub fn redacted_copy(schema: &Schema, row: &Row, censor: &str) -> Row {
    let mut copy = row.clone();
    for field in schema.sensitive_fields() {
        if let Some(value) = copy.get_mut(field) {
            if !value.is_null() {
                *value = Value::String(censor.to_string());
            }
        }
    }
    copy
}
