//! Field roles and the per-role transform table.

use serde::{Deserialize, Serialize};

/// Prefix of the shadow column that holds a field's deterministic checksum.
pub const SHADOW_PREFIX: &str = "__";

/// Name of the checksum column for an `Encrypt`/`AutoCrypt` field.
pub fn shadow_name(field: &str) -> String {
    format!("{}{}", SHADOW_PREFIX, field)
}

/// How a column is stored and read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    /// Stored as-is.
    Plain,
    /// The table's primary key. Stored as-is.
    PrimaryKey,
    /// Holds the name of the crypto profile used for the rest of the row.
    ProfileSelector,
    /// One-way hashed on write, never decrypted.
    Hash,
    /// Encrypted, with a searchable checksum in the shadow column.
    /// Stays ciphertext on reads until explicitly decrypted.
    Encrypt,
    /// Encrypted without a shadow checksum. Not searchable.
    EncryptNoHash,
    /// Like `Encrypt`, but decrypted on every read.
    AutoCrypt,
    /// Like `EncryptNoHash`, but decrypted on every read.
    AutoCryptNoHash,
}

/// A single write-side transform applied to a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    /// Store `checksum(value)` in the shadow column.
    Checksum,
    /// Replace the value with `encrypt(value)`.
    Encrypt,
    /// Replace the value with `hash(value)`.
    Hash,
}

/// When a read should decrypt a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Only `AutoCrypt` and `AutoCryptNoHash` fields. Used on every generic read.
    AutoOnly,
    /// Every decryptable field. Used for caller-requested decryption.
    All,
}

impl FieldRole {
    /// Write steps for this role, applied in order.
    ///
    /// The checksum is always computed before encryption so it covers the plaintext.
    pub fn write_steps(self) -> &'static [WriteStep] {
        match self {
            FieldRole::Encrypt | FieldRole::AutoCrypt => &[WriteStep::Checksum, WriteStep::Encrypt],
            FieldRole::EncryptNoHash | FieldRole::AutoCryptNoHash => &[WriteStep::Encrypt],
            FieldRole::Hash => &[WriteStep::Hash],
            FieldRole::Plain | FieldRole::PrimaryKey | FieldRole::ProfileSelector => &[],
        }
    }

    /// Whether a filter on this field can be rewritten against its shadow column.
    pub fn is_searchable(self) -> bool {
        matches!(self, FieldRole::Encrypt | FieldRole::AutoCrypt)
    }

    /// Whether a read in `mode` decrypts this field.
    pub fn decrypts_on(self, mode: ReadMode) -> bool {
        match self {
            FieldRole::AutoCrypt | FieldRole::AutoCryptNoHash => true,
            FieldRole::Encrypt | FieldRole::EncryptNoHash => mode == ReadMode::All,
            _ => false,
        }
    }

    /// Hashed or encrypted fields. These are the fields redaction replaces.
    pub fn is_sensitive(self) -> bool {
        !self.write_steps().is_empty()
    }
}
