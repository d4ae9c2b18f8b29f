//! The cryptographic provider contract.
//!
//! The store never sees key material or algorithms: it only calls these five
//! operations with a profile name selecting the key context.

use async_trait::async_trait;
use serde_json::Value;

use crate::StorageError;

/// Profile used when nothing more specific is configured.
pub const DEFAULT_PROFILE: &str = "default";

/// A source of encryption, hashing and deterministic checksums.
#[async_trait]
pub trait CryptoProvider: Send + Sync {
    /// When false, every field transform is skipped and values are stored as given.
    async fn is_enabled(&self) -> bool;

    /// Non-deterministic encryption.
    async fn encrypt(&self, value: &Value, profile: &str) -> Result<Value, StorageError>;

    async fn decrypt(&self, value: &Value, profile: &str) -> Result<Value, StorageError>;

    /// One-way hash, optionally salted.
    async fn hash(
        &self,
        value: &Value,
        salt: Option<&str>,
        profile: &str,
    ) -> Result<Value, StorageError>;

    /// Deterministic digest used for equality search over encrypted fields.
    async fn checksum(&self, value: &Value, profile: &str) -> Result<Value, StorageError>;
}

/// The provider used when none is configured: disabled, and rejects every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCrypto;

#[async_trait]
impl CryptoProvider for DisabledCrypto {
    async fn is_enabled(&self) -> bool {
        false
    }

    async fn encrypt(&self, _value: &Value, _profile: &str) -> Result<Value, StorageError> {
        Err(StorageError::CryptoUnavailable(
            "no encrypt crypto function".to_string(),
        ))
    }

    async fn decrypt(&self, _value: &Value, _profile: &str) -> Result<Value, StorageError> {
        Err(StorageError::CryptoUnavailable(
            "no decrypt crypto function".to_string(),
        ))
    }

    async fn hash(
        &self,
        _value: &Value,
        _salt: Option<&str>,
        _profile: &str,
    ) -> Result<Value, StorageError> {
        Err(StorageError::CryptoUnavailable(
            "no hash crypto function".to_string(),
        ))
    }

    async fn checksum(&self, _value: &Value, _profile: &str) -> Result<Value, StorageError> {
        Err(StorageError::CryptoUnavailable(
            "no checksum crypto function".to_string(),
        ))
    }
}
