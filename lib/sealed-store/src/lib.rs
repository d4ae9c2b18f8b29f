//! Sealed Store - Encryption-aware record storage over SQL backends.
//!
//! Columns are given a [`FieldRole`] that decides how their values are written
//! and read back. Encrypted columns can carry a deterministic checksum in a
//! `__`-prefixed shadow column, which lets filters on those columns run as
//! equality lookups without decrypting anything.
//!
//! # Core Concepts
//!
//! - **Schema**: A table name and an ordered list of fields with their roles.
//! - **Profile**: A named crypto configuration, chosen per call, per row (via
//!   a profile-selector field), per schema, or per store.
//! - **Filter**: Groups of field conditions compiled into a parameterized
//!   `WHERE` clause with `$N` placeholders.
//!
//! # Types
//!
//! - [`RecordStore`]: CRUD over one table with the encryption overlay applied
//! - [`Record`]: A change-tracked row bound to its store
//! - [`CryptoProvider`]: The pluggable crypto capability
//! - [`QueryExecutor`]: The pluggable SQL backend

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::unwrap_in_result,
        clippy::panic
    )
)]

mod cipher;
mod config;
mod crypto;
mod error;
mod executor;
mod filter;
mod record;
mod redaction;
mod role;
mod schema;
mod store;
#[cfg(test)]
mod testing;

pub use cipher::Cipher;
pub use config::{ConnectionConfig, DEFAULT_MAX_CONNECTIONS, StoreConfig};
pub use crypto::{CryptoProvider, DEFAULT_PROFILE, DisabledCrypto};
pub use error::StorageError;
pub use executor::{
    BatchHook, BatchStep, QueryExecutor, QueryResult, Statement, TransactionExecutor, execute_batch,
    execute_batch_steps,
};
pub use filter::{
    Chain, CompiledClause, Condition, FieldGroup, Filter, Operator, compile, compile_assignments,
    compile_group, quote_ident,
};
pub use record::Record;
pub use redaction::{DEFAULT_CENSOR, Redactable, redacted_copy};
pub use role::{FieldRole, ReadMode, SHADOW_PREFIX, WriteStep, shadow_name};
pub use schema::{ColumnType, Model, Row, Schema, SchemaBuilder};
pub use store::RecordStore;

// Re-export the derive macro. It lives in the macro namespace, so it shares a
// name with the `Model` trait.
pub use sealed_store_derive::Model;

