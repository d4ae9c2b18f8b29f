//! PostgreSQL implementation for sealed-store.
//!
//! [`PgPool`] implements [`QueryExecutor`] on top of an `sqlx` pool. Statement
//! parameters are bound by declared column type, falling back to their JSON
//! shape, and result rows come back as JSON objects keyed by column name.
//!
//! # Usage
//!
//! ```text
//! use sealed_store::{RecordStore, StoreConfig};
//! use sealed_store_postgres::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/app").await?;
//! let users = RecordStore::for_model::<User>(pool, StoreConfig::new(crypto))?;
//! let found = users.find_by(Filter::eq("phone", "555-0100"), None, None).await?;
//! ```
//!
//! Tables need a `__<field>` text column next to every `encrypt` and
//! `auto_crypt` field to hold its search checksum.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod executor;
mod serde_bind;

pub use executor::{PgPool, PgTransaction};
pub use serde_bind::{bind_json_value, bind_params, row_to_json};

// Re-export core types for convenience
pub use sealed_store::{
    ColumnType, ConnectionConfig, Filter, QueryExecutor, QueryResult, RecordStore, Statement,
    StorageError, StoreConfig, TransactionExecutor,
};
