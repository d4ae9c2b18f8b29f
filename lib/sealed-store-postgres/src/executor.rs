//! PostgreSQL implementation of QueryExecutor.

use async_trait::async_trait;
use futures::TryStreamExt;
use sealed_store::{
    ConnectionConfig, QueryExecutor, QueryResult, Statement, StorageError, TransactionExecutor,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Either, Postgres, Transaction};
use std::ops::Deref;

use crate::{bind_params, row_to_json};

/// Wrapper around sqlx::PgPool that implements QueryExecutor.
#[derive(Clone, Debug)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    /// Create a new PgPool from an sqlx PgPool.
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self(pool)
    }

    /// Connect to a PostgreSQL database with the default pool size.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        Self::connect_with(ConnectionConfig::new(url)).await
    }

    /// Connect using an explicit connection configuration.
    pub async fn connect_with(config: ConnectionConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| StorageError::StorageError(e.to_string()))?;
        tracing::info!(max_connections = config.max_connections, "connected to postgres");
        Ok(Self(pool))
    }

    /// Get the inner sqlx::PgPool.
    pub fn inner(&self) -> &sqlx::PgPool {
        &self.0
    }
}

impl Deref for PgPool {
    type Target = sqlx::PgPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Run one statement, collecting both returned rows and the affected-row count.
async fn run<'c, X>(executor: X, statement: &Statement) -> Result<QueryResult, StorageError>
where
    X: sqlx::Executor<'c, Database = Postgres>,
{
    let args = bind_params(statement)?;

    // `fetch_many` is the only sqlx entry point that yields rows and the
    // command's row count from a single round trip.
    #[allow(deprecated)]
    let mut stream = sqlx::query_with(&statement.sql, args).fetch_many(executor);

    let mut result = QueryResult::default();
    while let Some(item) = stream
        .try_next()
        .await
        .map_err(|e| StorageError::StorageError(e.to_string()))?
    {
        match item {
            Either::Left(done) => result.rows_affected += done.rows_affected(),
            Either::Right(row) => result.rows.push(row_to_json(&row)?),
        }
    }
    Ok(result)
}

#[async_trait]
impl QueryExecutor for PgPool {
    type Transaction = PgTransaction;

    async fn execute(&self, statement: &Statement) -> Result<QueryResult, StorageError> {
        run(&self.0, statement).await
    }

    async fn begin_transaction(&self) -> Result<Self::Transaction, StorageError> {
        let tx = self
            .0
            .begin()
            .await
            .map_err(|e| StorageError::StorageError(e.to_string()))?;
        Ok(PgTransaction { tx })
    }
}

/// PostgreSQL transaction wrapper implementing TransactionExecutor.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TransactionExecutor for PgTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult, StorageError> {
        run(&mut *self.tx, statement).await
    }

    async fn commit(self) -> Result<(), StorageError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StorageError::StorageError(e.to_string()))
    }

    async fn rollback(self) -> Result<(), StorageError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StorageError::StorageError(e.to_string()))
    }
}
