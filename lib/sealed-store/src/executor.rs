//! The SQL execution collaborator.
//!
//! Backends (e.g. `sealed-store-postgres`) implement [`QueryExecutor`] for
//! their pool type and [`TransactionExecutor`] for their transaction type.

use async_trait::async_trait;
use serde_json::Value;

use crate::{ColumnType, Row, StorageError};

/// SQL text with positional (`$1`, `$2`, ...) parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    /// Declared column types, parallel to `params`. Missing entries bind by JSON shape.
    pub param_types: Vec<Option<ColumnType>>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
            param_types: Vec::new(),
        }
    }

    /// A statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    pub fn with_param_types(mut self, param_types: Vec<Option<ColumnType>>) -> Self {
        self.param_types = param_types;
        self
    }

    /// Declared type of parameter `idx` (zero-based).
    pub fn param_type(&self, idx: usize) -> Option<ColumnType> {
        self.param_types.get(idx).copied().flatten()
    }
}

/// Rows returned by a statement and the number of rows it affected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl QueryResult {
    /// A result whose affected count equals the number of returned rows.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let rows_affected = rows.len() as u64;
        Self {
            rows,
            rows_affected,
        }
    }
}

/// Trait for executing statements against a database backend.
///
/// Implemented by database-specific pool types.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// The transaction type for this executor.
    type Transaction: TransactionExecutor;

    /// Execute one statement outside any explicit transaction.
    async fn execute(&self, statement: &Statement) -> Result<QueryResult, StorageError>;

    /// Begin a transaction on a dedicated connection.
    async fn begin_transaction(&self) -> Result<Self::Transaction, StorageError>;
}

/// Trait for executing statements within a transaction.
#[async_trait]
pub trait TransactionExecutor: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult, StorageError>;

    /// Commit the transaction.
    async fn commit(self) -> Result<(), StorageError>;

    /// Rollback the transaction.
    async fn rollback(self) -> Result<(), StorageError>;
}

/// Called after a batch statement succeeds, with its result and the statement
/// that runs next (if any). An error aborts the batch and rolls it back.
pub type BatchHook =
    Box<dyn FnMut(&QueryResult, Option<&mut Statement>) -> Result<(), StorageError> + Send>;

/// One statement of a batch plus an optional hook run on its result.
pub struct BatchStep {
    pub statement: Statement,
    hook: Option<BatchHook>,
}

impl BatchStep {
    pub fn new(statement: Statement) -> Self {
        Self {
            statement,
            hook: None,
        }
    }

    /// Run `hook` once this step's statement has succeeded.
    ///
    /// The hook may rewrite the next statement, e.g. to feed it a key the
    /// current one returned.
    pub fn then<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&QueryResult, Option<&mut Statement>) -> Result<(), StorageError> + Send + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }
}

impl From<Statement> for BatchStep {
    fn from(statement: Statement) -> Self {
        Self::new(statement)
    }
}

impl std::fmt::Debug for BatchStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStep")
            .field("statement", &self.statement)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// Run `statements` in order inside one transaction.
///
/// On the first failing statement the transaction is rolled back and
/// `TransactionFailed` is returned carrying that statement's original error.
/// A rollback failure is logged and never replaces the original error.
pub async fn execute_batch<E: QueryExecutor>(
    executor: &E,
    statements: &[Statement],
) -> Result<Vec<QueryResult>, StorageError> {
    let steps = statements.iter().cloned().map(BatchStep::new).collect();
    execute_batch_steps(executor, steps).await
}

/// Like [`execute_batch`], running each step's hook after its statement.
///
/// A failing hook is reported the same way as a failing statement, with the
/// index of the step whose hook failed.
pub async fn execute_batch_steps<E: QueryExecutor>(
    executor: &E,
    mut steps: Vec<BatchStep>,
) -> Result<Vec<QueryResult>, StorageError> {
    let mut tx = executor.begin_transaction().await?;
    let mut results = Vec::with_capacity(steps.len());

    for index in 0..steps.len() {
        let (done, rest) = steps.split_at_mut(index + 1);
        let step = &mut done[index];

        let outcome = match tx.execute(&step.statement).await {
            Ok(result) => match step.hook.as_mut() {
                Some(hook) => {
                    let next = rest.first_mut().map(|next| &mut next.statement);
                    hook(&result, next).map(|()| result)
                }
                None => Ok(result),
            },
            Err(error) => Err(error),
        };

        match outcome {
            Ok(result) => results.push(result),
            Err(error) => {
                tracing::debug!(index, error = %error, "batch step failed, rolling back");
                if let Err(rollback_error) = tx.rollback().await {
                    tracing::warn!(
                        index,
                        error = %rollback_error,
                        "rollback after failed batch step also failed"
                    );
                }
                return Err(StorageError::TransactionFailed {
                    index,
                    source: Box::new(error),
                });
            }
        }
    }

    tx.commit().await?;
    tracing::debug!(statements = steps.len(), "batch committed");
    Ok(results)
}
