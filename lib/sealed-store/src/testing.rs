//! In-crate fakes for the executor and crypto collaborators.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{CryptoProvider, QueryExecutor, QueryResult, Statement, StorageError, TransactionExecutor};

/// Reversible fake crypto. Ciphertext is `enc:<profile>:<json>`; checksums and
/// hashes are blake3 digests so equal inputs produce equal outputs.
#[derive(Debug, Clone, Copy)]
pub struct FakeCrypto {
    pub enabled: bool,
}

impl FakeCrypto {
    pub fn enabled() -> Self {
        Self { enabled: true }
    }

    pub fn ciphertext(value: &Value, profile: &str) -> Value {
        json!(format!("enc:{}:{}", profile, value))
    }

    pub fn checksum_of(value: &Value, profile: &str) -> Value {
        let digest = blake3::hash(format!("{}:{}", profile, value).as_bytes());
        json!(format!("sum:{}", digest.to_hex()))
    }

    pub fn hash_of(value: &Value, salt: Option<&str>, profile: &str) -> Value {
        let digest = blake3::hash(format!("{}:{}:{}", profile, salt.unwrap_or(""), value).as_bytes());
        json!(format!("hash:{}", digest.to_hex()))
    }
}

#[async_trait]
impl CryptoProvider for FakeCrypto {
    async fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn encrypt(&self, value: &Value, profile: &str) -> Result<Value, StorageError> {
        Ok(Self::ciphertext(value, profile))
    }

    async fn decrypt(&self, value: &Value, profile: &str) -> Result<Value, StorageError> {
        let prefix = format!("enc:{}:", profile);
        let plain = value
            .as_str()
            .and_then(|text| text.strip_prefix(&prefix))
            .ok_or_else(|| StorageError::CryptoUnavailable(format!("not ciphertext: {}", value)))?;
        Ok(serde_json::from_str(plain)?)
    }

    async fn hash(
        &self,
        value: &Value,
        salt: Option<&str>,
        profile: &str,
    ) -> Result<Value, StorageError> {
        Ok(Self::hash_of(value, salt, profile))
    }

    async fn checksum(&self, value: &Value, profile: &str) -> Result<Value, StorageError> {
        Ok(Self::checksum_of(value, profile))
    }
}

#[derive(Default)]
struct Script {
    responses: VecDeque<Result<QueryResult, StorageError>>,
    executed: Vec<Statement>,
    committed: Vec<Statement>,
    rollbacks: usize,
    fail_rollback: bool,
}

/// Executor that records every statement and replays queued responses.
/// An empty queue answers with an empty result.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    script: Arc<Mutex<Script>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, result: QueryResult) {
        self.script.lock().unwrap().responses.push_back(Ok(result));
    }

    pub fn push_rows(&self, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .map(|row| row.as_object().cloned().unwrap_or_default())
            .collect();
        self.push_ok(QueryResult::from_rows(rows));
    }

    pub fn push_err(&self, error: StorageError) {
        self.script.lock().unwrap().responses.push_back(Err(error));
    }

    pub fn fail_rollback(&self) {
        self.script.lock().unwrap().fail_rollback = true;
    }

    pub fn executed(&self) -> Vec<Statement> {
        self.script.lock().unwrap().executed.clone()
    }

    pub fn last(&self) -> Statement {
        self.executed().pop().unwrap()
    }

    pub fn committed(&self) -> Vec<Statement> {
        self.script.lock().unwrap().committed.clone()
    }

    pub fn rollbacks(&self) -> usize {
        self.script.lock().unwrap().rollbacks
    }

    fn run(&self, statement: &Statement) -> Result<QueryResult, StorageError> {
        let mut script = self.script.lock().unwrap();
        script.executed.push(statement.clone());
        script.responses.pop_front().unwrap_or_else(|| Ok(QueryResult::default()))
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    type Transaction = ScriptedTransaction;

    async fn execute(&self, statement: &Statement) -> Result<QueryResult, StorageError> {
        let result = self.run(statement)?;
        self.script.lock().unwrap().committed.push(statement.clone());
        Ok(result)
    }

    async fn begin_transaction(&self) -> Result<Self::Transaction, StorageError> {
        Ok(ScriptedTransaction {
            executor: self.clone(),
            pending: Vec::new(),
        })
    }
}

pub struct ScriptedTransaction {
    executor: ScriptedExecutor,
    pending: Vec<Statement>,
}

#[async_trait]
impl TransactionExecutor for ScriptedTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult, StorageError> {
        let result = self.executor.run(statement)?;
        self.pending.push(statement.clone());
        Ok(result)
    }

    async fn commit(self) -> Result<(), StorageError> {
        let mut script = self.executor.script.lock().unwrap();
        script.committed.extend(self.pending);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StorageError> {
        let mut script = self.executor.script.lock().unwrap();
        script.rollbacks += 1;
        if script.fail_rollback {
            return Err(StorageError::StorageError("connection lost during rollback".to_string()));
        }
        Ok(())
    }
}
