//! CRUD over one table with the encryption overlay applied.
//!
//! Every row or patch sent to storage passes through exactly one write-side
//! transform, and every row handed back passes through exactly one read-side
//! transform (auto-decrypt fields only).

use std::sync::Arc;

use serde_json::Value;

use crate::{
    BatchStep, Cipher, ColumnType, CompiledClause, Filter, Model, QueryExecutor, QueryResult,
    ReadMode, Row, Schema, Statement, StorageError, StoreConfig, execute_batch,
    execute_batch_steps,
    filter::{compile, compile_assignments, quote_ident},
};

/// Record store for one schema over one executor.
pub struct RecordStore<E> {
    executor: E,
    schema: Arc<Schema>,
    config: StoreConfig,
}

impl<E: QueryExecutor> RecordStore<E> {
    pub fn new(executor: E, schema: Schema, config: StoreConfig) -> Self {
        Self {
            executor,
            schema: Arc::new(schema),
            config,
        }
    }

    /// Build a store for a `#[derive(Model)]` type.
    pub fn for_model<M: Model>(executor: E, config: StoreConfig) -> Result<Self, StorageError> {
        Ok(Self::new(executor, M::schema()?, config))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn cipher(&self) -> Cipher<'_> {
        Cipher::new(&self.schema, self.config.crypto.as_ref())
            .with_store_profile(self.config.default_profile.as_deref())
    }

    fn table(&self) -> String {
        quote_ident(self.schema.table())
    }

    /// A statement whose parameters carry the declared types of `columns`.
    fn statement(&self, sql: String, params: Vec<Value>, columns: &[String]) -> Statement {
        let types: Vec<Option<ColumnType>> = columns
            .iter()
            .map(|column| self.schema.param_type(column))
            .collect();
        Statement::new(sql, params).with_param_types(types)
    }

    async fn run(&self, operation: &str, statement: &Statement) -> Result<QueryResult, StorageError> {
        tracing::debug!(
            table = self.schema.table(),
            operation,
            params = statement.params.len(),
            "executing statement"
        );
        self.executor.execute(statement).await
    }

    /// Normalize stored rows to the schema and decrypt auto-decrypt fields.
    async fn read_rows(
        &self,
        rows: Vec<Row>,
        profile: Option<&str>,
    ) -> Result<Vec<Row>, StorageError> {
        let cipher = self.cipher();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let row = self.schema.normalize_row(row);
            out.push(cipher.transform_for_read(row, profile, ReadMode::AutoOnly).await?);
        }
        Ok(out)
    }

    fn write_failed(&self, operation: &str) -> StorageError {
        tracing::debug!(table = self.schema.table(), operation, "no rows affected");
        StorageError::WriteFailed(format!("{} on {} affected no rows", operation, self.schema.table()))
    }

    /// Build `WHERE ...` for a filter, rewriting encrypted fields for search.
    async fn where_clause(
        &self,
        filter: Filter,
        profile: Option<&str>,
        start_index: usize,
    ) -> Result<CompiledClause, StorageError> {
        let filter = self.cipher().rewrite_filter_for_search(filter, profile).await?;
        let mut compiled = compile(&filter, start_index);
        if !compiled.is_empty() {
            compiled.sql = format!(" WHERE {}", compiled.sql);
        }
        Ok(compiled)
    }

    /// Restrict a statement to `limit` matching rows.
    ///
    /// PostgreSQL has no `LIMIT` on `UPDATE`/`DELETE`, so the target set is
    /// chosen by `ctid` in a subquery.
    fn limited_target(&self, where_clause: &str, limit: Option<u64>) -> String {
        match limit {
            Some(limit) => format!(
                " WHERE ctid IN (SELECT ctid FROM {}{} LIMIT {})",
                self.table(),
                where_clause,
                limit
            ),
            None => where_clause.to_string(),
        }
    }

    /// Insert a row and return it as stored (auto-decrypt fields decrypted).
    pub async fn create(&self, row: Row, profile: Option<&str>) -> Result<Row, StorageError> {
        self.schema.check_fields(&row)?;
        let stored = self.cipher().transform_for_write(row, profile).await?;

        let statement = if stored.is_empty() {
            Statement::raw(format!("INSERT INTO {} DEFAULT VALUES RETURNING *", self.table()))
        } else {
            let mut params = Vec::new();
            let mut bound = Vec::new();
            let mut columns = Vec::with_capacity(stored.len());
            let mut placeholders = Vec::with_capacity(stored.len());
            for (column, value) in &stored {
                columns.push(quote_ident(column));
                if value.is_null() {
                    placeholders.push("NULL".to_string());
                } else {
                    params.push(value.clone());
                    bound.push(column.clone());
                    placeholders.push(format!("${}", params.len()));
                }
            }
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                self.table(),
                columns.join(", "),
                placeholders.join(", ")
            );
            self.statement(sql, params, &bound)
        };

        self.insert(statement, profile).await
    }

    async fn insert(&self, statement: Statement, profile: Option<&str>) -> Result<Row, StorageError> {
        let result = self.run("create", &statement).await?;
        let row = result
            .rows
            .into_iter()
            .next()
            .ok_or_else(|| self.write_failed("create"))?;

        let mut rows = self.read_rows(vec![row], profile).await?;
        rows.pop().ok_or_else(|| self.write_failed("create"))
    }

    /// Rows matching `filter`, at most `limit` of them.
    ///
    /// `profile` overrides the row's selector for both the search checksums
    /// and the auto-decrypt of returned rows.
    pub async fn find_by(
        &self,
        filter: Filter,
        limit: Option<u64>,
        profile: Option<&str>,
    ) -> Result<Vec<Row>, StorageError> {
        self.select_by(filter, &[], limit, profile).await
    }

    /// Like [`find_by`](Self::find_by), selecting only `columns`.
    ///
    /// An empty list selects every column. Columns left out come back as
    /// null. Leaving out the profile selector makes auto-decrypt fall back to
    /// the default profiles unless `profile` is given.
    pub async fn select_by(
        &self,
        filter: Filter,
        columns: &[&str],
        limit: Option<u64>,
        profile: Option<&str>,
    ) -> Result<Vec<Row>, StorageError> {
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            let mut quoted = Vec::with_capacity(columns.len());
            for column in columns {
                if !self.schema.has_field(column) {
                    return Err(StorageError::UnknownField(format!(
                        "{}.{}",
                        self.schema.table(),
                        column
                    )));
                }
                quoted.push(quote_ident(column));
            }
            quoted.join(", ")
        };

        let clause = self.where_clause(filter, profile, 1).await?;
        let mut sql = format!("SELECT {} FROM {}{}", projection, self.table(), clause.sql);
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let statement = self.statement(sql, clause.params, &clause.columns);
        let result = self.run("find", &statement).await?;
        self.read_rows(result.rows, profile).await
    }

    /// The row whose primary key equals `id`.
    pub async fn find_by_id(
        &self,
        id: impl Into<Value>,
        profile: Option<&str>,
    ) -> Result<Option<Row>, StorageError> {
        let pk = self.schema.require_primary_key()?;
        let rows = self.find_by(Filter::eq(pk, id), Some(1), profile).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn find_all(
        &self,
        limit: Option<u64>,
        profile: Option<&str>,
    ) -> Result<Vec<Row>, StorageError> {
        self.find_by(Filter::all(), limit, profile).await
    }

    async fn update_inner(
        &self,
        filter: Filter,
        patch: Row,
        limit: Option<u64>,
        return_rows: bool,
        profile: Option<&str>,
        require_rows: bool,
    ) -> Result<Vec<Row>, StorageError> {
        self.schema.check_fields(&patch)?;
        if patch.is_empty() {
            return Err(StorageError::EmptyPatch(self.schema.table().to_string()));
        }

        let stored = self.cipher().transform_for_write(patch, profile).await?;
        let set = compile_assignments(&stored, 1);
        let clause = self.where_clause(filter, profile, set.next_index).await?;

        let mut sql = format!(
            "UPDATE {} SET {}{}",
            self.table(),
            set.sql,
            self.limited_target(&clause.sql, limit)
        );
        if return_rows {
            sql.push_str(" RETURNING *");
        }
        let mut params = set.params;
        params.extend(clause.params);
        let mut columns = set.columns;
        columns.extend(clause.columns);

        let statement = self.statement(sql, params, &columns);
        let result = self.run("update", &statement).await?;
        if require_rows && result.rows_affected == 0 && result.rows.is_empty() {
            return Err(self.write_failed("update"));
        }
        self.read_rows(result.rows, profile).await
    }

    /// Apply `patch` to every row matching `filter`.
    ///
    /// Returns the updated rows when `return_rows` is set. Fails with
    /// `WriteFailed` when nothing matched.
    pub async fn update_by(
        &self,
        filter: Filter,
        patch: Row,
        return_rows: bool,
        profile: Option<&str>,
    ) -> Result<Vec<Row>, StorageError> {
        self.update_inner(filter, patch, None, return_rows, profile, true)
            .await
    }

    /// Like [`update_by`](Self::update_by), touching at most `limit` rows.
    pub async fn update_limited_by(
        &self,
        filter: Filter,
        patch: Row,
        limit: u64,
        return_rows: bool,
        profile: Option<&str>,
    ) -> Result<Vec<Row>, StorageError> {
        self.update_inner(filter, patch, Some(limit), return_rows, profile, true)
            .await
    }

    /// Update the row whose primary key equals `id` and return it.
    pub async fn update_by_id(
        &self,
        id: impl Into<Value>,
        patch: Row,
        profile: Option<&str>,
    ) -> Result<Option<Row>, StorageError> {
        let pk = self.schema.require_primary_key()?;
        let rows = self.update_by(Filter::eq(pk, id), patch, true, profile).await?;
        Ok(rows.into_iter().next())
    }

    /// Apply `patch` to every row. An empty table is not an error.
    pub async fn update_all(&self, patch: Row, profile: Option<&str>) -> Result<Vec<Row>, StorageError> {
        self.update_inner(Filter::all(), patch, None, true, profile, false)
            .await
    }

    async fn delete_inner(
        &self,
        filter: Filter,
        limit: Option<u64>,
        profile: Option<&str>,
        require_rows: bool,
    ) -> Result<Vec<Row>, StorageError> {
        let clause = self.where_clause(filter, profile, 1).await?;
        let sql = format!(
            "DELETE FROM {}{} RETURNING *",
            self.table(),
            self.limited_target(&clause.sql, limit)
        );

        let statement = self.statement(sql, clause.params, &clause.columns);
        let result = self.run("delete", &statement).await?;
        if require_rows && result.rows_affected == 0 && result.rows.is_empty() {
            return Err(self.write_failed("delete"));
        }
        self.read_rows(result.rows, profile).await
    }

    /// Delete rows matching `filter` (at most `limit`) and return them.
    /// Fails with `WriteFailed` when nothing matched.
    pub async fn delete_by(
        &self,
        filter: Filter,
        limit: Option<u64>,
        profile: Option<&str>,
    ) -> Result<Vec<Row>, StorageError> {
        self.delete_inner(filter, limit, profile, true).await
    }

    pub async fn delete_by_id(
        &self,
        id: impl Into<Value>,
        profile: Option<&str>,
    ) -> Result<Vec<Row>, StorageError> {
        let pk = self.schema.require_primary_key()?;
        self.delete_by(Filter::eq(pk, id), None, profile).await
    }

    /// Delete every row. An empty table is not an error.
    pub async fn delete_all(&self, profile: Option<&str>) -> Result<Vec<Row>, StorageError> {
        self.delete_inner(Filter::all(), None, profile, false).await
    }

    /// Run caller SQL and project the rows onto the schema. No decryption.
    pub async fn query(&self, statement: &Statement) -> Result<Vec<Row>, StorageError> {
        let result = self.run("query", statement).await?;
        Ok(result
            .rows
            .into_iter()
            .map(|row| self.schema.normalize_row(row))
            .collect())
    }

    /// Run caller SQL and return the executor's result untouched.
    pub async fn query_raw(&self, statement: &Statement) -> Result<QueryResult, StorageError> {
        self.run("query", statement).await
    }

    /// Run statements in one transaction. See [`execute_batch`].
    pub async fn batch(&self, statements: &[Statement]) -> Result<Vec<QueryResult>, StorageError> {
        execute_batch(&self.executor, statements).await
    }

    /// Run steps with per-statement hooks in one transaction. See [`execute_batch_steps`].
    pub async fn batch_steps(&self, steps: Vec<BatchStep>) -> Result<Vec<QueryResult>, StorageError> {
        execute_batch_steps(&self.executor, steps).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCrypto, ScriptedExecutor};
    use crate::{FieldGroup, FieldRole, Operator};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::builder("users")
            .primary_key("id")
            .plain("username")
            .field("phone", FieldRole::Encrypt)
            .field("secret", FieldRole::Hash)
            .column_type("id", ColumnType::BigInt)
            .column_type("username", ColumnType::Text)
            .column_type("phone", ColumnType::Text)
            .build()
            .unwrap()
    }

    fn store(executor: &ScriptedExecutor, enabled: bool) -> RecordStore<ScriptedExecutor> {
        let config = StoreConfig::new(Arc::new(FakeCrypto { enabled }));
        RecordStore::new(executor.clone(), schema(), config)
    }

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    fn stored_user() -> Value {
        json!({
            "id": 1,
            "username": "a",
            "phone": FakeCrypto::ciphertext(&json!("555"), "default"),
            "__phone": FakeCrypto::checksum_of(&json!("555"), "default"),
            "secret": FakeCrypto::hash_of(&json!("pw"), None, "default"),
        })
    }

    #[tokio::test]
    async fn test_create_writes_ciphertext_checksum_and_hash() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![stored_user()]);
        let store = store(&executor, true);

        let created = store
            .create(row(json!({"username": "a", "phone": "555", "secret": "pw"})), None)
            .await
            .unwrap();

        let statement = executor.last();
        assert_eq!(
            statement.sql,
            r#"INSERT INTO "users" ("username", "phone", "secret", "__phone") VALUES ($1, $2, $3, $4) RETURNING *"#
        );
        assert_eq!(
            statement.params,
            vec![
                json!("a"),
                FakeCrypto::ciphertext(&json!("555"), "default"),
                FakeCrypto::hash_of(&json!("pw"), None, "default"),
                FakeCrypto::checksum_of(&json!("555"), "default"),
            ]
        );

        // Plain Encrypt stays ciphertext on generic reads; the shadow column is dropped.
        assert_eq!(created["phone"], FakeCrypto::ciphertext(&json!("555"), "default"));
        assert_eq!(created["secret"], FakeCrypto::hash_of(&json!("pw"), None, "default"));
        assert!(!created.contains_key("__phone"));
    }

    #[tokio::test]
    async fn test_create_with_no_rows_fails() {
        let executor = ScriptedExecutor::new();
        let store = store(&executor, true);

        let result = store.create(row(json!({"username": "a"})), None).await;
        assert!(matches!(result, Err(StorageError::WriteFailed(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_fields() {
        let executor = ScriptedExecutor::new();
        let store = store(&executor, true);

        let result = store.create(row(json!({"__phone": "x"})), None).await;
        assert!(matches!(result, Err(StorageError::UnknownField(_))));
        assert!(executor.executed().is_empty());
    }

    #[tokio::test]
    async fn test_create_nulls_inline_and_empty_row_uses_defaults() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![json!({"id": 1})]);
        executor.push_rows(vec![json!({"id": 2})]);
        let store = store(&executor, false);

        store
            .create(row(json!({"username": null, "phone": "1"})), None)
            .await
            .unwrap();
        let statement = executor.last();
        assert_eq!(
            statement.sql,
            r#"INSERT INTO "users" ("username", "phone") VALUES (NULL, $1) RETURNING *"#
        );
        assert_eq!(statement.params, vec![json!("1")]);

        let created = store.create(Row::new(), None).await.unwrap();
        assert_eq!(executor.last().sql, r#"INSERT INTO "users" DEFAULT VALUES RETURNING *"#);
        assert_eq!(created["id"], json!(2));
        assert_eq!(created["username"], Value::Null);
    }

    #[tokio::test]
    async fn test_find_by_encrypted_field_searches_shadow_column() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![stored_user()]);
        let store = store(&executor, true);

        let rows = store.find_by(Filter::eq("phone", "555"), None, None).await.unwrap();

        let statement = executor.last();
        assert_eq!(statement.sql, r#"SELECT * FROM "users" WHERE "__phone"=$1"#);
        assert_eq!(
            statement.params,
            vec![FakeCrypto::checksum_of(&json!("555"), "default")]
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], json!("a"));
    }

    #[tokio::test]
    async fn test_find_by_id_and_find_all() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![json!({"id": 7, "username": "b"})]);
        executor.push_rows(vec![]);
        let store = store(&executor, true);

        let found = store.find_by_id(7, None).await.unwrap().unwrap();
        assert_eq!(found["username"], json!("b"));
        assert_eq!(
            executor.last().sql,
            r#"SELECT * FROM "users" WHERE "id"=$1 LIMIT 1"#
        );

        let all = store.find_all(None, None).await.unwrap();
        assert!(all.is_empty());
        assert_eq!(executor.last().sql, r#"SELECT * FROM "users""#);
    }

    #[tokio::test]
    async fn test_update_continues_parameter_index_into_filter() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![stored_user()]);
        let store = store(&executor, true);

        let filter = Filter::with_operator(
            FieldGroup::new().eq("phone", "555").eq("username", "a"),
            Operator::Or,
        );
        let rows = store
            .update_by(filter, row(json!({"secret": "pw", "username": "a"})), true, None)
            .await
            .unwrap();

        let statement = executor.last();
        assert_eq!(
            statement.sql,
            r#"UPDATE "users" SET "secret"=$1, "username"=$2 WHERE "__phone"=$3 OR "username"=$4 RETURNING *"#
        );
        assert_eq!(
            statement.params,
            vec![
                FakeCrypto::hash_of(&json!("pw"), None, "default"),
                json!("a"),
                FakeCrypto::checksum_of(&json!("555"), "default"),
                json!("a"),
            ]
        );
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_statements_carry_declared_types_except_for_sensitive_columns() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![stored_user()]);
        executor.push_rows(vec![stored_user()]);
        let store = store(&executor, true);

        store
            .create(row(json!({"username": "a", "phone": "555", "secret": "pw"})), None)
            .await
            .unwrap();
        assert_eq!(
            executor.last().param_types,
            vec![Some(ColumnType::Text), None, None, None]
        );

        let filter = Filter::with_operator(
            FieldGroup::new().eq("phone", "555").eq("id", 1),
            Operator::And,
        );
        store
            .update_by(filter, row(json!({"secret": "pw", "username": "a"})), false, None)
            .await
            .unwrap();
        assert_eq!(
            executor.last().param_types,
            vec![None, Some(ColumnType::Text), None, Some(ColumnType::BigInt)]
        );
    }

    #[tokio::test]
    async fn test_explicit_profile_drives_search_and_auto_decrypt() {
        let schema = Schema::builder("contacts")
            .primary_key("id")
            .field("phone", FieldRole::AutoCrypt)
            .build()
            .unwrap();
        let executor = ScriptedExecutor::new();
        let stored = json!({
            "id": 1,
            "phone": FakeCrypto::ciphertext(&json!("555"), "eu"),
            "__phone": FakeCrypto::checksum_of(&json!("555"), "eu"),
        });
        executor.push_rows(vec![stored.clone()]);
        executor.push_rows(vec![stored.clone()]);
        executor.push_rows(vec![stored]);
        let store = RecordStore::new(
            executor.clone(),
            schema,
            StoreConfig::new(Arc::new(FakeCrypto::enabled())),
        );
        let eu_sum = FakeCrypto::checksum_of(&json!("555"), "eu");

        let found = store
            .find_by(Filter::eq("phone", "555"), None, Some("eu"))
            .await
            .unwrap();
        assert_eq!(executor.last().params, vec![eu_sum.clone()]);
        assert_eq!(found[0]["phone"], json!("555"));

        let by_id = store.find_by_id(1, Some("eu")).await.unwrap().unwrap();
        assert_eq!(by_id["phone"], json!("555"));

        let deleted = store
            .delete_by(Filter::eq("phone", "555"), None, Some("eu"))
            .await
            .unwrap();
        assert_eq!(executor.last().params, vec![eu_sum]);
        assert_eq!(deleted[0]["phone"], json!("555"));
    }

    #[tokio::test]
    async fn test_update_by_with_profile_rewrites_filter_under_that_profile() {
        let executor = ScriptedExecutor::new();
        executor.push_ok(QueryResult {
            rows: Vec::new(),
            rows_affected: 1,
        });
        let store = store(&executor, true);

        store
            .update_by(Filter::eq("phone", "555"), row(json!({"username": "b"})), false, Some("eu"))
            .await
            .unwrap();

        let statement = executor.last();
        assert_eq!(
            statement.sql,
            r#"UPDATE "users" SET "username"=$1 WHERE "__phone"=$2"#
        );
        assert_eq!(
            statement.params,
            vec![json!("b"), FakeCrypto::checksum_of(&json!("555"), "eu")]
        );
    }

    #[tokio::test]
    async fn test_select_by_projects_known_columns() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![json!({"id": 1, "username": "a"})]);
        let store = store(&executor, true);

        let rows = store
            .select_by(Filter::eq("id", 1), &["id", "username"], Some(5), None)
            .await
            .unwrap();
        assert_eq!(
            executor.last().sql,
            r#"SELECT "id", "username" FROM "users" WHERE "id"=$1 LIMIT 5"#
        );
        assert_eq!(rows[0]["username"], json!("a"));
        assert_eq!(rows[0]["phone"], Value::Null);

        let unknown = store
            .select_by(Filter::all(), &["__phone"], None, None)
            .await;
        assert!(matches!(unknown, Err(StorageError::UnknownField(_))));
        assert_eq!(executor.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_steps_run_hooks_through_the_store() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![json!({"id": 9})]);
        let store = store(&executor, false);

        let steps = vec![
            BatchStep::new(Statement::raw(r#"INSERT INTO "users" DEFAULT VALUES RETURNING *"#))
                .then(|result, next| {
                    if let Some(next) = next {
                        next.params.push(result.rows[0]["id"].clone());
                    }
                    Ok(())
                }),
            BatchStep::new(Statement::raw(r#"DELETE FROM "users" WHERE "id"=$1"#)),
        ];
        let results = store.batch_steps(steps).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(executor.committed()[1].params, vec![json!(9)]);
    }

    #[tokio::test]
    async fn test_update_with_no_match_fails_and_empty_patch_rejected() {
        let executor = ScriptedExecutor::new();
        let store = store(&executor, false);

        let missing = store
            .update_by_id(3, row(json!({"username": "z"})), None)
            .await;
        assert!(matches!(missing, Err(StorageError::WriteFailed(_))));

        let empty = store.update_by(Filter::eq("id", 3), Row::new(), true, None).await;
        assert!(matches!(empty, Err(StorageError::EmptyPatch(_))));
        assert_eq!(executor.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_update_all_tolerates_empty_table() {
        let executor = ScriptedExecutor::new();
        let store = store(&executor, false);

        let rows = store
            .update_all(row(json!({"username": "z"})), None)
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(
            executor.last().sql,
            r#"UPDATE "users" SET "username"=$1 RETURNING *"#
        );
    }

    #[tokio::test]
    async fn test_delete_by_zero_rows_fails_one_row_returned() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![]);
        executor.push_rows(vec![json!({"id": 7, "username": "gone"})]);
        let store = store(&executor, true);

        let missing = store.delete_by(Filter::eq("id", 7), None, None).await;
        assert!(matches!(missing, Err(StorageError::WriteFailed(_))));

        let deleted = store.delete_by(Filter::eq("id", 7), None, None).await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0]["username"], json!("gone"));
        assert_eq!(
            executor.last().sql,
            r#"DELETE FROM "users" WHERE "id"=$1 RETURNING *"#
        );
    }

    #[tokio::test]
    async fn test_limited_delete_and_update_use_ctid() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![json!({"id": 1})]);
        executor.push_rows(vec![json!({"id": 1})]);
        let store = store(&executor, false);

        store
            .delete_by(Filter::eq("username", "a"), Some(2), None)
            .await
            .unwrap();
        assert_eq!(
            executor.last().sql,
            r#"DELETE FROM "users" WHERE ctid IN (SELECT ctid FROM "users" WHERE "username"=$1 LIMIT 2) RETURNING *"#
        );

        store
            .update_limited_by(Filter::eq("username", "a"), row(json!({"username": "b"})), 1, false, None)
            .await
            .unwrap();
        assert_eq!(
            executor.last().sql,
            r#"UPDATE "users" SET "username"=$1 WHERE ctid IN (SELECT ctid FROM "users" WHERE "username"=$2 LIMIT 1)"#
        );
    }

    #[tokio::test]
    async fn test_delete_all_tolerates_empty_table() {
        let executor = ScriptedExecutor::new();
        let store = store(&executor, true);

        assert!(store.delete_all(None).await.unwrap().is_empty());
        assert_eq!(executor.last().sql, r#"DELETE FROM "users" RETURNING *"#);
    }

    #[tokio::test]
    async fn test_crypto_unavailable_propagates() {
        struct Broken;

        #[async_trait::async_trait]
        impl crate::CryptoProvider for Broken {
            async fn is_enabled(&self) -> bool {
                true
            }
            async fn encrypt(&self, _: &Value, _: &str) -> Result<Value, StorageError> {
                Err(StorageError::CryptoUnavailable("kms down".to_string()))
            }
            async fn decrypt(&self, _: &Value, _: &str) -> Result<Value, StorageError> {
                Err(StorageError::CryptoUnavailable("kms down".to_string()))
            }
            async fn hash(&self, _: &Value, _: Option<&str>, _: &str) -> Result<Value, StorageError> {
                Err(StorageError::CryptoUnavailable("kms down".to_string()))
            }
            async fn checksum(&self, _: &Value, _: &str) -> Result<Value, StorageError> {
                Err(StorageError::CryptoUnavailable("kms down".to_string()))
            }
        }

        let executor = ScriptedExecutor::new();
        let store = RecordStore::new(executor.clone(), schema(), StoreConfig::new(Arc::new(Broken)));

        let result = store.find_by(Filter::eq("phone", "555"), None, None).await;
        assert!(matches!(result, Err(StorageError::CryptoUnavailable(_))));
        assert!(executor.executed().is_empty());
    }

    #[tokio::test]
    async fn test_query_normalizes_without_decrypting() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![stored_user()]);
        let store = store(&executor, true);

        let rows = store
            .query(&Statement::raw(r#"SELECT * FROM "users""#))
            .await
            .unwrap();
        assert_eq!(rows[0]["phone"], stored_user()["phone"]);
        assert!(!rows[0].contains_key("__phone"));
    }
}
