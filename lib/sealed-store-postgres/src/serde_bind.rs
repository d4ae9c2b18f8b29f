//! Conversion between `serde_json` values and PostgreSQL arguments and rows.
//!
//! The core crate speaks `serde_json::Value` everywhere. Parameters are bound
//! by their declared [`ColumnType`] when the statement carries one, otherwise
//! by their JSON shape. Every column of a returned row is read back into a
//! JSON object keyed by column name.

use sealed_store::{ColumnType, Row, Statement, StorageError};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Arguments, Column, Row as _, TypeInfo};

fn backend(e: impl std::fmt::Display) -> StorageError {
    StorageError::StorageError(e.to_string())
}

/// Bind a JSON value to PgArguments.
///
/// Strings bind as text unless the column is declared `Datetime` (bound as
/// `TIMESTAMPTZ`) or `Json`. Nulls take the declared type. Arrays and objects
/// are bound as `JSONB`.
pub fn bind_json_value(
    args: &mut PgArguments,
    value: &Value,
    col_type: Option<ColumnType>,
) -> Result<(), StorageError> {
    match value {
        Value::Null => match col_type {
            Some(ColumnType::Datetime) => args.add(None::<chrono::DateTime<chrono::Utc>>),
            Some(ColumnType::BigInt) => args.add(None::<i64>),
            Some(ColumnType::Integer) => args.add(None::<i32>),
            Some(ColumnType::Boolean) => args.add(None::<bool>),
            Some(ColumnType::Json) => args.add(None::<Value>),
            Some(ColumnType::Text) | None => args.add(None::<String>),
        }
        .map_err(backend)?,
        Value::Bool(b) => args.add(*b).map_err(backend)?,
        Value::Number(n) => {
            if let (Some(ColumnType::Integer), Some(i)) = (col_type, n.as_i64()) {
                let i = i32::try_from(i)
                    .map_err(|_| StorageError::StorageError(format!("integer out of range: {}", i)))?;
                args.add(i).map_err(backend)?;
            } else if let Some(i) = n.as_i64() {
                args.add(i).map_err(backend)?;
            } else if let Some(u) = n.as_u64() {
                // PostgreSQL doesn't have unsigned, use i64
                let i = i64::try_from(u)
                    .map_err(|_| StorageError::StorageError(format!("integer out of range: {}", u)))?;
                args.add(i).map_err(backend)?;
            } else if let Some(f) = n.as_f64() {
                args.add(f).map_err(backend)?;
            } else {
                args.add(n.to_string()).map_err(backend)?;
            }
        }
        Value::String(s) => match col_type {
            Some(ColumnType::Datetime) => {
                let dt = chrono::DateTime::parse_from_rfc3339(s)
                    .map_err(|e| StorageError::StorageError(format!("Invalid datetime: {}", e)))?;
                args.add(dt.with_timezone(&chrono::Utc)).map_err(backend)?;
            }
            Some(ColumnType::Json) => args.add(value.clone()).map_err(backend)?,
            _ => args.add(s.as_str()).map_err(backend)?,
        },
        Value::Array(_) | Value::Object(_) => args.add(value.clone()).map_err(backend)?,
    }
    Ok(())
}

/// Bind every parameter of a statement, in order, using its declared types.
pub fn bind_params(statement: &Statement) -> Result<PgArguments, StorageError> {
    let mut args = PgArguments::default();
    for (idx, value) in statement.params.iter().enumerate() {
        bind_json_value(&mut args, value, statement.param_type(idx))?;
    }
    Ok(args)
}

/// Read every column of a row into a JSON object keyed by column name.
pub fn row_to_json(row: &PgRow) -> Result<Row, StorageError> {
    let mut obj = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        obj.insert(column.name().to_string(), extract_column_value(row, idx)?);
    }
    Ok(obj)
}

/// Extract a column value from a row as JSON
fn extract_column_value(row: &PgRow, idx: usize) -> Result<Value, StorageError> {
    let type_name = row.columns()[idx].type_info().name();

    let value = match type_name {
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)
            .map_err(backend)?
            .map(Value::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)
            .map_err(backend)?
            .map(|n| Value::Number(n.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .map_err(backend)?
            .map(|n| Value::Number(n.into())),
        "INT8" => row
            .try_get::<Option<i64>, _>(idx)
            .map_err(backend)?
            .map(|n| Value::Number(n.into())),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .map_err(backend)?
            .and_then(|n| serde_json::Number::from_f64(f64::from(n)).map(Value::Number)),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(idx)
            .map_err(backend)?
            .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number)),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .map_err(backend)?
            .map(|dt| Value::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map_err(backend)?
            .map(|dt| Value::String(dt.and_utc().to_rfc3339_opts(chrono::SecondsFormat::Micros, true))),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .map_err(backend)?
            .map(|d| Value::String(d.to_string())),
        "JSONB" | "JSON" => row.try_get::<Option<Value>, _>(idx).map_err(backend)?,
        // VARCHAR, TEXT, CHAR, NAME, ...
        _ => row
            .try_get::<Option<String>, _>(idx)
            .map_err(backend)?
            .map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binds_every_json_shape() {
        let statement = Statement::new(
            "SELECT 1",
            vec![
                Value::Null,
                json!(true),
                json!(-3),
                json!(u64::from(u32::MAX)),
                json!(1.5),
                json!("plain"),
                json!(["a", "b"]),
                json!({"k": "v"}),
            ],
        );

        let args = bind_params(&statement).unwrap();
        assert_eq!(args.len(), statement.params.len());
    }

    #[test]
    fn test_timestamp_shaped_text_binds_as_text_without_a_declared_type() {
        let mut args = PgArguments::default();
        bind_json_value(&mut args, &json!("2024-01-02T03:04:05Z"), None).unwrap();
        bind_json_value(&mut args, &json!("2024-01-02T03:04:05Z"), Some(ColumnType::Text))
            .unwrap();
        assert_eq!(args.len(), 2);

        let result = bind_json_value(&mut args, &json!("not a time"), Some(ColumnType::Datetime));
        assert!(matches!(result, Err(StorageError::StorageError(_))));
    }

    #[test]
    fn test_binds_by_declared_column_type() {
        let statement = Statement::new(
            "INSERT INTO t VALUES ($1, $2, $3, $4, $5)",
            vec![
                json!("2024-01-02T03:04:05Z"),
                Value::Null,
                json!(7),
                json!("{\"k\":1}"),
                json!("2024-01-02T03:04:05Z"),
            ],
        )
        .with_param_types(vec![
            Some(ColumnType::Datetime),
            Some(ColumnType::BigInt),
            Some(ColumnType::Integer),
            Some(ColumnType::Json),
        ]);

        let args = bind_params(&statement).unwrap();
        assert_eq!(args.len(), 5);
    }

    #[test]
    fn test_rejects_out_of_range_integers() {
        let mut args = PgArguments::default();
        let result = bind_json_value(&mut args, &json!(u64::MAX), None);
        assert!(matches!(result, Err(StorageError::StorageError(_))));

        let result = bind_json_value(&mut args, &json!(i64::MAX), Some(ColumnType::Integer));
        assert!(matches!(result, Err(StorageError::StorageError(_))));
    }
}
