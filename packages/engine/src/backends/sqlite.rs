use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection, Row};

use crate::errors::backend_error;
use crate::{QueryResult, StrataBackend, StrataError, Value};

pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn in_memory() -> Result<Self, StrataError> {
        let conn = Connection::open_in_memory().map_err(backend_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StrataError> {
        let conn = Connection::open(path).map_err(backend_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait(?Send)]
impl StrataBackend for SqliteBackend {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, StrataError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| backend_error("sqlite mutex poisoned"))?;

        let mut stmt = conn.prepare(sql).map_err(backend_error)?;
        let columns = stmt
            .column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect::<Vec<_>>();
        let bound_params = params.iter().cloned().map(to_sql_value);
        let mut rows = stmt
            .query(params_from_iter(bound_params))
            .map_err(backend_error)?;
        let mut result_rows = Vec::new();
        while let Some(row) = rows.next().map_err(backend_error)? {
            result_rows.push(map_row(row)?);
        }
        Ok(QueryResult {
            columns,
            rows: result_rows,
        })
    }
}

fn map_row(row: &Row<'_>) -> Result<Vec<Value>, StrataError> {
    let mut values = Vec::new();
    for idx in 0..row.as_ref().column_count() {
        let value = row.get_ref(idx).map_err(backend_error)?;
        values.push(match value {
            rusqlite::types::ValueRef::Null => Value::Null,
            rusqlite::types::ValueRef::Integer(value) => Value::Integer(value),
            rusqlite::types::ValueRef::Real(value) => Value::Real(value),
            rusqlite::types::ValueRef::Text(value) => {
                Value::Text(String::from_utf8_lossy(value).to_string())
            }
            rusqlite::types::ValueRef::Blob(value) => Value::Blob(value.to_vec()),
        });
    }
    Ok(values)
}

fn to_sql_value(value: Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(value) => rusqlite::types::Value::Integer(value),
        Value::Real(value) => rusqlite::types::Value::Real(value),
        Value::Text(value) => rusqlite::types::Value::Text(value),
        Value::Blob(value) => rusqlite::types::Value::Blob(value),
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteBackend;
    use crate::{StrataBackend, Value};

    #[tokio::test]
    async fn executes_statements_and_maps_values() {
        let backend = SqliteBackend::in_memory().expect("open sqlite");
        backend
            .execute("CREATE TABLE t (a INTEGER, b TEXT, c REAL, d BLOB)", &[])
            .await
            .expect("create table");
        backend
            .execute(
                "INSERT INTO t (a, b, c, d) VALUES (?1, ?2, ?3, ?4)",
                &[
                    Value::Integer(7),
                    Value::Text("x".to_string()),
                    Value::Real(1.5),
                    Value::Blob(vec![1, 2]),
                ],
            )
            .await
            .expect("insert row");

        let result = backend
            .execute("SELECT a, b, c, d, NULL AS e FROM t", &[])
            .await
            .expect("select row");
        assert_eq!(result.columns, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(
            result.rows,
            vec![vec![
                Value::Integer(7),
                Value::Text("x".to_string()),
                Value::Real(1.5),
                Value::Blob(vec![1, 2]),
                Value::Null,
            ]]
        );
    }

    #[tokio::test]
    async fn reports_sql_errors_as_backend_errors() {
        let backend = SqliteBackend::in_memory().expect("open sqlite");
        let err = backend
            .execute("SELECT * FROM missing_table", &[])
            .await
            .expect_err("missing table should fail");
        assert_eq!(err.code, "STRATA_ERROR_BACKEND");
    }
}
