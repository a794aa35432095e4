//! Embedded DuckDB store

use chrono::{DateTime, Utc};
use duckdb::types::{TimeUnit, Value as DbValue};
use duckdb::{Connection, params_from_iter};
use tracing::warn;

use super::Store;
use crate::error::StoreError;
use crate::frame::Value;
use crate::schema::Dialect;

/// DuckDB database opened from a file or in memory
pub struct DuckDbStore {
    conn: Connection,
    path: Option<String>,
    in_transaction: bool,
}

impl DuckDbStore {
    /// Open or create a database at the given path
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
            in_transaction: false,
        })
    }

    /// Open an in-memory database (for testing)
    pub fn memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            conn,
            path: None,
            in_transaction: false,
        })
    }

    /// Get the database path (if not in-memory)
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN TRANSACTION")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        if self.in_transaction {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "Rollback failed");
            }
            self.in_transaction = false;
        }
    }
}

impl Store for DuckDbStore {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        self.begin()?;
        let result = self
            .conn
            .prepare(sql)
            .and_then(|mut stmt| stmt.execute(params_from_iter(params.iter().map(to_duckdb))));
        match result {
            Ok(affected) => Ok(affected as u64),
            Err(e) => {
                self.rollback();
                Err(e.into())
            }
        }
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter().map(to_duckdb)))?;
        let column_count = rows.as_ref().map(|s| s.column_count()).unwrap_or(0);

        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value: DbValue = row.get(i)?;
                values.push(from_duckdb(value));
            }
            results.push(values);
        }
        Ok(results)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), StoreError> {
        if let Err(e) = self.conn.execute_batch(sql) {
            self.rollback();
            return Err(e.into());
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            self.in_transaction = false;
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }
}

fn to_duckdb(value: &Value) -> DbValue {
    match value {
        Value::Null => DbValue::Null,
        Value::Bool(b) => DbValue::Boolean(*b),
        Value::Int(i) => DbValue::BigInt(*i),
        Value::Float(f) => DbValue::Double(*f),
        Value::Timestamp(ts) => DbValue::Timestamp(TimeUnit::Microsecond, ts.timestamp_micros()),
        Value::Text(s) => DbValue::Text(s.clone()),
    }
}

fn from_duckdb(value: DbValue) -> Value {
    match value {
        DbValue::Null => Value::Null,
        DbValue::Boolean(b) => Value::Bool(b),
        DbValue::TinyInt(n) => Value::Int(n.into()),
        DbValue::SmallInt(n) => Value::Int(n.into()),
        DbValue::Int(n) => Value::Int(n.into()),
        DbValue::BigInt(n) => Value::Int(n),
        DbValue::UTinyInt(n) => Value::Int(n.into()),
        DbValue::USmallInt(n) => Value::Int(n.into()),
        DbValue::UInt(n) => Value::Int(n.into()),
        DbValue::HugeInt(n) => i64::try_from(n).map(Value::Int).unwrap_or(Value::Float(n as f64)),
        DbValue::Float(f) => Value::Float(f.into()),
        DbValue::Double(f) => Value::Float(f),
        DbValue::Text(s) => Value::Text(s),
        DbValue::Timestamp(unit, n) => {
            let micros = match unit {
                TimeUnit::Second => n.saturating_mul(1_000_000),
                TimeUnit::Millisecond => n.saturating_mul(1_000),
                TimeUnit::Microsecond => n,
                TimeUnit::Nanosecond => n / 1_000,
            };
            DateTime::<Utc>::from_timestamp_micros(micros)
                .map(Value::Timestamp)
                .unwrap_or(Value::Null)
        }
        other => Value::Text(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_roundtrip() {
        let mut store = DuckDbStore::memory().unwrap();
        assert!(store.path().is_none());
        store
            .execute_batch("CREATE TABLE t (id INTEGER, ts TIMESTAMP, name VARCHAR, d DOUBLE)")
            .unwrap();

        let ts = DateTime::<Utc>::from_timestamp_millis(1_541_106_106_796).unwrap();
        let affected = store
            .execute(
                "INSERT INTO t VALUES ($1, $2, $3, $4)",
                &[Value::Int(1), Value::Timestamp(ts), Value::from("a"), Value::Float(2.5)],
            )
            .unwrap();
        assert_eq!(affected, 1);
        store.commit().unwrap();

        let row = store.query_row("SELECT id, ts, name, d FROM t", &[]).unwrap().unwrap();
        assert_eq!(row[0], Value::Int(1));
        assert_eq!(row[1], Value::Timestamp(ts));
        assert_eq!(row[2], Value::from("a"));
        assert_eq!(row[3], Value::Float(2.5));
    }

    #[test]
    fn test_failed_statement_rolls_back_uncommitted_rows() {
        let mut store = DuckDbStore::memory().unwrap();
        store
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .unwrap();

        store.execute("INSERT INTO t VALUES ($1)", &[Value::Int(1)]).unwrap();
        store.commit().unwrap();

        store.execute("INSERT INTO t VALUES ($1)", &[Value::Int(2)]).unwrap();
        assert!(store.execute("INSERT INTO t VALUES ($1)", &[Value::Int(1)]).is_err());

        // The store stays usable after the failure
        store.execute("INSERT INTO t VALUES ($1)", &[Value::Int(3)]).unwrap();
        store.commit().unwrap();

        let rows = store.query("SELECT id FROM t ORDER BY id", &[]).unwrap();
        assert_eq!(rows, vec![vec![Value::Int(1)], vec![Value::Int(3)]]);
    }

    #[test]
    fn test_null_parameters() {
        let mut store = DuckDbStore::memory().unwrap();
        store.execute_batch("CREATE TABLE t (a VARCHAR, b INTEGER)").unwrap();
        store
            .execute("INSERT INTO t VALUES ($1, $2)", &[Value::Null, Value::Null])
            .unwrap();
        store.commit().unwrap();
        let row = store.query_row("SELECT a, b FROM t", &[]).unwrap().unwrap();
        assert!(row.iter().all(Value::is_null));
    }
}
