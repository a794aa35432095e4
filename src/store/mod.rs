//! Persistence boundary
//!
//! The pipeline talks to a relational store through the [`Store`] trait:
//! statements with positional `$n` placeholders, scalar [`Value`] parameters,
//! and explicit commits. Two backends are provided behind feature flags:
//!
//! - `duckdb-backend` (default): embedded DuckDB, file or in-memory
//! - `postgres-backend`: PostgreSQL via `tokio-postgres`
//!
//! Statements run inside an implicit transaction that starts with the first
//! write and ends with [`Store::commit`]. A failed statement rolls the open
//! transaction back.

#[cfg(feature = "duckdb-backend")]
mod duckdb_store;
#[cfg(feature = "postgres-backend")]
mod postgres_store;

#[cfg(feature = "duckdb-backend")]
pub use duckdb_store::DuckDbStore;
#[cfg(feature = "postgres-backend")]
pub use postgres_store::PostgresStore;

use tracing::info;

use crate::config::DatabaseSettings;
use crate::error::StoreError;
use crate::frame::Value;
use crate::schema::Dialect;

/// A relational store the loader writes to
pub trait Store {
    /// SQL dialect used for DDL generation
    fn dialect(&self) -> Dialect;

    /// Execute one parameterized statement, returning the affected row count
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StoreError>;

    /// Run a query and return every row
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>, StoreError>;

    /// Run a query and return its first row, if any
    fn query_row(&mut self, sql: &str, params: &[Value]) -> Result<Option<Vec<Value>>, StoreError> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Execute several semicolon-separated statements without parameters
    fn execute_batch(&mut self, sql: &str) -> Result<(), StoreError>;

    /// Make all writes since the last commit durable
    fn commit(&mut self) -> Result<(), StoreError>;
}

/// Open the store named by the database settings
///
/// The `driver` selects the backend: `duckdb` opens the file named by `name`
/// (`:memory:` for an in-memory database), `postgres`/`psycopg2` connects
/// with the host, port, database and credentials of the settings.
pub fn open_store(settings: &DatabaseSettings) -> Result<Box<dyn Store>, StoreError> {
    let driver = settings.driver.to_lowercase();
    match driver.as_str() {
        #[cfg(feature = "duckdb-backend")]
        "duckdb" | "" => {
            info!(path = %settings.name, "Opening DuckDB store");
            let store = if settings.name == ":memory:" {
                DuckDbStore::memory()?
            } else {
                DuckDbStore::open(&settings.name)?
            };
            Ok(Box::new(store))
        }
        #[cfg(feature = "postgres-backend")]
        "postgres" | "postgresql" | "psycopg2" => {
            info!(
                host = %settings.host,
                port = settings.port,
                database = %settings.name,
                "Connecting to PostgreSQL store"
            );
            Ok(Box::new(PostgresStore::from_settings(settings)?))
        }
        other => Err(StoreError::Connection(format!(
            "Unsupported database driver '{}' (is the backend feature enabled?)",
            other
        ))),
    }
}

/// Count rows of a table
pub fn count_rows(store: &mut dyn Store, table: &str) -> Result<i64, StoreError> {
    let sql = format!("SELECT COUNT(*) FROM {}", crate::schema::quote_identifier(table));
    let row = store.query_row(&sql, &[])?;
    Ok(row
        .and_then(|r| r.into_iter().next())
        .and_then(|v| v.as_i64())
        .unwrap_or(0))
}
