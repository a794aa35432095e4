//! PostgreSQL store
//!
//! `tokio-postgres` is async; the store owns a single-threaded runtime and
//! blocks on each call so that it can sit behind the synchronous [`Store`]
//! trait. Parameters are converted according to the types PostgreSQL infers
//! for the prepared statement, so a null binds as a typed null.

use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::runtime::Runtime;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};
use tracing::{error, warn};

use super::Store;
use crate::config::DatabaseSettings;
use crate::error::StoreError;
use crate::frame::Value;
use crate::schema::Dialect;

/// PostgreSQL connection driven from synchronous code
pub struct PostgresStore {
    runtime: Runtime,
    client: Client,
    in_transaction: bool,
}

impl PostgresStore {
    /// Connect with a libpq-style connection string
    pub fn connect(conninfo: &str) -> Result<Self, StoreError> {
        let config: Config = conninfo
            .parse()
            .map_err(|e: tokio_postgres::Error| StoreError::Connection(e.to_string()))?;
        Self::connect_with(&config)
    }

    /// Connect with the host, port, database and credentials of `settings`
    pub fn from_settings(settings: &DatabaseSettings) -> Result<Self, StoreError> {
        Self::connect_with(&settings.pg_config())
    }

    /// Connect with a typed connection config
    pub fn connect_with(config: &Config) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let (client, connection) = runtime
            .block_on(config.connect(NoTls))
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        // Drive the connection whenever the runtime is blocked on a query
        runtime.spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        Ok(Self {
            runtime,
            client,
            in_transaction: false,
        })
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            self.runtime.block_on(self.client.batch_execute("BEGIN"))?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        if self.in_transaction {
            if let Err(e) = self.runtime.block_on(self.client.batch_execute("ROLLBACK")) {
                warn!(error = %e, "Rollback failed");
            }
            self.in_transaction = false;
        }
    }

    fn run_execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        self.runtime.block_on(async {
            let stmt = self.client.prepare(sql).await?;
            let bound = bind_params(params, stmt.params())?;
            let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|b| b.as_ref()).collect();
            Ok(self.client.execute(&stmt, &refs).await?)
        })
    }
}

impl Store for PostgresStore {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        self.begin()?;
        match self.run_execute(sql, params) {
            Ok(affected) => Ok(affected),
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>, StoreError> {
        let rows = self.runtime.block_on(async {
            let stmt = self.client.prepare(sql).await?;
            let bound = bind_params(params, stmt.params())?;
            let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|b| b.as_ref()).collect();
            Ok::<_, StoreError>(self.client.query(&stmt, &refs).await?)
        })?;
        rows.iter().map(read_row).collect()
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), StoreError> {
        if let Err(e) = self.runtime.block_on(self.client.batch_execute(sql)) {
            self.rollback();
            return Err(e.into());
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            self.in_transaction = false;
            self.runtime.block_on(self.client.batch_execute("COMMIT"))?;
        }
        Ok(())
    }
}

fn nullable<T>(value: &Value, convert: impl Fn(&Value) -> Option<T>) -> Option<Option<T>> {
    if value.is_null() {
        Some(None)
    } else {
        convert(value).map(Some)
    }
}

fn bind_params(params: &[Value], types: &[Type]) -> Result<Vec<Box<dyn ToSql + Sync>>, StoreError> {
    if params.len() != types.len() {
        return Err(StoreError::Database(format!(
            "Statement expects {} parameters, got {}",
            types.len(),
            params.len()
        )));
    }
    params
        .iter()
        .zip(types)
        .enumerate()
        .map(|(index, (value, ty))| bind_param(index + 1, value, ty))
        .collect()
}

fn bind_param(index: usize, value: &Value, ty: &Type) -> Result<Box<dyn ToSql + Sync>, StoreError> {
    let unsupported = || StoreError::UnsupportedValue {
        index,
        value: value.to_string(),
        expected: ty.name().to_string(),
    };

    let boxed: Box<dyn ToSql + Sync> = if *ty == Type::INT2 {
        Box::new(nullable(value, |v| v.as_i64().and_then(|i| i16::try_from(i).ok())).ok_or_else(unsupported)?)
    } else if *ty == Type::INT4 {
        Box::new(nullable(value, |v| v.as_i64().and_then(|i| i32::try_from(i).ok())).ok_or_else(unsupported)?)
    } else if *ty == Type::INT8 {
        Box::new(nullable(value, Value::as_i64).ok_or_else(unsupported)?)
    } else if *ty == Type::FLOAT4 {
        Box::new(nullable(value, |v| v.as_f64().map(|f| f as f32)).ok_or_else(unsupported)?)
    } else if *ty == Type::FLOAT8 {
        Box::new(nullable(value, Value::as_f64).ok_or_else(unsupported)?)
    } else if *ty == Type::BOOL {
        Box::new(
            nullable(value, |v| match v {
                Value::Bool(b) => Some(*b),
                _ => None,
            })
            .ok_or_else(unsupported)?,
        )
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME {
        Box::new(nullable(value, |v| Some(v.render())).ok_or_else(unsupported)?)
    } else if *ty == Type::TIMESTAMPTZ {
        Box::new(nullable(value, Value::as_timestamp).ok_or_else(unsupported)?)
    } else if *ty == Type::TIMESTAMP {
        Box::new(nullable(value, |v| v.as_timestamp().map(|ts| ts.naive_utc())).ok_or_else(unsupported)?)
    } else {
        return Err(unsupported());
    };
    Ok(boxed)
}

fn read_row(row: &Row) -> Result<Vec<Value>, StoreError> {
    (0..row.len())
        .map(|i| {
            let ty = row.columns()[i].type_().clone();
            let value = if ty == Type::INT2 {
                row.try_get::<_, Option<i16>>(i)?.map(|n| Value::Int(n.into()))
            } else if ty == Type::INT4 {
                row.try_get::<_, Option<i32>>(i)?.map(|n| Value::Int(n.into()))
            } else if ty == Type::INT8 {
                row.try_get::<_, Option<i64>>(i)?.map(Value::Int)
            } else if ty == Type::FLOAT4 {
                row.try_get::<_, Option<f32>>(i)?.map(|f| Value::Float(f.into()))
            } else if ty == Type::FLOAT8 {
                row.try_get::<_, Option<f64>>(i)?.map(Value::Float)
            } else if ty == Type::BOOL {
                row.try_get::<_, Option<bool>>(i)?.map(Value::Bool)
            } else if ty == Type::TIMESTAMPTZ {
                row.try_get::<_, Option<DateTime<Utc>>>(i)?.map(Value::Timestamp)
            } else if ty == Type::TIMESTAMP {
                row.try_get::<_, Option<NaiveDateTime>>(i)?
                    .map(|ts| Value::Timestamp(ts.and_utc()))
            } else {
                row.try_get::<_, Option<String>>(i)
                    .map_err(|_| StoreError::Database(format!("Unsupported result type {}", ty.name())))?
                    .map(Value::Text)
            };
            Ok(value.unwrap_or(Value::Null))
        })
        .collect()
}
