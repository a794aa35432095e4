//! Error types for loading, cleansing, templating and storing records

use std::path::PathBuf;
use thiserror::Error;

use crate::frame::Value;
use crate::schema::ColumnType;

/// Errors raised while discovering and decoding JSON-lines files
#[derive(Error, Debug)]
pub enum LoadError {
    /// A file could not be read
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line is not a valid JSON object
    #[error("JSON parsing error in {path} at line {line}: {error}")]
    Parse {
        path: PathBuf,
        line: usize,
        error: String,
    },

    /// Pattern matching error
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Errors raised by the cleansing engine and log transforms
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CleanseError {
    /// A requested column does not exist in the buffer
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// A value could not be converted to the declared type
    #[error("Cannot coerce {value} in column '{column}' (row {row}) to {target}")]
    TypeCoercion {
        column: String,
        row: usize,
        value: Value,
        target: ColumnType,
    },
}

/// Errors raised while generating insert statements
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Table has no declaration in the catalog
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Column is not declared for the target table
    #[error("Unknown column '{column}' for table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// No columns to insert
    #[error("Cannot build an insert for '{0}' without columns")]
    EmptyColumns(String),

    /// Identifier is not safe to embed in SQL
    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// Conflict key or merge column is not part of the insert
    #[error("Conflict column '{0}' is not among the inserted columns")]
    ConflictColumn(String),

    /// Buffer columns differ from the columns the statement was built for
    #[error("Column mismatch for '{table}': statement binds {expected:?}, buffer has {found:?}")]
    ColumnMismatch {
        table: String,
        expected: Vec<String>,
        found: Vec<String>,
    },
}

/// Errors from the persistence boundary
#[derive(Error, Debug)]
pub enum StoreError {
    /// Statement failed (constraint violation, malformed SQL, ...)
    #[error("Database error: {0}")]
    Database(String),

    /// Connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// A value cannot be bound to the parameter type the store expects
    #[error("Unsupported value {value} for parameter {index}: expected {expected}")]
    UnsupportedValue {
        index: usize,
        value: String,
        expected: String,
    },
}

/// Errors while resolving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required setting is absent
    #[error("Missing setting: {0}")]
    MissingSetting(String),

    /// A setting has an unusable value
    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },

    /// Config file could not be read
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML
    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Top-level error for an ETL run
#[derive(Error, Debug)]
pub enum EtlError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Cleanse(#[from] CleanseError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for ETL operations
pub type EtlResult<T> = Result<T, EtlError>;

impl EtlError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            EtlError::Load(LoadError::Parse { path, line, error }) => {
                format!(
                    "JSON parse error in {} at line {line}:\n{error}\n\n\
                    Hint: Every line of an input file must be one JSON object.",
                    path.display()
                )
            }
            EtlError::Load(LoadError::Io { path, source }) => {
                format!(
                    "Cannot read {}: {source}\n\n\
                    Hint: Check the song_data and log_data paths.",
                    path.display()
                )
            }
            EtlError::Load(LoadError::InvalidPattern(pattern)) => {
                format!(
                    "Invalid glob pattern: {pattern}\n\nHint: Use standard glob syntax like '*.json'."
                )
            }
            EtlError::Cleanse(CleanseError::MissingColumn(column)) => {
                format!(
                    "Missing column: {column}\n\nHint: Check that the input files contain the expected fields."
                )
            }
            EtlError::Store(StoreError::Connection(msg)) => {
                format!(
                    "Cannot connect to the database: {msg}\n\n\
                    Hint: Check the DATABASE_* settings or the [database] section of the config file."
                )
            }
            EtlError::Template(TemplateError::UnknownTable(table)) => {
                format!(
                    "Unknown table: {table}\n\nHint: Run 'songplay-etl create-tables' to see the declared tables."
                )
            }
            EtlError::Config(ConfigError::MissingSetting(key)) => {
                format!("Missing setting: {key}\n\nHint: Export {key} or set it in the config file.")
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(feature = "duckdb-backend")]
impl From<duckdb::Error> for StoreError {
    fn from(err: duckdb::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

#[cfg(feature = "postgres-backend")]
impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Database(err.to_string())
        }
    }
}
