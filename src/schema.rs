//! Typed declarations of the star schema
//!
//! Every table is declared once as an ordered list of columns with a semantic
//! type, nullability and key role. Both the bootstrap DDL and the templater's
//! column expectations are derived from these declarations.
//!
//! # Security
//!
//! Identifiers are validated before being embedded in SQL and always emitted
//! double-quoted, with internal quotes doubled.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EtlError, StoreError, TemplateError};
use crate::store::Store;

/// Maximum length for table and column names
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// SQL dialect spoken by a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    DuckDb,
    Postgres,
}

/// Semantic column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Timestamp,
    Boolean,
}

impl ColumnType {
    /// Physical type for a dialect
    pub fn sql_type(&self, dialect: Dialect) -> &'static str {
        match (self, dialect) {
            (ColumnType::Integer, _) => "INTEGER",
            (ColumnType::Float, Dialect::DuckDb) => "DOUBLE",
            (ColumnType::Float, Dialect::Postgres) => "DOUBLE PRECISION",
            (ColumnType::Text, _) => "VARCHAR",
            (ColumnType::Timestamp, Dialect::DuckDb) => "TIMESTAMP",
            (ColumnType::Timestamp, Dialect::Postgres) => "TIMESTAMPTZ",
            (ColumnType::Boolean, _) => "BOOLEAN",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::Text => "TEXT",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Boolean => "BOOLEAN",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "int" | "integer" => Ok(ColumnType::Integer),
            "float" | "double" => Ok(ColumnType::Float),
            "text" | "varchar" | "str" => Ok(ColumnType::Text),
            "timestamp" | "timestamptz" => Ok(ColumnType::Timestamp),
            "bool" | "boolean" => Ok(ColumnType::Boolean),
            _ => Err(format!("Unknown column type: {}", s)),
        }
    }
}

/// Role a column plays in the table key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyRole {
    #[default]
    None,
    /// Natural primary key supplied by the loader
    PrimaryKey,
    /// Surrogate key assigned by the store
    Serial,
}

/// Declaration of one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub role: KeyRole,
}

impl ColumnDef {
    /// Nullable, non-key column
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: true,
            role: KeyRole::None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.role = KeyRole::PrimaryKey;
        self
    }

    pub fn serial(mut self) -> Self {
        self.role = KeyRole::Serial;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    fn definition(&self, table: &str, dialect: Dialect) -> String {
        let name = quote_identifier(&self.name);
        match (self.role, dialect) {
            (KeyRole::Serial, Dialect::Postgres) => format!("  {} BIGSERIAL PRIMARY KEY", name),
            (KeyRole::Serial, Dialect::DuckDb) => format!(
                "  {} BIGINT PRIMARY KEY DEFAULT nextval('{}')",
                name,
                sequence_name(table, &self.name)
            ),
            (role, _) => {
                let mut def = format!("  {} {}", name, self.ty.sql_type(dialect));
                if !self.nullable {
                    def.push_str(" NOT NULL");
                }
                if role == KeyRole::PrimaryKey {
                    def.push_str(" PRIMARY KEY");
                }
                def
            }
        }
    }
}

/// Declaration of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub comment: Option<String>,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(name: &str, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.to_string(),
            comment: None,
            columns,
        }
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The column identifying a row (natural or surrogate)
    pub fn key_column(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.role != KeyRole::None)
    }

    /// Columns the loader supplies values for, in declaration order
    pub fn insertable_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.role != KeyRole::Serial)
            .map(|c| c.name.as_str())
            .collect()
    }

    fn serial_column(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.role == KeyRole::Serial)
    }

    /// DDL dropping the table and anything it owns
    pub fn drop_sql(&self, dialect: Dialect) -> String {
        let mut sql = format!("DROP TABLE IF EXISTS {};\n", quote_identifier(&self.name));
        if let (Dialect::DuckDb, Some(serial)) = (dialect, self.serial_column()) {
            sql.push_str(&format!(
                "DROP SEQUENCE IF EXISTS {};\n",
                quote_identifier(&sequence_name(&self.name, &serial.name))
            ));
        }
        sql
    }

    /// DDL creating the table, its sequence and its comment
    pub fn create_sql(&self, dialect: Dialect) -> String {
        let mut sql = String::new();

        if let (Dialect::DuckDb, Some(serial)) = (dialect, self.serial_column()) {
            sql.push_str(&format!(
                "CREATE SEQUENCE IF NOT EXISTS {} START 1;\n",
                quote_identifier(&sequence_name(&self.name, &serial.name))
            ));
        }

        let column_defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.definition(&self.name, dialect))
            .collect();

        sql.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n);\n",
            quote_identifier(&self.name),
            column_defs.join(",\n")
        ));

        if let Some(comment) = &self.comment {
            sql.push_str(&format!(
                "COMMENT ON TABLE {} IS '{}';\n",
                quote_identifier(&self.name),
                comment.replace('\'', "''")
            ));
        }

        sql
    }
}

fn sequence_name(table: &str, column: &str) -> String {
    format!("{}_{}_seq", table, column)
}

/// Validate a table or column name before it is embedded in SQL
///
/// Names must start with a letter or underscore and contain only ASCII
/// letters, digits and underscores.
pub fn validate_identifier(name: &str) -> Result<(), TemplateError> {
    let invalid = || TemplateError::InvalidIdentifier(name.to_string());

    let first = name.chars().next().ok_or_else(invalid)?;
    if name.len() > MAX_IDENTIFIER_LENGTH || !(first.is_ascii_alphabetic() || first == '_') {
        return Err(invalid());
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid());
    }
    Ok(())
}

/// Quote an identifier, doubling internal quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The five tables of the songplay star schema, fact table first
pub fn star_schema() -> Vec<TableSchema> {
    use ColumnType::*;

    vec![
        TableSchema::new(
            "songplays",
            vec![
                ColumnDef::new("songplay_id", Integer).serial(),
                ColumnDef::new("start_time", Timestamp).not_null(),
                ColumnDef::new("user_id", Integer),
                ColumnDef::new("level", Text),
                ColumnDef::new("song_id", Text),
                ColumnDef::new("artist_id", Text),
                ColumnDef::new("session_id", Integer),
                ColumnDef::new("location", Text),
                ColumnDef::new("user_agent", Text),
            ],
        )
        .with_comment("records in log data associated with song plays i.e. records with page NextSong"),
        TableSchema::new(
            "users",
            vec![
                ColumnDef::new("user_id", Integer).primary_key(),
                ColumnDef::new("first_name", Text),
                ColumnDef::new("last_name", Text),
                ColumnDef::new("gender", Text),
                ColumnDef::new("level", Text),
            ],
        )
        .with_comment("Users in the app"),
        TableSchema::new(
            "songs",
            vec![
                ColumnDef::new("song_id", Text).primary_key(),
                ColumnDef::new("title", Text),
                ColumnDef::new("artist_id", Text),
                ColumnDef::new("year", Integer),
                ColumnDef::new("duration", Float),
            ],
        )
        .with_comment("Songs in music database"),
        TableSchema::new(
            "artists",
            vec![
                ColumnDef::new("artist_id", Text).primary_key(),
                ColumnDef::new("name", Text),
                ColumnDef::new("location", Text),
                ColumnDef::new("latitude", Float),
                ColumnDef::new("longitude", Float),
            ],
        )
        .with_comment("Artists in music database"),
        TableSchema::new(
            "time",
            vec![
                ColumnDef::new("start_time", Timestamp).primary_key().not_null(),
                ColumnDef::new("hour", Integer),
                ColumnDef::new("day", Integer),
                ColumnDef::new("week", Integer),
                ColumnDef::new("month", Integer),
                ColumnDef::new("year", Integer),
                ColumnDef::new("weekday", Integer),
            ],
        )
        .with_comment("Timestamps of records in songplays broken down into specific units"),
    ]
}

/// Lookup of table declarations by name
#[derive(Debug, Clone)]
pub struct Catalog {
    tables: Vec<TableSchema>,
}

impl Catalog {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    /// Catalog of the songplay star schema
    pub fn star() -> Self {
        Self::new(star_schema())
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    /// Declaration for a table, or [`TemplateError::UnknownTable`]
    pub fn table(&self, name: &str) -> Result<&TableSchema, TemplateError> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| TemplateError::UnknownTable(name.to_string()))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::star()
    }
}

/// Drop then create every table of the catalog
///
/// All drops run before any create, so the step is repeatable.
pub fn bootstrap(store: &mut dyn Store, catalog: &Catalog) -> Result<(), StoreError> {
    let dialect = store.dialect();
    info!(tables = catalog.tables().len(), ?dialect, "Recreating tables");

    for table in catalog.tables() {
        debug!(table = %table.name, "Dropping table");
        store.execute_batch(&table.drop_sql(dialect))?;
    }
    for table in catalog.tables() {
        debug!(table = %table.name, "Creating table");
        store.execute_batch(&table.create_sql(dialect))?;
    }
    Ok(())
}

/// Statements that drop and recreate a PostgreSQL database with UTF-8 encoding
pub fn recreate_database_sql(name: &str) -> Result<[String; 2], TemplateError> {
    validate_identifier(name)?;
    let quoted = quote_identifier(name);
    Ok([
        format!("DROP DATABASE IF EXISTS {}", quoted),
        format!("CREATE DATABASE {} WITH ENCODING 'utf8' TEMPLATE template0", quoted),
    ])
}

/// Drop and recreate the database `name` through a maintenance connection
///
/// `store` must be connected to a different database on the same PostgreSQL
/// server. Each statement runs on its own, outside a transaction block.
pub fn recreate_database(store: &mut dyn Store, name: &str) -> Result<(), EtlError> {
    let dialect = store.dialect();
    if dialect != Dialect::Postgres {
        return Err(StoreError::Database(format!(
            "Recreating database '{}' needs a PostgreSQL store, not {:?}",
            name, dialect
        ))
        .into());
    }

    let statements = recreate_database_sql(name)?;
    store.commit()?;
    info!(database = name, "Recreating database");
    for sql in &statements {
        debug!(sql = %sql, "Running database statement");
        store.execute_batch(sql)?;
    }
    Ok(())
}
