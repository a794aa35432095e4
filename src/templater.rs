//! Insert-statement templater
//!
//! Generates one parameterized insert per target table. Placeholders follow
//! the column order of the buffer the statement is built from, and the
//! statement keeps that column list so a differently shaped buffer cannot be
//! bound to it by accident.

use tracing::debug;

use crate::error::TemplateError;
use crate::frame::Frame;
use crate::schema::{Catalog, TableSchema, quote_identifier, validate_identifier};

/// What to do when an insert hits an existing key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictAction {
    /// Keep the stored row
    Nothing,
    /// Overwrite the named columns with the incoming values
    Update(Vec<String>),
}

impl ConflictAction {
    /// Merge the given columns on conflict
    pub fn update(columns: &[&str]) -> Self {
        ConflictAction::Update(columns.iter().map(|c| c.to_string()).collect())
    }
}

/// A generated insert and the column order it binds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    table: String,
    columns: Vec<String>,
    sql: String,
}

impl InsertStatement {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Check that a buffer has exactly the columns this statement binds, in order
    pub fn check_columns(&self, frame: &Frame) -> Result<(), TemplateError> {
        if frame.columns() != self.columns.as_slice() {
            return Err(TemplateError::ColumnMismatch {
                table: self.table.clone(),
                expected: self.columns.clone(),
                found: frame.columns().to_vec(),
            });
        }
        Ok(())
    }
}

/// Build an insert for `table` with an optional conflict clause
///
/// `conflict` pairs the key column with the action to take. Without it the
/// statement is a plain insert.
pub fn build_insert<S: AsRef<str>>(
    columns: &[S],
    table: &str,
    conflict: Option<(&str, &ConflictAction)>,
) -> Result<InsertStatement, TemplateError> {
    if columns.is_empty() {
        return Err(TemplateError::EmptyColumns(table.to_string()));
    }
    validate_identifier(table)?;
    let columns: Vec<String> = columns.iter().map(|c| c.as_ref().to_string()).collect();
    for column in &columns {
        validate_identifier(column)?;
    }

    let column_list = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(table),
        column_list,
        placeholders
    );

    if let Some((key, action)) = conflict {
        ensure_listed(&columns, key)?;
        sql.push_str(&format!(" ON CONFLICT ({})", quote_identifier(key)));
        match action {
            ConflictAction::Nothing => sql.push_str(" DO NOTHING"),
            ConflictAction::Update(merge) => {
                if merge.is_empty() {
                    return Err(TemplateError::EmptyColumns(table.to_string()));
                }
                let assignments = merge
                    .iter()
                    .map(|c| {
                        ensure_listed(&columns, c)?;
                        let quoted = quote_identifier(c);
                        Ok(format!("{} = EXCLUDED.{}", quoted, quoted))
                    })
                    .collect::<Result<Vec<_>, TemplateError>>()?;
                sql.push_str(&format!(" DO UPDATE SET {}", assignments.join(", ")));
            }
        }
    }

    debug!(table, sql = %sql, "Built insert statement");

    Ok(InsertStatement {
        table: table.to_string(),
        columns,
        sql,
    })
}

fn ensure_listed(columns: &[String], column: &str) -> Result<(), TemplateError> {
    if columns.iter().any(|c| c == column) {
        Ok(())
    } else {
        Err(TemplateError::ConflictColumn(column.to_string()))
    }
}

impl Catalog {
    /// Build the insert for a buffer bound for a declared table
    ///
    /// Every buffer column must be declared for the table. Tables with a
    /// natural key get a conflict clause on it; tables with a surrogate key
    /// get a plain insert.
    pub fn insert_for(
        &self,
        table: &str,
        frame: &Frame,
        action: ConflictAction,
    ) -> Result<InsertStatement, TemplateError> {
        let schema = self.table(table)?;
        check_declared(schema, frame.columns())?;

        let natural_key = schema
            .key_column()
            .filter(|k| k.role == crate::schema::KeyRole::PrimaryKey)
            .map(|k| k.name.as_str());

        match natural_key {
            Some(key) => build_insert(frame.columns(), table, Some((key, &action))),
            None => build_insert(frame.columns(), table, None),
        }
    }

    /// Key column of a declared table
    pub fn key_column(&self, table: &str) -> Result<&str, TemplateError> {
        let schema = self.table(table)?;
        schema
            .key_column()
            .map(|c| c.name.as_str())
            .ok_or_else(|| TemplateError::ConflictColumn(table.to_string()))
    }

    /// Columns the loader supplies for a declared table
    pub fn insertable_columns(&self, table: &str) -> Result<Vec<&str>, TemplateError> {
        Ok(self.table(table)?.insertable_columns())
    }
}

fn check_declared(schema: &TableSchema, columns: &[String]) -> Result<(), TemplateError> {
    for column in columns {
        if schema.column(column).is_none() {
            return Err(TemplateError::UnknownColumn {
                table: schema.name.clone(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Value;

    #[test]
    fn test_placeholders_follow_column_order() {
        let stmt = build_insert(&["b", "a", "c"], "t", None).unwrap();
        assert_eq!(
            stmt.sql(),
            "INSERT INTO \"t\" (\"b\", \"a\", \"c\") VALUES ($1, $2, $3)"
        );
        assert_eq!(stmt.columns(), &["b", "a", "c"]);
    }

    #[test]
    fn test_do_nothing_clause() {
        let stmt = build_insert(&["song_id", "title"], "songs", Some(("song_id", &ConflictAction::Nothing)))
            .unwrap();
        assert!(stmt.sql().ends_with("ON CONFLICT (\"song_id\") DO NOTHING"));
    }

    #[test]
    fn test_do_update_clause() {
        let action = ConflictAction::update(&["level"]);
        let stmt = build_insert(&["user_id", "level"], "users", Some(("user_id", &action))).unwrap();
        assert!(
            stmt.sql()
                .ends_with("ON CONFLICT (\"user_id\") DO UPDATE SET \"level\" = EXCLUDED.\"level\"")
        );
    }

    #[test]
    fn test_conflict_columns_must_be_inserted() {
        let err = build_insert(&["a"], "t", Some(("id", &ConflictAction::Nothing))).unwrap_err();
        assert_eq!(err, TemplateError::ConflictColumn("id".to_string()));

        let action = ConflictAction::update(&["b"]);
        let err = build_insert(&["id", "a"], "t", Some(("id", &action))).unwrap_err();
        assert_eq!(err, TemplateError::ConflictColumn("b".to_string()));
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        assert!(matches!(
            build_insert(&["a\"; DROP TABLE t; --"], "t", None).unwrap_err(),
            TemplateError::InvalidIdentifier(_)
        ));
        assert_eq!(
            build_insert::<&str>(&[], "t", None).unwrap_err(),
            TemplateError::EmptyColumns("t".to_string())
        );
    }

    #[test]
    fn test_check_columns_detects_reordering() {
        let stmt = build_insert(&["a", "b"], "t", None).unwrap();
        let same = Frame::new(["a", "b"]);
        let swapped = Frame::new(["b", "a"]);

        assert!(stmt.check_columns(&same).is_ok());
        assert!(matches!(
            stmt.check_columns(&swapped).unwrap_err(),
            TemplateError::ColumnMismatch { .. }
        ));
    }

    #[test]
    fn test_insert_for_declared_tables() {
        let catalog = Catalog::star();
        let frame = Frame::from_rows(
            ["user_id", "first_name", "last_name", "gender", "level"],
            vec![vec![Value::Int(1), "A".into(), "B".into(), "F".into(), "free".into()]],
        );
        let stmt = catalog
            .insert_for("users", &frame, ConflictAction::update(&["level"]))
            .unwrap();
        assert!(stmt.sql().contains("ON CONFLICT (\"user_id\")"));

        let plays = Frame::new(["start_time", "user_id"]);
        let stmt = catalog.insert_for("songplays", &plays, ConflictAction::Nothing).unwrap();
        assert!(!stmt.sql().contains("ON CONFLICT"));
    }

    #[test]
    fn test_insert_for_unknown_table_and_column() {
        let catalog = Catalog::star();
        assert_eq!(
            catalog
                .insert_for("plays", &Frame::new(["a"]), ConflictAction::Nothing)
                .unwrap_err(),
            TemplateError::UnknownTable("plays".to_string())
        );
        assert_eq!(
            catalog
                .insert_for("songs", &Frame::new(["song_id", "tempo"]), ConflictAction::Nothing)
                .unwrap_err(),
            TemplateError::UnknownColumn {
                table: "songs".to_string(),
                column: "tempo".to_string()
            }
        );
    }

    #[test]
    fn test_catalog_lookups() {
        let catalog = Catalog::star();
        assert_eq!(catalog.key_column("time").unwrap(), "start_time");
        assert_eq!(catalog.insertable_columns("artists").unwrap().len(), 5);
    }
}
