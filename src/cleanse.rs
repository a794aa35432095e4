//! Cleansing engine
//!
//! Narrows a raw [`Frame`] down to the column and uniqueness contract of one
//! target table. Steps always run in the same order:
//!
//! 1. project to the kept columns
//! 2. drop rows matching each exclusion, one filter after another
//! 3. coerce columns to their declared types
//! 4. rename columns (absent names are ignored)
//! 5. deduplicate, first occurrence wins
//!
//! # Example
//!
//! ```rust
//! use songplay_etl::cleanse::{CleanseSpec, cleanse};
//! use songplay_etl::frame::{Frame, Value};
//! use songplay_etl::schema::ColumnType;
//!
//! let raw = Frame::from_rows(
//!     ["userId", "level"],
//!     vec![
//!         vec![Value::from("7"), Value::from("free")],
//!         vec![Value::from(""), Value::from("free")],
//!         vec![Value::from("7"), Value::from("paid")],
//!     ],
//! );
//!
//! let spec = CleanseSpec::keep(&["userId", "level"])
//!     .exclude("userId", "")
//!     .coerce("userId", ColumnType::Integer)
//!     .rename("userId", "user_id")
//!     .dedup_on(&["user_id"]);
//!
//! let users = cleanse(&raw, &spec).unwrap();
//! assert_eq!(users.len(), 1);
//! assert_eq!(users.value(0, "user_id"), Some(&Value::Int(7)));
//! ```

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::CleanseError;
use crate::frame::{Frame, Value};
use crate::schema::ColumnType;

/// Parameters for one cleansing pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanseSpec {
    /// Columns to keep, in output order (pre-rename names)
    pub keep_columns: Vec<String>,
    /// Rows where `column == value` are dropped, applied in order
    pub exclude: Vec<(String, Value)>,
    /// Target type per column (pre-rename names)
    pub coerce: Vec<(String, ColumnType)>,
    /// Old name to new name
    pub rename: Vec<(String, String)>,
    /// Columns (post-rename names) forming the dedup key; empty = whole row
    pub dedup_keys: Vec<String>,
}

impl CleanseSpec {
    /// Start a spec keeping the given columns
    pub fn keep(columns: &[&str]) -> Self {
        Self {
            keep_columns: columns.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Drop rows where `column` equals `value`
    pub fn exclude(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.exclude.push((column.to_string(), value.into()));
        self
    }

    /// Coerce `column` to `ty`
    pub fn coerce(mut self, column: &str, ty: ColumnType) -> Self {
        self.coerce.push((column.to_string(), ty));
        self
    }

    /// Rename `from` to `to`
    pub fn rename(mut self, from: &str, to: &str) -> Self {
        self.rename.push((from.to_string(), to.to_string()));
        self
    }

    /// Deduplicate on the given post-rename columns
    pub fn dedup_on(mut self, keys: &[&str]) -> Self {
        self.dedup_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Kept column names after renaming
    pub fn output_columns(&self) -> Vec<String> {
        let renames = self.rename_map();
        self.keep_columns
            .iter()
            .map(|c| renames.get(c.as_str()).map(|n| n.to_string()).unwrap_or_else(|| c.clone()))
            .collect()
    }

    fn rename_map(&self) -> HashMap<&str, &str> {
        self.rename
            .iter()
            .map(|(from, to)| (from.as_str(), to.as_str()))
            .collect()
    }
}

/// Run the five cleansing steps over a frame
pub fn cleanse(frame: &Frame, spec: &CleanseSpec) -> Result<Frame, CleanseError> {
    let input_rows = frame.len();

    let mut out = frame.project(&spec.keep_columns)?;

    for (column, value) in &spec.exclude {
        let idx = out.require_column(column)?;
        out.retain(|row| row.values()[idx] != *value);
    }

    for (column, ty) in &spec.coerce {
        let idx = out.require_column(column)?;
        out.try_map_column(idx, |row, value| {
            coerce_value(value, *ty).ok_or_else(|| CleanseError::TypeCoercion {
                column: column.clone(),
                row,
                value: value.clone(),
                target: *ty,
            })
        })?;
    }

    // Renames apply simultaneously, so swapping two names works
    let renames = spec.rename_map();
    let renamed: Vec<(usize, String)> = out
        .columns()
        .iter()
        .enumerate()
        .filter_map(|(idx, name)| renames.get(name.as_str()).map(|new| (idx, new.to_string())))
        .collect();
    for (idx, name) in renamed {
        out.rename_at(idx, name);
    }

    dedup(&mut out, &spec.dedup_keys)?;

    debug!(
        input_rows,
        output_rows = out.len(),
        columns = ?out.columns(),
        "Cleansed frame"
    );

    Ok(out)
}

/// Keep the first row per distinct key tuple (or per full row when `keys` is empty)
pub fn dedup<S: AsRef<str>>(frame: &mut Frame, keys: &[S]) -> Result<(), CleanseError> {
    let indices: Vec<usize> = if keys.is_empty() {
        (0..frame.columns().len()).collect()
    } else {
        keys.iter()
            .map(|k| frame.require_column(k.as_ref()))
            .collect::<Result<_, _>>()?
    };

    let mut seen: HashSet<Vec<Value>> = HashSet::with_capacity(frame.len());
    frame.rows_mut().retain(|row| {
        let key: Vec<Value> = indices.iter().map(|&i| row[i].clone()).collect();
        seen.insert(key)
    });
    Ok(())
}

/// Convert a value to a column type; `None` when it cannot be converted
///
/// Null converts to null for every type.
pub fn coerce_value(value: &Value, ty: ColumnType) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }

    match ty {
        ColumnType::Integer => match value {
            Value::Int(i) => Some(Value::Int(*i)),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Some(Value::Int(*f as i64))
            }
            Value::Bool(b) => Some(Value::Int(i64::from(*b))),
            Value::Text(s) => s.trim().parse::<i64>().ok().map(Value::Int),
            _ => None,
        },
        ColumnType::Float => match value {
            Value::Int(i) => Some(Value::Float(*i as f64)),
            Value::Float(f) => Some(Value::Float(*f)),
            Value::Bool(b) => Some(Value::Float(if *b { 1.0 } else { 0.0 })),
            Value::Text(s) => s.trim().parse::<f64>().ok().map(Value::Float),
            _ => None,
        },
        ColumnType::Text => Some(Value::Text(value.render())),
        ColumnType::Timestamp => match value {
            Value::Timestamp(ts) => Some(Value::Timestamp(*ts)),
            Value::Int(ms) => DateTime::<Utc>::from_timestamp_millis(*ms).map(Value::Timestamp),
            Value::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| Value::Timestamp(dt.with_timezone(&Utc))),
            _ => None,
        },
        ColumnType::Boolean => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::Int(0) => Some(Value::Bool(false)),
            Value::Int(1) => Some(Value::Bool(true)),
            Value::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
    }
}
