//! In-memory tabular buffer of scalar values
//!
//! A [`Frame`] holds an ordered list of column names and rows of [`Value`]s in
//! insertion order. Frames are built from decoded JSON-lines records and then
//! narrowed by the cleansing engine before being bound to insert statements.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::CleanseError;

/// One decoded line of a JSON-lines file
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Scalar cell value
///
/// Floats compare and hash by bit pattern so that full-row deduplication is
/// exact: `200.0` and `200.00000000000003` are different values.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl Value {
    /// Convert a decoded JSON value into a scalar
    ///
    /// Numbers that fit in `i64` become [`Value::Int`]; nested arrays and
    /// objects are kept as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for null and for the empty string
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Text form used when coercing to a text column
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Millis, true),
            Value::Text(s) => s.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Timestamp(ts) => ts.hash(state),
            Value::Text(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Text(s) => write!(f, "'{}'", s),
            other => write!(f, "{}", other.render()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Ordered rows sharing one column set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Frame {
    /// Create an empty frame with the given header
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Create a frame from a header and rows
    ///
    /// Short rows are padded with nulls and long rows truncated so that every
    /// row has exactly one cell per column.
    pub fn from_rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        let mut frame = Self::new(columns);
        for row in rows {
            frame.push_row(row);
        }
        frame
    }

    /// Build a frame from decoded records
    ///
    /// The header is the union of record keys in first-seen order; a record
    /// without a key gets a null cell for that column.
    pub fn from_records(records: &[RawRecord]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for record in records {
            for key in record.keys() {
                if seen.insert(key.as_str()) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|column| record.get(column).map(Value::from_json).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column in the header
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Position of a column, or [`CleanseError::MissingColumn`]
    pub fn require_column(&self, name: &str) -> Result<usize, CleanseError> {
        self.column_index(name)
            .ok_or_else(|| CleanseError::MissingColumn(name.to_string()))
    }

    /// Value at a row for a named column
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Append a row, padding or truncating it to the header width
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Iterate rows with by-name access
    pub fn iter(&self) -> impl Iterator<Item = RowView<'_>> {
        self.rows.iter().map(move |values| RowView {
            columns: &self.columns,
            values,
        })
    }

    /// Keep only the named columns, in the order given
    pub fn project<S: AsRef<str>>(&self, columns: &[S]) -> Result<Frame, CleanseError> {
        let indices = columns
            .iter()
            .map(|c| self.require_column(c.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Frame {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    /// Keep rows for which the predicate holds
    pub fn retain(&mut self, mut keep: impl FnMut(RowView<'_>) -> bool) {
        let columns = &self.columns;
        self.rows.retain(|values| keep(RowView { columns, values }));
    }

    /// Rename the column at a position
    pub(crate) fn rename_at(&mut self, idx: usize, name: impl Into<String>) {
        self.columns[idx] = name.into();
    }

    /// Append a column computed for every row
    pub fn add_column(&mut self, name: impl Into<String>, values: Vec<Value>) {
        let name = name.into();
        let mut values = values.into_iter();
        for row in &mut self.rows {
            row.push(values.next().unwrap_or(Value::Null));
        }
        self.columns.push(name);
    }

    /// Replace every cell of one column through a fallible mapping
    pub(crate) fn try_map_column<E>(
        &mut self,
        idx: usize,
        mut f: impl FnMut(usize, &Value) -> Result<Value, E>,
    ) -> Result<(), E> {
        for (row_idx, row) in self.rows.iter_mut().enumerate() {
            row[idx] = f(row_idx, &row[idx])?;
        }
        Ok(())
    }

    pub(crate) fn rows_mut(&mut self) -> &mut Vec<Vec<Value>> {
        &mut self.rows
    }
}

/// Borrowed view over one row
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> RowView<'a> {
    /// Value for a named column, or null when the column is absent
    pub fn get(&self, column: &str) -> &'a Value {
        static NULL: Value = Value::Null;
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
            .unwrap_or(&NULL)
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> RawRecord {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(Value::from_json(&json!(42)), Value::Int(42));
        assert_eq!(Value::from_json(&json!(218.93)), Value::Float(218.93));
        assert_eq!(Value::from_json(&json!(null)), Value::Null);
        assert_eq!(Value::from_json(&json!("7")), Value::Text("7".to_string()));
        assert_eq!(
            Value::from_json(&json!([1, 2])),
            Value::Text("[1,2]".to_string())
        );
    }

    #[test]
    fn test_from_records_unions_columns() {
        let records = vec![
            record(json!({"a": 1, "b": "x"})),
            record(json!({"a": 2, "c": true})),
        ];
        let frame = Frame::from_records(&records);

        assert_eq!(frame.len(), 2);
        assert_eq!(frame.columns().len(), 3);
        assert_eq!(frame.value(0, "c"), Some(&Value::Null));
        assert_eq!(frame.value(1, "b"), Some(&Value::Null));
        assert_eq!(frame.value(1, "c"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_project_orders_columns() {
        let frame = Frame::from_rows(
            ["a", "b", "c"],
            vec![vec![Value::Int(1), Value::Int(2), Value::Int(3)]],
        );
        let projected = frame.project(&["c", "a"]).unwrap();
        assert_eq!(projected.columns(), &["c".to_string(), "a".to_string()]);
        assert_eq!(projected.rows()[0], vec![Value::Int(3), Value::Int(1)]);

        let err = frame.project(&["missing"]).unwrap_err();
        assert_eq!(err, CleanseError::MissingColumn("missing".to_string()));
    }

    #[test]
    fn test_push_row_pads_to_width() {
        let mut frame = Frame::new(["a", "b"]);
        frame.push_row(vec![Value::Int(1)]);
        assert_eq!(frame.rows()[0], vec![Value::Int(1), Value::Null]);
    }

    #[test]
    fn test_float_equality_is_exact() {
        assert_eq!(Value::Float(200.0), Value::Float(200.0));
        assert_ne!(Value::Float(200.0), Value::Float(200.000_000_000_1));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn test_row_view_missing_column_is_null() {
        let frame = Frame::from_rows(["a"], vec![vec![Value::Int(1)]]);
        let row = frame.iter().next().unwrap();
        assert_eq!(row.get("a"), &Value::Int(1));
        assert!(row.get("zzz").is_null());
    }
}
