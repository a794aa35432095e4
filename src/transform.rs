//! Transforms applied to the listening log before cleansing

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::error::CleanseError;
use crate::frame::{Frame, Value};
use crate::schema::ColumnType;

/// Columns appended by [`with_time_columns`], in order
pub const TIME_COLUMNS: [&str; 7] = ["time", "hour", "day", "week", "month", "year", "weekday"];

/// Append the timestamp and its calendar breakdown derived from an epoch-ms column
///
/// `week` is the ISO week number and `weekday` counts from Monday = 0. A null
/// source cell yields null derived cells.
pub fn with_time_columns(frame: &Frame, source: &str) -> Result<Frame, CleanseError> {
    let idx = frame.require_column(source)?;

    let mut derived: Vec<Vec<Value>> = vec![Vec::with_capacity(frame.len()); TIME_COLUMNS.len()];
    for (row, values) in frame.rows().iter().enumerate() {
        let cells = match &values[idx] {
            Value::Null => vec![Value::Null; TIME_COLUMNS.len()],
            value => {
                let ts = epoch_millis(value).ok_or_else(|| CleanseError::TypeCoercion {
                    column: source.to_string(),
                    row,
                    value: value.clone(),
                    target: ColumnType::Timestamp,
                })?;
                time_parts(ts)
            }
        };
        for (column, cell) in derived.iter_mut().zip(cells) {
            column.push(cell);
        }
    }

    let mut out = frame.clone();
    for (name, values) in TIME_COLUMNS.iter().zip(derived) {
        out.add_column(*name, values);
    }
    Ok(out)
}

fn epoch_millis(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Int(ms) => DateTime::<Utc>::from_timestamp_millis(*ms),
        _ => None,
    }
}

fn time_parts(ts: DateTime<Utc>) -> Vec<Value> {
    vec![
        Value::Timestamp(ts),
        Value::Int(ts.hour().into()),
        Value::Int(ts.day().into()),
        Value::Int(ts.iso_week().week().into()),
        Value::Int(ts.month().into()),
        Value::Int(ts.year().into()),
        Value::Int(ts.weekday().num_days_from_monday().into()),
    ]
}

/// Keep only rows where `column` equals `value`
pub fn filter_eq(frame: &Frame, column: &str, value: &Value) -> Result<Frame, CleanseError> {
    let idx = frame.require_column(column)?;
    let mut out = frame.clone();
    out.retain(|row| row.values()[idx] == *value);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_frame() -> Frame {
        Frame::from_rows(
            ["ts", "page"],
            vec![
                // 2018-11-01 21:01:46.796 UTC, a Thursday
                vec![Value::Int(1_541_106_106_796), "NextSong".into()],
                vec![Value::Null, "Home".into()],
                // 2018-12-31 00:00:00 UTC, Monday of ISO week 1 of 2019
                vec![Value::Int(1_546_214_400_000), "NextSong".into()],
            ],
        )
    }

    #[test]
    fn test_time_columns() {
        let out = with_time_columns(&log_frame(), "ts").unwrap();
        assert_eq!(&out.columns()[2..], &TIME_COLUMNS.map(String::from));

        assert_eq!(out.value(0, "hour"), Some(&Value::Int(21)));
        assert_eq!(out.value(0, "day"), Some(&Value::Int(1)));
        assert_eq!(out.value(0, "week"), Some(&Value::Int(44)));
        assert_eq!(out.value(0, "month"), Some(&Value::Int(11)));
        assert_eq!(out.value(0, "year"), Some(&Value::Int(2018)));
        assert_eq!(out.value(0, "weekday"), Some(&Value::Int(3)));

        assert!(out.value(1, "time").unwrap().is_null());

        assert_eq!(out.value(2, "week"), Some(&Value::Int(1)));
        assert_eq!(out.value(2, "year"), Some(&Value::Int(2018)));
        assert_eq!(out.value(2, "weekday"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_time_columns_rejects_text() {
        let frame = Frame::from_rows(["ts"], vec![vec!["yesterday".into()]]);
        assert!(matches!(
            with_time_columns(&frame, "ts").unwrap_err(),
            CleanseError::TypeCoercion { row: 0, .. }
        ));
        assert!(matches!(
            with_time_columns(&frame, "when").unwrap_err(),
            CleanseError::MissingColumn(_)
        ));
    }

    #[test]
    fn test_filter_eq() {
        let out = filter_eq(&log_frame(), "page", &"NextSong".into()).unwrap();
        assert_eq!(out.len(), 2);
        assert!(filter_eq(&log_frame(), "nope", &Value::Null).is_err());
    }
}
