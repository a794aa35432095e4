//! Row injector
//!
//! Binds each row of a cleansed buffer to an insert statement and commits
//! after every row, so an interruption leaves all earlier rows durable.

use tracing::{debug, info_span};

use crate::error::EtlError;
use crate::frame::Frame;
use crate::progress::ProgressConfig;
use crate::store::Store;
use crate::templater::InsertStatement;

/// Execute `statement` once per row of `frame`, committing each row
///
/// Returns the number of rows attempted. The first store error aborts the
/// load; rows committed before it stay in place.
pub fn inject(
    store: &mut dyn Store,
    frame: &Frame,
    statement: &InsertStatement,
    progress: &ProgressConfig,
) -> Result<usize, EtlError> {
    statement.check_columns(frame)?;

    let span = info_span!("inject", table = %statement.table(), rows = frame.len());
    let _guard = span.enter();

    let mut reporter = progress.start(statement.table(), frame.len());
    for (index, row) in frame.rows().iter().enumerate() {
        let affected = store.execute(statement.sql(), row)?;
        store.commit()?;
        if affected == 0 {
            debug!(row = index, "Row kept existing record");
        }
        reporter.tick(index + 1);
    }
    reporter.finish(frame.len());

    Ok(frame.len())
}

#[cfg(all(test, feature = "duckdb-backend"))]
mod tests {
    use super::*;
    use crate::frame::Value;
    use crate::schema::{Catalog, bootstrap};
    use crate::store::{DuckDbStore, count_rows};
    use crate::templater::ConflictAction;

    fn store() -> DuckDbStore {
        let mut store = DuckDbStore::memory().unwrap();
        bootstrap(&mut store, &Catalog::star()).unwrap();
        store
    }

    fn songs(rows: Vec<Vec<Value>>) -> Frame {
        Frame::from_rows(["song_id", "title", "artist_id", "year", "duration"], rows)
    }

    #[test]
    fn test_inject_counts_rows() {
        let mut store = store();
        let frame = songs(vec![
            vec!["S1".into(), "One".into(), "A1".into(), Value::Int(2000), Value::Float(200.0)],
            vec!["S2".into(), "Two".into(), "A1".into(), Value::Int(0), Value::Float(150.5)],
        ]);
        let stmt = Catalog::star()
            .insert_for("songs", &frame, ConflictAction::Nothing)
            .unwrap();

        let attempted = inject(&mut store, &frame, &stmt, &ProgressConfig::default()).unwrap();
        assert_eq!(attempted, 2);
        assert_eq!(count_rows(&mut store, "songs").unwrap(), 2);
    }

    #[test]
    fn test_inject_rejects_mismatched_frame() {
        let mut store = store();
        let stmt = Catalog::star()
            .insert_for("songs", &Frame::new(["song_id", "title"]), ConflictAction::Nothing)
            .unwrap();
        let frame = Frame::new(["title", "song_id"]);
        assert!(matches!(
            inject(&mut store, &frame, &stmt, &ProgressConfig::default()).unwrap_err(),
            EtlError::Template(_)
        ));
    }

    #[test]
    fn test_rows_before_failure_are_durable() {
        let mut store = store();
        let frame = Frame::from_rows(
            ["start_time", "user_id"],
            vec![
                vec![Value::Timestamp(chrono::Utc::now()), Value::Int(1)],
                vec![Value::Null, Value::Int(2)],
            ],
        );
        let stmt = Catalog::star()
            .insert_for("songplays", &frame, ConflictAction::Nothing)
            .unwrap();

        // start_time is NOT NULL, so the second row fails
        assert!(inject(&mut store, &frame, &stmt, &ProgressConfig::default()).is_err());
        assert_eq!(count_rows(&mut store, "songplays").unwrap(), 1);
    }
}
