//! Songplay resolver
//!
//! Turns cleansed log rows into fact rows. Each row is looked up against the
//! song and artist dimensions by title, artist name and duration, then
//! inserted and committed on its own.
//!
//! The lookup compares `duration = length` with exact float equality. A log
//! length that differs from the catalogue duration in the last bit will not
//! resolve and the play is stored with null song and artist ids.

use serde::Serialize;
use tracing::{debug, info_span};

use crate::cleanse::coerce_value;
use crate::error::{CleanseError, EtlError};
use crate::frame::{Frame, Value};
use crate::progress::ProgressConfig;
use crate::schema::{Catalog, ColumnType, quote_identifier};
use crate::store::Store;
use crate::templater::{ConflictAction, InsertStatement};

/// Columns of the cleansed log buffer, in order
pub const LOG_COLUMNS: [&str; 9] = [
    "time",
    "userId",
    "level",
    "sessionId",
    "location",
    "userAgent",
    "song",
    "artist",
    "length",
];

/// Fact columns written for each play, in bind order
pub const SONGPLAY_COLUMNS: [&str; 8] = [
    "start_time",
    "user_id",
    "level",
    "song_id",
    "artist_id",
    "session_id",
    "location",
    "user_agent",
];

/// Counts from one resolver pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SongplayStats {
    /// Log rows examined
    pub rows: usize,
    /// Fact rows inserted
    pub inserted: usize,
    /// Inserted rows whose song and artist resolved
    pub matched: usize,
    /// Rows skipped for a missing user id
    pub skipped: usize,
}

/// Query resolving `(song_id, artist_id)` from title, artist name and duration
pub fn song_lookup_sql() -> String {
    format!(
        "SELECT s.{song_id}, s.{artist_id} FROM {songs} s \
         INNER JOIN {artists} a USING ({artist_id}) \
         WHERE s.{title} = $1 AND a.{name} = $2 AND s.{duration} = $3",
        song_id = quote_identifier("song_id"),
        artist_id = quote_identifier("artist_id"),
        songs = quote_identifier("songs"),
        artists = quote_identifier("artists"),
        title = quote_identifier("title"),
        name = quote_identifier("name"),
        duration = quote_identifier("duration"),
    )
}

/// Resolve and insert every play of a cleansed log buffer
pub fn resolve_songplays(
    store: &mut dyn Store,
    catalog: &Catalog,
    frame: &Frame,
    progress: &ProgressConfig,
) -> Result<SongplayStats, EtlError> {
    let time = frame.require_column("time")?;
    let user_id = frame.require_column("userId")?;
    let level = frame.require_column("level")?;
    let session_id = frame.require_column("sessionId")?;
    let location = frame.require_column("location")?;
    let user_agent = frame.require_column("userAgent")?;
    let song = frame.require_column("song")?;
    let artist = frame.require_column("artist")?;
    let length = frame.require_column("length")?;

    let insert = songplay_insert(catalog)?;
    let lookup = song_lookup_sql();

    let span = info_span!("songplays", rows = frame.len());
    let _guard = span.enter();

    let mut stats = SongplayStats::default();
    let mut reporter = progress.start("songplays", frame.len());

    for (index, row) in frame.rows().iter().enumerate() {
        stats.rows += 1;

        // Checked before the lookup: a skipped row never reaches the store
        if row[user_id].is_blank() {
            stats.skipped += 1;
            debug!(row = index, "Skipping play without user");
            reporter.tick(index + 1);
            continue;
        }

        let resolved = store.query_row(
            &lookup,
            &[row[song].clone(), row[artist].clone(), row[length].clone()],
        )?;
        let (song_id, artist_id) = match resolved {
            Some(mut ids) if ids.len() == 2 => {
                let artist_id = ids.pop().unwrap_or(Value::Null);
                let song_id = ids.pop().unwrap_or(Value::Null);
                stats.matched += 1;
                (song_id, artist_id)
            }
            _ => (Value::Null, Value::Null),
        };

        let user = coerce_value(&row[user_id], ColumnType::Integer).ok_or_else(|| {
            CleanseError::TypeCoercion {
                column: "userId".to_string(),
                row: index,
                value: row[user_id].clone(),
                target: ColumnType::Integer,
            }
        })?;

        let params = [
            row[time].clone(),
            user,
            row[level].clone(),
            song_id,
            artist_id,
            row[session_id].clone(),
            row[location].clone(),
            row[user_agent].clone(),
        ];
        store.execute(insert.sql(), &params)?;
        store.commit()?;
        stats.inserted += 1;

        reporter.tick(index + 1);
    }
    reporter.finish(stats.inserted);

    Ok(stats)
}

fn songplay_insert(catalog: &Catalog) -> Result<InsertStatement, EtlError> {
    let header = Frame::new(SONGPLAY_COLUMNS);
    Ok(catalog.insert_for("songplays", &header, ConflictAction::Nothing)?)
}
