//! Pipeline driver
//!
//! Loads the song catalog into the `songs` and `artists` dimensions, then the
//! listening log into `time`, `users` and the `songplays` fact table. Song
//! files always go first so that plays can resolve against the catalog.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::cleanse::{CleanseSpec, cleanse};
use crate::config::EtlConfig;
use crate::error::EtlResult;
use crate::frame::{Frame, Value};
use crate::inject::inject;
use crate::loader::load_frame;
use crate::progress::ProgressConfig;
use crate::schema::{Catalog, ColumnType};
use crate::songplay::{LOG_COLUMNS, SongplayStats, resolve_songplays};
use crate::store::Store;
use crate::templater::ConflictAction;
use crate::transform::{filter_eq, with_time_columns};

/// Page value marking a song play in the listening log
pub const NEXT_SONG: &str = "NextSong";

/// Cleansing rules for the `songs` dimension
pub fn songs_spec() -> CleanseSpec {
    CleanseSpec::keep(&["song_id", "title", "artist_id", "year", "duration"])
        .coerce("year", ColumnType::Integer)
        .coerce("duration", ColumnType::Float)
}

/// Cleansing rules for the `artists` dimension
pub fn artists_spec() -> CleanseSpec {
    CleanseSpec::keep(&[
        "artist_id",
        "artist_name",
        "artist_location",
        "artist_latitude",
        "artist_longitude",
    ])
    .coerce("artist_latitude", ColumnType::Float)
    .coerce("artist_longitude", ColumnType::Float)
    .rename("artist_name", "name")
    .rename("artist_location", "location")
    .rename("artist_latitude", "latitude")
    .rename("artist_longitude", "longitude")
}

/// Cleansing rules for the `time` dimension (applied to song-play rows)
pub fn time_spec() -> CleanseSpec {
    CleanseSpec::keep(&["time", "hour", "day", "week", "month", "year", "weekday"])
        .rename("time", "start_time")
}

/// Cleansing rules for the `users` dimension
pub fn users_spec() -> CleanseSpec {
    CleanseSpec::keep(&["userId", "firstName", "lastName", "gender", "level"])
        .exclude("userId", "")
        .exclude("userId", Value::Null)
        .coerce("userId", ColumnType::Integer)
        .rename("userId", "user_id")
        .rename("firstName", "first_name")
        .rename("lastName", "last_name")
        .dedup_on(&["user_id"])
}

/// Cleansing rules for the log buffer fed to the songplay resolver
pub fn songplays_spec() -> CleanseSpec {
    CleanseSpec::keep(&LOG_COLUMNS)
}

/// Rows handled by one stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageReport {
    /// Records decoded from the input files
    pub records: usize,
    /// Rows attempted per dimension table
    pub tables: BTreeMap<String, usize>,
    /// Resolver counts, for the log stage
    pub songplays: Option<SongplayStats>,
}

/// Load the song catalog into `songs` and `artists`
pub fn process_song_files(
    store: &mut dyn Store,
    catalog: &Catalog,
    root: &Path,
    pattern: &str,
    progress: &ProgressConfig,
) -> EtlResult<StageReport> {
    let _span = info_span!("song_files", root = %root.display()).entered();

    let raw = load_frame(root, pattern)?;
    let mut report = StageReport {
        records: raw.len(),
        ..Default::default()
    };
    if raw.is_empty() {
        warn!(root = %root.display(), "No song records found");
        return Ok(report);
    }

    let songs = cleanse(&raw, &songs_spec())?;
    load_dimension(store, catalog, "songs", &songs, ConflictAction::Nothing, progress, &mut report)?;

    let artists = cleanse(&raw, &artists_spec())?;
    load_dimension(store, catalog, "artists", &artists, ConflictAction::Nothing, progress, &mut report)?;

    Ok(report)
}

/// Load the listening log into `time`, `users` and `songplays`
pub fn process_log_files(
    store: &mut dyn Store,
    catalog: &Catalog,
    root: &Path,
    pattern: &str,
    progress: &ProgressConfig,
) -> EtlResult<StageReport> {
    let _span = info_span!("log_files", root = %root.display()).entered();

    let raw = load_frame(root, pattern)?;
    let mut report = StageReport {
        records: raw.len(),
        ..Default::default()
    };
    if raw.is_empty() {
        warn!(root = %root.display(), "No log records found");
        return Ok(report);
    }

    let log = with_time_columns(&raw, "ts")?;

    let plays = filter_eq(&log, "page", &Value::from(NEXT_SONG))?;
    let time = cleanse(&plays, &time_spec())?;
    load_dimension(store, catalog, "time", &time, ConflictAction::Nothing, progress, &mut report)?;

    let users = cleanse(&log, &users_spec())?;
    load_dimension(store, catalog, "users", &users, ConflictAction::update(&["level"]), progress, &mut report)?;

    let songplays = cleanse(&log, &songplays_spec())?;
    let stats = resolve_songplays(store, catalog, &songplays, progress)?;
    info!(
        inserted = stats.inserted,
        matched = stats.matched,
        skipped = stats.skipped,
        "Loaded songplays"
    );
    report.songplays = Some(stats);

    Ok(report)
}

fn load_dimension(
    store: &mut dyn Store,
    catalog: &Catalog,
    table: &str,
    frame: &Frame,
    action: ConflictAction,
    progress: &ProgressConfig,
    report: &mut StageReport,
) -> EtlResult<()> {
    let statement = catalog.insert_for(table, frame, action)?;
    let attempted = inject(store, frame, &statement, progress)?;
    report.tables.insert(table.to_string(), attempted);
    Ok(())
}

/// Report from a full run
#[derive(Debug, Clone, Serialize)]
pub struct EtlReport {
    /// Run ID
    pub run_id: String,
    pub songs: StageReport,
    pub logs: StageReport,
    /// Total duration in milliseconds
    pub duration_ms: u64,
}

impl EtlReport {
    /// Rows attempted for a table across both stages
    pub fn rows_for(&self, table: &str) -> usize {
        if table == "songplays" {
            return self.logs.songplays.as_ref().map(|s| s.inserted).unwrap_or(0);
        }
        self.songs.tables.get(table).or_else(|| self.logs.tables.get(table)).copied().unwrap_or(0)
    }

    /// Get formatted duration
    pub fn duration_formatted(&self) -> String {
        let secs = self.duration_ms / 1000;
        let mins = secs / 60;
        let remaining_secs = secs % 60;

        if mins > 0 {
            format!("{}m {}s", mins, remaining_secs)
        } else {
            format!("{}s", secs)
        }
    }

    /// Print summary to stderr
    pub fn print_summary(&self) {
        eprintln!();
        eprintln!("Run {}", self.run_id);
        eprintln!("Duration: {}", self.duration_formatted());
        eprintln!(
            "Records: {} song, {} log",
            self.songs.records, self.logs.records
        );
        for table in ["songs", "artists", "time", "users"] {
            eprintln!("  - {}: {} rows", table, self.rows_for(table));
        }
        if let Some(stats) = &self.logs.songplays {
            eprintln!(
                "  - songplays: {} rows ({} resolved, {} skipped)",
                stats.inserted, stats.matched, stats.skipped
            );
        }
    }
}

/// Process the song files, then the log files
pub fn run(store: &mut dyn Store, catalog: &Catalog, config: &EtlConfig) -> EtlResult<EtlReport> {
    config.validate()?;

    let run_id = Uuid::new_v4().to_string();
    let _span = info_span!("etl_run", run_id = %run_id).entered();
    let start = Instant::now();
    let progress = config.progress();

    info!(
        song_data = %config.song_data.display(),
        log_data = %config.log_data.display(),
        "Starting ETL run"
    );

    let songs = process_song_files(store, catalog, &config.song_data, &config.pattern, &progress)?;
    let logs = process_log_files(store, catalog, &config.log_data, &config.pattern, &progress)?;

    let report = EtlReport {
        run_id,
        songs,
        logs,
        duration_ms: start.elapsed().as_millis() as u64,
    };
    info!(duration_ms = report.duration_ms, "ETL run completed");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_frame() -> Frame {
        Frame::from_rows(
            [
                "ts", "userId", "firstName", "lastName", "gender", "level", "page", "sessionId",
                "location", "userAgent", "song", "artist", "length",
            ],
            vec![
                vec![
                    Value::Int(1_541_106_106_796),
                    "8".into(),
                    "Kaylee".into(),
                    "Summers".into(),
                    "F".into(),
                    "free".into(),
                    NEXT_SONG.into(),
                    Value::Int(139),
                    "Phoenix".into(),
                    "Mozilla".into(),
                    "Song".into(),
                    "Artist".into(),
                    Value::Float(200.0),
                ],
                vec![
                    Value::Int(1_541_106_132_796),
                    "".into(),
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    "free".into(),
                    "Home".into(),
                    Value::Int(140),
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    Value::Null,
                ],
            ],
        )
    }

    #[test]
    fn test_time_spec_on_plays() {
        let log = with_time_columns(&log_frame(), "ts").unwrap();
        let plays = filter_eq(&log, "page", &Value::from(NEXT_SONG)).unwrap();
        let time = cleanse(&plays, &time_spec()).unwrap();
        assert_eq!(time.len(), 1);
        assert_eq!(time.columns()[0], "start_time");
    }

    #[test]
    fn test_users_spec() {
        let users = cleanse(&log_frame(), &users_spec()).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(
            users.columns(),
            &["user_id", "first_name", "last_name", "gender", "level"]
        );
        assert_eq!(users.value(0, "user_id"), Some(&Value::Int(8)));
    }

    #[test]
    fn test_songplays_spec_keeps_all_pages() {
        let log = with_time_columns(&log_frame(), "ts").unwrap();
        let plays = cleanse(&log, &songplays_spec()).unwrap();
        assert_eq!(plays.len(), 2);
        assert_eq!(plays.columns(), &LOG_COLUMNS);
    }

    #[test]
    fn test_catalog_accepts_cleansed_frames() {
        let catalog = Catalog::star();
        let users = cleanse(&log_frame(), &users_spec()).unwrap();
        assert!(catalog.insert_for("users", &users, ConflictAction::update(&["level"])).is_ok());

        let songs = Frame::new(songs_spec().output_columns());
        assert!(catalog.insert_for("songs", &songs, ConflictAction::Nothing).is_ok());
        let artists = Frame::new(artists_spec().output_columns());
        assert!(catalog.insert_for("artists", &artists, ConflictAction::Nothing).is_ok());
    }

    #[test]
    fn test_report_duration() {
        let report = EtlReport {
            run_id: "r".to_string(),
            songs: StageReport::default(),
            logs: StageReport::default(),
            duration_ms: 125_000,
        };
        assert_eq!(report.duration_formatted(), "2m 5s");
        assert_eq!(report.rows_for("songplays"), 0);
    }
}
