//! Songplay ETL - batch loader for a music-streaming star schema
//!
//! Provides:
//! - JSON-lines record loading (song catalog and listening log)
//! - A cleansing engine (project, exclude, coerce, rename, deduplicate)
//! - Typed star-schema declarations and table bootstrap
//! - Conflict-aware insert templating and per-row injection
//! - Songplay resolution against the song and artist dimensions
//! - DuckDB (default) and PostgreSQL stores
//!
//! # Example
//!
//! ```rust,no_run
//! use songplay_etl::{Catalog, EtlConfig, bootstrap, open_store, run};
//!
//! let config = EtlConfig::new().with_song_data("data/song_data");
//! let mut store = open_store(&config.database).unwrap();
//! let catalog = Catalog::star();
//! bootstrap(store.as_mut(), &catalog).unwrap();
//! let report = run(store.as_mut(), &catalog, &config).unwrap();
//! report.print_summary();
//! ```

pub mod cleanse;
pub mod config;
pub mod error;
pub mod frame;
pub mod inject;
pub mod loader;
pub mod pipeline;
pub mod progress;
pub mod schema;
pub mod songplay;
pub mod store;
pub mod templater;
pub mod transform;

// Re-export commonly used types
pub use cleanse::{CleanseSpec, cleanse};
pub use config::{DatabaseSettings, EtlConfig};
pub use error::{CleanseError, ConfigError, EtlError, EtlResult, LoadError, StoreError, TemplateError};
pub use frame::{Frame, RawRecord, Value};
pub use inject::inject;
pub use loader::{discover_files, load, load_frame};
pub use pipeline::{EtlReport, StageReport, process_log_files, process_song_files, run};
pub use progress::ProgressConfig;
pub use schema::{Catalog, ColumnDef, ColumnType, Dialect, KeyRole, TableSchema, bootstrap, recreate_database, star_schema};
pub use songplay::{SongplayStats, resolve_songplays};
pub use store::{Store, open_store};
pub use templater::{ConflictAction, InsertStatement, build_insert};
pub use transform::{filter_eq, with_time_columns};

#[cfg(feature = "duckdb-backend")]
pub use store::DuckDbStore;
#[cfg(feature = "postgres-backend")]
pub use store::PostgresStore;
