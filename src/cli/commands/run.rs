//! `run` command

use std::collections::BTreeMap;
use std::path::PathBuf;

use songplay_etl::{Catalog, EtlError, bootstrap, open_store, run};

use super::resolve_config;

/// Arguments for the `run` command
pub struct RunArgs {
    /// Config file
    pub config_file: Option<PathBuf>,
    /// DATABASE_NAME override
    pub database_name: Option<String>,
    /// DATABASE_* environment values
    pub env: BTreeMap<String, String>,
    /// Song catalog root
    pub song_data: Option<PathBuf>,
    /// Listening log root
    pub log_data: Option<PathBuf>,
    /// File name pattern
    pub pattern: Option<String>,
    /// Rows between progress markers
    pub progress_every: Option<usize>,
    /// Draw progress bars
    pub progress: bool,
    /// Recreate tables first
    pub create_tables: bool,
}

/// Handle the `run` command
pub fn handle_run(args: &RunArgs) -> anyhow::Result<()> {
    let mut config = resolve_config(
        args.config_file.as_deref(),
        &args.env,
        args.database_name.as_deref(),
    )?;

    if let Some(ref path) = args.song_data {
        config = config.with_song_data(path);
    }
    if let Some(ref path) = args.log_data {
        config = config.with_log_data(path);
    }
    if let Some(ref pattern) = args.pattern {
        config = config.with_pattern(pattern);
    }
    if let Some(every) = args.progress_every {
        config = config.with_progress_every(every);
    }
    if args.progress {
        config = config.with_show_progress(true);
    }

    let mut store = open_store(&config.database).map_err(EtlError::from)?;
    let catalog = Catalog::star();

    if args.create_tables {
        bootstrap(store.as_mut(), &catalog).map_err(EtlError::from)?;
    }

    let report = run(store.as_mut(), &catalog, &config)?;
    report.print_summary();
    Ok(())
}
