//! CLI command implementations

pub mod create_tables;
pub mod run;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use songplay_etl::{EtlConfig, EtlError};

/// Resolve the run configuration
///
/// Order: config file (or defaults), then `DATABASE_*` environment values,
/// then the `--database-name` override.
pub fn resolve_config(
    config_file: Option<&Path>,
    env: &BTreeMap<String, String>,
    database_name: Option<&str>,
) -> anyhow::Result<EtlConfig> {
    let mut config = match config_file {
        Some(path) => EtlConfig::from_toml_file(path)
            .map_err(EtlError::from)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EtlConfig::default(),
    };

    let mut database = config.database.clone().with_overrides(env).map_err(EtlError::from)?;
    if let Some(name) = database_name {
        database = database
            .with_overrides([("DATABASE_NAME", name)])
            .map_err(EtlError::from)?;
    }
    config.database = database;

    Ok(config)
}
