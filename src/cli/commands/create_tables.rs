//! `create-tables` command

use std::collections::BTreeMap;
use std::path::PathBuf;

use songplay_etl::{Catalog, EtlError, bootstrap, open_store, recreate_database};

use super::resolve_config;

/// Database the server always has, used while the target is dropped
pub const DEFAULT_MAINTENANCE_DB: &str = "postgres";

/// Arguments for the `create-tables` command
pub struct CreateTablesArgs {
    /// Config file
    pub config_file: Option<PathBuf>,
    /// DATABASE_NAME override
    pub database_name: Option<String>,
    /// DATABASE_* environment values
    pub env: BTreeMap<String, String>,
    /// Drop and recreate the target database before the tables
    pub recreate_database: bool,
    /// Database used for the maintenance connection
    pub maintenance_db: String,
}

/// Handle the `create-tables` command
pub fn handle_create_tables(args: &CreateTablesArgs) -> anyhow::Result<()> {
    let config = resolve_config(
        args.config_file.as_deref(),
        &args.env,
        args.database_name.as_deref(),
    )?;
    config.database.validate().map_err(EtlError::from)?;

    if args.recreate_database {
        if config.database.is_embedded() {
            anyhow::bail!(
                "--recreate-database needs a PostgreSQL driver (DATABASE_DRIVER is '{}')",
                config.database.driver
            );
        }
        if args.maintenance_db == config.database.name {
            anyhow::bail!(
                "--maintenance-db must differ from the database being recreated ('{}')",
                config.database.name
            );
        }

        let maintenance = config
            .database
            .clone()
            .with_overrides([("DATABASE_NAME", args.maintenance_db.as_str())])
            .map_err(EtlError::from)?;
        let mut admin = open_store(&maintenance).map_err(EtlError::from)?;
        recreate_database(admin.as_mut(), &config.database.name)?;
        println!("Recreated database {}", config.database.name);
    }

    let mut store = open_store(&config.database).map_err(EtlError::from)?;
    let catalog = Catalog::star();
    bootstrap(store.as_mut(), &catalog).map_err(EtlError::from)?;

    println!("Created {} tables in {}:", catalog.tables().len(), config.database.name);
    for table in catalog.tables() {
        println!("  - {} ({} columns)", table.name, table.columns.len());
    }
    Ok(())
}
