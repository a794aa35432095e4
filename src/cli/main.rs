//! songplay-etl command line

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use songplay_etl::EtlError;
use songplay_etl::config::database_env;

use commands::create_tables::{CreateTablesArgs, DEFAULT_MAINTENANCE_DB, handle_create_tables};
use commands::run::{RunArgs, handle_run};

#[derive(Parser)]
#[command(name = "songplay-etl", version, about = "Load song and log JSON into a songplay star schema")]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override DATABASE_NAME
    #[arg(long, global = true)]
    database_name: Option<String>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drop and recreate the star-schema tables
    CreateTables {
        /// Drop and recreate the PostgreSQL database first
        #[arg(long)]
        recreate_database: bool,
        /// Database to connect to while recreating the target database
        #[arg(long, default_value = DEFAULT_MAINTENANCE_DB)]
        maintenance_db: String,
    },
    /// Load song files, then log files
    Run {
        /// Root of the song catalog files
        #[arg(long)]
        song_data: Option<PathBuf>,
        /// Root of the listening log files
        #[arg(long)]
        log_data: Option<PathBuf>,
        /// File name pattern
        #[arg(long)]
        pattern: Option<String>,
        /// Rows between progress markers
        #[arg(long)]
        progress_every: Option<usize>,
        /// Draw progress bars
        #[arg(long)]
        progress: bool,
        /// Recreate the tables before loading
        #[arg(long)]
        create_tables: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Environment settings are read once and passed down
    let env = database_env();

    let result = match cli.command {
        Command::CreateTables {
            recreate_database,
            maintenance_db,
        } => handle_create_tables(&CreateTablesArgs {
            config_file: cli.config,
            database_name: cli.database_name,
            env,
            recreate_database,
            maintenance_db,
        }),
        Command::Run {
            song_data,
            log_data,
            pattern,
            progress_every,
            progress,
            create_tables,
        } => handle_run(&RunArgs {
            config_file: cli.config,
            database_name: cli.database_name,
            env,
            song_data,
            log_data,
            pattern,
            progress_every,
            progress,
            create_tables,
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<EtlError>() {
                Some(etl) => eprintln!("Error: {}", etl.user_message()),
                None => eprintln!("Error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}
