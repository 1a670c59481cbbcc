//! Operator entry point.
//!
//! # Responsibility
//! - Probe core linkage (`ping`).
//! - Create or upgrade a store file (`migrate`).
//! - Remove expired registrations once or on an interval (`sweep`).

use accord_core::clock::SystemClock;
use accord_core::db::migrations::latest_version;
use accord_core::service::{DatabaseFile, ExpiredRegistrationSweeper};
use accord_core::{init_logging, open_db, AccordConfig};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::error::Error;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// accord - account store maintenance
#[derive(Parser, Debug)]
#[command(name = "accord")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print core health and version
    Ping,
    /// Apply pending schema migrations to a store file
    Migrate {
        /// Store file; defaults to ACCORD_DATABASE_PATH
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Delete users whose registration expired unconfirmed
    Sweep {
        /// Store file; defaults to ACCORD_DATABASE_PATH
        #[arg(long)]
        db: Option<PathBuf>,
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
        /// Seconds between passes; defaults to ACCORD_SWEEP_INTERVAL_SECS
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli.command) {
        error!("event=cli_exit module=cli status=error error={err}");
        eprintln!("error: {err}");
        if let Some(source) = err.source() {
            eprintln!("caused by: {source}");
        }
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<(), Box<dyn Error>> {
    let config = AccordConfig::from_env()?;
    if let Some(log_dir) = &config.log_dir {
        init_logging(&config.log_level, log_dir)?;
    }

    match command {
        Command::Ping => {
            println!("accord_core ping={}", accord_core::ping());
            println!("accord_core version={}", accord_core::core_version());
        }
        Command::Migrate { db } => {
            let path = db.unwrap_or_else(|| config.database_path.clone());
            let conn = open_db(&path)?;
            let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
            info!("event=cli_migrate module=cli status=ok schema_version={version}");
            println!(
                "migrated {} to schema version {version} (latest {})",
                path.display(),
                latest_version()
            );
        }
        Command::Sweep {
            db,
            once,
            interval_secs,
        } => {
            let path = db.unwrap_or_else(|| config.database_path.clone());
            let mut settings = config.sweeper_settings();
            if let Some(secs) = interval_secs.filter(|secs| *secs > 0) {
                settings.interval = Duration::from_secs(secs);
            }
            let sweeper =
                ExpiredRegistrationSweeper::new(DatabaseFile(path), Arc::new(SystemClock), settings)?;
            info!(
                "event=cli_sweep module=cli status=start once={once} interval_secs={}",
                settings.interval.as_secs()
            );
            if once {
                let removed = sweeper.tick()?;
                info!("event=cli_sweep module=cli status=ok removed={removed}");
                println!("removed {removed} expired registrations");
            } else {
                // The sender is held for the life of the process, so the loop
                // only ends when the process is terminated.
                let (_keep_alive, shutdown) = mpsc::channel::<()>();
                sweeper.run(&shutdown);
            }
        }
    }
    Ok(())
}
