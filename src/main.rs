use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use wow_addon_backup::backup::archive;
use wow_addon_backup::backup::mirror::platform_mirror;
use wow_addon_backup::backup::orchestrator::Orchestrator;
use wow_addon_backup::backup::result_error::error::Error;
use wow_addon_backup::backup::result_error::result::Result;
use wow_addon_backup::backup::schedule::Scheduler;
use wow_addon_backup::backup::settings::{JsonSettingsStore, Settings};

/// Back up and restore World of Warcraft addons and settings
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of the JSON settings file
    #[arg(short, long, global = true, default_value = "config.json")]
    config: PathBuf,
    /// Log at debug level, regardless of the settings file
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a backup now
    Backup,
    /// Replace the live addon and settings folders with the content of an archive
    Restore { archive: PathBuf },
    /// Print the entries of an archive
    List { archive: PathBuf },
    /// Check the integrity of an archive
    Validate { archive: PathBuf },
    /// Apply the retention policy to the destination directory
    Prune,
    /// Run the scheduler in the foreground
    Run,
    /// Write a settings file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let args = Args::parse();
    let store = JsonSettingsStore::new(&args.config);
    let verbose = args.verbose || store.load().map(|s| s.verbose).unwrap_or(false);
    tracing_subscriber::fmt()
        .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
        .init();

    if let Err(e) = run(args.command, store) {
        error!("{e}");
        exit(1);
    }
}

fn run(command: Command, store: JsonSettingsStore) -> Result<()> {
    let orchestrator = Orchestrator::new(Arc::new(store.clone()), platform_mirror());
    let progress = |percent: u8, message: &str| info!("[{percent:>3}%] {message}");

    match command {
        Command::Backup => {
            let outcome = orchestrator.backup(&progress)?.into_result()?;
            info!(
                "Backup written to {:?} ({} bytes, {} files skipped)",
                outcome.archive, outcome.size, outcome.failed_files
            );
        }
        Command::Restore { archive } => {
            let outcome = orchestrator.restore(&archive, &progress)?;
            if outcome.failed_files > 0 {
                warn!("{} archive entries could not be restored", outcome.failed_files);
            }
        }
        Command::List { archive } => {
            for entry in archive::list_contents(&archive)? {
                println!(
                    "{:>12} {:>12} {} {}",
                    entry.size(),
                    entry.compressed_size(),
                    entry
                        .modified()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "-".into()),
                    entry.path()
                );
            }
        }
        Command::Validate { archive } => {
            if !archive::validate(&archive) {
                return Err(Error::extraction(archive, "archive failed the integrity check"));
            }
        }
        Command::Prune => {
            let report = orchestrator.prune()?;
            info!(
                "Retention kept {}, deleted {}, failed {}",
                report.kept, report.deleted, report.failed
            );
        }
        Command::Run => {
            if !store.load()?.enable_scheduler {
                warn!("Scheduler is disabled in {:?}, waiting for it to be enabled", store.path());
            }
            Scheduler::new(Arc::new(store), Arc::new(orchestrator))
                .spawn()?
                .join();
        }
        Command::Init { force } => {
            if store.path().exists() && !force {
                return Err(Error::validation(store.path(), "settings file already exists, use --force"));
            }
            store.save(&Settings::default())?;
        }
    }
    Ok(())
}
