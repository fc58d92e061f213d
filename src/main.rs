use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use inventory_maintenance::config::MaintenanceConfig;
use inventory_maintenance::database::maintenance::MaintenanceOperation;
use inventory_maintenance::database::{BUNDLE_PREFIX, DatabaseError, Result};
use inventory_maintenance::db::{DatabaseLifecycle, SqliteLifecycle};
use inventory_maintenance::service::{
    Interaction, MaintenanceService, Severity, Submission, human_bytes,
};

#[derive(Parser, Debug)]
#[command(name = "inventory-maintenance", version, about = "Backup, restore and maintenance for the inventory store")]
struct Cli {
    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Answer yes to confirmations (the reset phrase is still required)
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new backup bundle
    Backup,
    /// Restore a backup bundle over the live data
    Restore {
        /// Bundle directory or bundle id (asks when omitted)
        bundle: Option<String>,
    },
    /// Delete all but the most recent backups
    Prune {
        /// Number of bundles to keep (default: BACKUP_RETENTION_COUNT)
        #[arg(long)]
        keep: Option<usize>,
    },
    /// List backup bundles, newest first
    List,
    /// Delete one backup bundle
    Delete {
        /// Bundle id
        id: String,
    },
    /// Show database health and backup status
    Status,
    /// Run one maintenance operation, or all of them in order
    Maintain {
        /// compact-and-reclaim, refresh-query-statistics, optimize-indexes,
        /// rebuild-indexes, checkpoint-pending-writes or verify-data-integrity
        operation: Option<String>,
    },
    /// Wipe all data except the administrator account and the master key
    Reset,
}

/// Terminal implementation of the presentation capabilities
struct TerminalInteraction {
    assume_yes: bool,
    backups_dir: PathBuf,
}

impl TerminalInteraction {
    fn prompt(&self, title: &str, message: &str) -> Option<String> {
        eprintln!("== {} ==", title);
        eprint!("{} ", message);
        io::stderr().flush().ok()?;

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

impl Interaction for TerminalInteraction {
    fn confirm_action(&self, title: &str, message: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        self.prompt(title, &format!("{} [y/N]", message))
            .map(|answer| matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
            .unwrap_or(false)
    }

    fn confirm_phrase(&self, title: &str, message: &str) -> Option<String> {
        self.prompt(title, &format!("{}:", message))
    }

    fn notify(&self, title: &str, message: &str, severity: Severity) {
        eprintln!("[{}] {}: {}", severity, title, message);
    }

    fn pick_directory(&self) -> Option<PathBuf> {
        let answer = self.prompt("Restore backup", "Bundle id or directory to restore:")?;
        let answer = answer.trim();
        if answer.is_empty() {
            return None;
        }
        Some(resolve_bundle(&self.backups_dir, answer))
    }
}

/// Accept either a path to a bundle directory or a bundle id
fn resolve_bundle(backups_dir: &Path, bundle: &str) -> PathBuf {
    let path = PathBuf::from(bundle);
    if path.is_dir() {
        return path;
    }
    let name = if bundle.starts_with(BUNDLE_PREFIX) {
        bundle.to_string()
    } else {
        format!("{}{}", BUNDLE_PREFIX, bundle)
    };
    backups_dir.join(name)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("inventory_maintenance=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| DatabaseError::Config(format!("cannot render JSON: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}

async fn list_bundles(service: &MaintenanceService, json: bool) -> Result<()> {
    let bundles = service.catalog().list().await?;
    if json {
        return print_json(&bundles);
    }
    if bundles.is_empty() {
        println!("No backups in {}", service.catalog().backups_dir().display());
        return Ok(());
    }
    for bundle in bundles {
        let artifacts: Vec<&str> = bundle.artifacts.iter().map(|a| a.name()).collect();
        println!(
            "{}  {:>5} files  {:>10}  {}",
            bundle.id,
            bundle.file_count,
            human_bytes(bundle.total_size_bytes),
            artifacts.join(",")
        );
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = MaintenanceConfig::from_env()?;
    info!(
        database = %config.paths.database_file.display(),
        backups = %config.paths.backups_dir.display(),
        "Configuration loaded"
    );

    // A missing file stays missing; an unreadable one must not block status or restore
    let lifecycle = Arc::new(SqliteLifecycle::existing(&config.paths.database_file));
    if let Err(e) = lifecycle.initialize().await {
        warn!(error = %e, "database unavailable, continuing without a connection");
    }
    let interaction = Arc::new(TerminalInteraction {
        assume_yes: cli.yes,
        backups_dir: config.paths.backups_dir.clone(),
    });
    let backups_dir = config.paths.backups_dir.clone();
    let (service, mut completions) =
        MaintenanceService::new(config, lifecycle.clone(), interaction, Vec::new());

    let submission = match cli.command {
        Command::List => {
            list_bundles(&service, cli.json).await?;
            lifecycle.shutdown().await;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Backup => service.request_backup(),
        Command::Restore { bundle } => {
            if bundle.is_none() && !cli.json {
                list_bundles(&service, false).await?;
            }
            service.request_restore(bundle.map(|b| resolve_bundle(&backups_dir, &b)))
        }
        Command::Prune { keep } => service.request_prune(keep),
        Command::Delete { id } => service.request_delete(&id),
        Command::Status => service.request_snapshot(),
        Command::Maintain { operation } => {
            let operation = match operation {
                Some(name) => Some(MaintenanceOperation::from_name(&name).ok_or_else(|| {
                    DatabaseError::Config(format!("unknown maintenance operation: {}", name))
                })?),
                None => None,
            };
            service.request_maintenance(operation)
        }
        Command::Reset => service.request_reset(),
    };

    let exit_code = match submission {
        Submission::Declined => {
            eprintln!("Cancelled");
            ExitCode::SUCCESS
        }
        Submission::Started | Submission::Rejected => match completions.recv().await {
            Some(completion) => {
                service.deliver(&completion);
                if cli.json {
                    print_json(&completion)?;
                }
                if completion.is_failure() || submission == Submission::Rejected {
                    ExitCode::FAILURE
                } else {
                    ExitCode::SUCCESS
                }
            }
            None => ExitCode::FAILURE,
        },
    };

    lifecycle.shutdown().await;
    Ok(exit_code)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "maintenance command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
