//! # docbridge CLI
//!
//! ## Usage
//!
//! ```bash
//! docbridge --config ./config/docbridge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docbridge init` | Create the state store and knowledge base |
//! | `docbridge owner add\|list` | Manage owners |
//! | `docbridge folder add\|remove\|list` | Manage watched folders |
//! | `docbridge process` | Process new and modified files |
//! | `docbridge validate` | Check knowledge-base readiness for export |
//! | `docbridge export` | Build a full or incremental package |
//! | `docbridge validate-package <dir>` | Re-check a package on disk |
//! | `docbridge merge <dir>` | Merge a package into this store |
//! | `docbridge check-replica` | Verify a deployed replica against config and manifest |
//! | `docbridge stats` | Summarize both stores |
//! | `docbridge monitor` | Log memory usage until interrupted |

use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use docbridge_core::manifest::ExportKind;
use docbridge_core::validator::DataValidator;
use tracing_subscriber::EnvFilter;

use docbridge::config::{self, MonitorConfig};
use docbridge::export::{self, ExportRequest};
use docbridge::merge::MergeOptions;
use docbridge::monitor::ResourceMonitor;
use docbridge::orchestrator::PipelineCounters;
use docbridge::progress::ProgressMode;
use docbridge::replica;
use docbridge::services::Services;
use docbridge::stats;

/// docbridge: incremental document processing with export/merge sync.
///
/// All commands that touch the stores read the `--config` TOML file.
#[derive(Parser)]
#[command(
    name = "docbridge",
    about = "Incremental document processing with export/merge sync between a primary and a replica",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docbridge.toml")]
    config: PathBuf,

    /// Progress output on stderr: off, human, or json. Defaults to human
    /// on a terminal and off otherwise.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the state store and knowledge base. Idempotent.
    Init,

    /// Manage owners.
    Owner {
        #[command(subcommand)]
        action: OwnerAction,
    },

    /// Manage watched folders.
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },

    /// Process new and modified files in every watched folder.
    Process {
        /// Only process this owner's folders.
        #[arg(long)]
        owner: Option<String>,
    },

    /// Check embedding coverage and metadata completeness.
    Validate,

    /// Build an export package.
    Export {
        /// Directory the package and archive are written into.
        #[arg(long)]
        output: PathBuf,

        /// Export only files processed after `--since`.
        #[arg(long, requires = "since")]
        incremental: bool,

        /// RFC 3339 timestamp or YYYY-MM-DD (midnight UTC).
        #[arg(long)]
        since: Option<String>,
    },

    /// Re-check an unpacked export package.
    ValidatePackage {
        package: PathBuf,
    },

    /// Merge an export package into this store.
    Merge {
        package: PathBuf,

        /// Accept a full package and merge it like a delta.
        #[arg(long)]
        accept_full: bool,
    },

    /// Check a deployed replica: knowledge base present and non-empty,
    /// embedding dimension agrees with config and manifest.
    CheckReplica {
        /// Deployed manifest; defaults to `manifest.json` beside the
        /// knowledge base directory.
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Show store statistics.
    Stats,

    /// Log memory usage at a fixed interval until interrupted.
    Monitor {
        /// Seconds between samples; defaults to `[monitor] interval_secs`.
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(Subcommand)]
enum OwnerAction {
    Add { name: String },
    List,
}

#[derive(Subcommand)]
enum FolderAction {
    Add {
        path: PathBuf,
        #[arg(long)]
        owner: String,
    },
    Remove {
        path: PathBuf,
        #[arg(long)]
        owner: String,
    },
    List {
        #[arg(long)]
        owner: Option<String>,
    },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docbridge=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Accept RFC 3339 or a bare date.
fn parse_since(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid --since '{}': expected RFC 3339 or YYYY-MM-DD", s))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| anyhow::anyhow!("invalid --since '{}'", s))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Packages are self-describing; no local stores needed.
    if let Commands::ValidatePackage { package } = &cli.command {
        let result = export::validate_package(package);
        print_json(&result)?;
        if !result.valid {
            bail!("package {} is invalid", package.display());
        }
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    if let Commands::CheckReplica { manifest } = &cli.command {
        let check = replica::check_replica(&cfg, manifest.as_deref()).await?;
        print_json(&check)?;
        if !check.valid {
            bail!("replica is not ready: {}", check.errors.join("; "));
        }
        return Ok(());
    }

    if let Commands::Monitor { interval } = &cli.command {
        let monitor_cfg = MonitorConfig {
            interval_secs: interval.unwrap_or(cfg.monitor.interval_secs),
            ..cfg.monitor.clone()
        };
        let handle = ResourceMonitor::spawn(monitor_cfg, std::sync::Arc::new(PipelineCounters::default()));
        tokio::signal::ctrl_c().await?;
        handle.stop().await;
        return Ok(());
    }

    let services = Services::open(cfg).await?;

    match cli.command {
        Commands::Init => {
            println!(
                "Initialized state store at {} and knowledge base at {}",
                services.config.state.path.display(),
                services.config.knowledge_base.path.display()
            );
        }
        Commands::Owner { action } => match action {
            OwnerAction::Add { name } => {
                let owner = services.state.ensure_owner(&name).await?;
                println!("Owner '{}' (id {})", owner.name, owner.id);
            }
            OwnerAction::List => {
                for owner in services.state.list_owners().await? {
                    println!("{}", owner.name);
                }
            }
        },
        Commands::Folder { action } => match action {
            FolderAction::Add { path, owner } => {
                let folder = services.state.add_folder(&path, &owner).await?;
                println!("Watching {} for '{}'", folder.path, folder.owner);
            }
            FolderAction::Remove { path, owner } => {
                let removed = services.state.remove_folder(&path, &owner).await?;
                println!(
                    "Stopped watching {} ({} file records removed)",
                    path.display(),
                    removed
                );
            }
            FolderAction::List { owner } => {
                for folder in services.state.list_folders(owner.as_deref()).await? {
                    println!("{:<12} {}", folder.owner, folder.path);
                }
            }
        },
        Commands::Process { owner } => {
            let mode = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
            let orchestrator = services.orchestrator()?.with_progress(mode.reporter());
            let monitor =
                ResourceMonitor::spawn(services.config.monitor.clone(), orchestrator.counters());
            let result = orchestrator.run(owner.as_deref()).await;
            monitor.stop().await;
            print_json(&result)?;
        }
        Commands::Validate => {
            let report = DataValidator::new(
                services.knowledge_base.as_ref(),
                services.config.embedding.dims,
            )
            .validate()
            .await?;
            print_json(&report)?;
            let violations = report.violations(ExportKind::Full);
            if !violations.is_empty() {
                bail!("knowledge base not ready: {}", violations.join("; "));
            }
        }
        Commands::Export {
            output,
            incremental,
            since,
        } => {
            let since = since.as_deref().map(parse_since).transpose()?;
            let request = ExportRequest {
                output_dir: output,
                kind: if incremental {
                    ExportKind::Incremental
                } else {
                    ExportKind::Full
                },
                since,
            };
            let result = services.packager().export(&request).await;
            print_json(&result)?;
            if !result.success {
                bail!("export failed: {}", result.errors.join("; "));
            }
        }
        Commands::Merge {
            package,
            accept_full,
        } => {
            let outcome = services
                .reconciler()
                .merge_package_with(&package, MergeOptions { accept_full })
                .await?;
            print_json(&outcome)?;
            if !outcome.success {
                bail!("merge failed: {}", outcome.errors.join("; "));
            }
        }
        Commands::Stats => {
            stats::run_stats(&services).await?;
        }
        Commands::ValidatePackage { .. }
        | Commands::CheckReplica { .. }
        | Commands::Monitor { .. } => {
            // Handled above (before opening the stores)
        }
    }

    services.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_since_accepts_date_and_rfc3339() {
        let d = parse_since("2026-01-02").unwrap();
        assert_eq!(d.to_rfc3339(), "2026-01-02T00:00:00+00:00");
        let t = parse_since("2026-01-02T03:04:05Z").unwrap();
        assert_eq!(t.timestamp(), d.timestamp() + 3 * 3600 + 4 * 60 + 5);
        assert!(parse_since("yesterday").is_err());
    }

    #[test]
    fn test_cli_parses_export_flags() {
        let cli = Cli::try_parse_from([
            "docbridge",
            "export",
            "--output",
            "/tmp/out",
            "--incremental",
            "--since",
            "2026-01-01",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Export { incremental: true, .. }));
        assert!(Cli::try_parse_from(["docbridge", "export", "--output", "x", "--incremental"]).is_err());
    }
}
