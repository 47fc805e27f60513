//! # Snapkeep CLI - Incremental snapshot backups
//!
//! Command-line driver for the snapkeep library, meant to be run from cron.
//!
//! ## Features
//! - Run one backup cycle and exit with its status
//! - Inspect snapshots and the chain pointer
//! - Prune manually and probe free space
//!
//! ## Usage
//! ```bash
//! # Write a config file once
//! snapkeep --config /etc/snapkeep.json --source /var/lib/docker/volumes --backup-home /backup init-config
//!
//! # Nightly cycle, mailing the outcome
//! snapkeep --config /etc/snapkeep.json run --notify-command "mail -s {subject} {recipient}"
//!
//! # Inspect
//! snapkeep --config /etc/snapkeep.json list
//! snapkeep --config /etc/snapkeep.json status
//! ```
//!
//! ## Exit codes
//! - `0`: success
//! - `1`: pre-flight or snapshot failure, or any command error
//! - `2`: snapshot succeeded but retention failed

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use snapkeep::utils::format_bytes;
use snapkeep::{
    list_snapshots, BackupConfig, BackupRunner, CommandNotifier, CompareMode, CycleLock,
    FsSpaceProbe, LogNotifier, MirrorKind, Notifier, RetentionManager, SnapError, SnapshotChain,
    SpaceGuard, SpaceProbe, types::PARTIAL_SUFFIX,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Snapkeep CLI - hard-linked snapshot backups with retention
#[derive(Parser)]
#[command(name = "snapkeep")]
#[command(version)]
#[command(about = "Incremental hard-linked snapshot backups with retention and notifications")]
#[command(long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory to back up (overrides the config file)
    #[arg(short, long, global = true)]
    source: Option<PathBuf>,

    /// Backup home holding snapshots/, previous_versions/ and last_snapshot.txt
    #[arg(short = 'b', long, global = true)]
    backup_home: Option<PathBuf>,

    /// Maximum number of snapshots to keep
    #[arg(short, long, global = true)]
    max_snapshots: Option<usize>,

    /// Minimum free space on the destination, in percent
    #[arg(long, global = true)]
    min_free_percent: Option<f64>,

    /// Notification recipient
    #[arg(long, global = true)]
    recipient: Option<String>,

    /// Mirroring copy to use
    #[arg(long, value_enum, global = true)]
    mirror: Option<MirrorMode>,

    /// Compare file contents instead of size and mtime
    #[arg(long, global = true)]
    checksum: bool,

    /// Exclude pattern (glob, may be repeated)
    #[arg(short, long, global = true)]
    exclude: Vec<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backup cycle
    Run {
        /// Deliver the outcome through this command; `{subject}` and
        /// `{recipient}` are substituted and the body is piped to stdin
        #[arg(long)]
        notify_command: Option<String>,

        /// Show progress
        #[arg(long)]
        progress: bool,
    },

    /// List snapshots
    #[command(alias = "ls")]
    List {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Show chain pointer and snapshot count
    Status,

    /// Run one retention pass
    Prune,

    /// Check free space on the destination filesystem
    CheckSpace {
        /// Path to probe (defaults to the snapshot root)
        path: Option<PathBuf>,

        /// Threshold in percent (defaults to the configured minimum)
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Write a configuration file from the given flags
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum MirrorMode {
    Native,
    Rsync,
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            match e.downcast_ref::<SnapError>() {
                Some(snap) => eprintln!("{}: {}", "Error".red().bold(), snap.user_message()),
                None => eprintln!("{}: {:#}", "Error".red().bold(), e),
            }
            std::process::exit(1);
        }
    }
}

/// Main command runner, returning the process exit code
fn run(cli: Cli) -> anyhow::Result<i32> {
    match &cli.command {
        Commands::InitConfig { force } => cmd_init_config(&cli, *force),
        Commands::Run { notify_command, progress } => {
            cmd_run(resolve_config(&cli, cli.config.as_deref())?, notify_command.as_deref(), *progress)
        }
        Commands::List { detailed } => cmd_list(&resolve_config(&cli, cli.config.as_deref())?, *detailed),
        Commands::Status => cmd_status(&resolve_config(&cli, cli.config.as_deref())?),
        Commands::Prune => cmd_prune(&resolve_config(&cli, cli.config.as_deref())?),
        Commands::CheckSpace { path, threshold } => {
            cmd_check_space(&resolve_config(&cli, cli.config.as_deref())?, path.clone(), *threshold)
        }
    }
}

/// Build the effective configuration: `file` first, then flag overrides
fn resolve_config(cli: &Cli, file: Option<&Path>) -> anyhow::Result<BackupConfig> {
    let mut config = match file {
        Some(path) => BackupConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            let (Some(source), Some(home)) = (&cli.source, &cli.backup_home) else {
                bail!("either --config or both --source and --backup-home are required");
            };
            BackupConfig::with_backup_home(source, home)
        }
    };

    if file.is_some() {
        if let Some(source) = &cli.source {
            config.source_dir = source.clone();
        }
        if let Some(home) = &cli.backup_home {
            let derived = BackupConfig::with_backup_home(&config.source_dir, home);
            config.snapshot_root = derived.snapshot_root;
            config.previous_versions_dir = derived.previous_versions_dir;
            config.chain_file = derived.chain_file;
        }
    }
    if let Some(max) = cli.max_snapshots {
        config = config.max_snapshots(max);
    }
    if let Some(percent) = cli.min_free_percent {
        config = config.min_free_percent(percent);
    }
    if let Some(recipient) = &cli.recipient {
        config = config.recipient(recipient.clone());
    }
    if let Some(mode) = cli.mirror {
        config = config.mirror(match mode {
            MirrorMode::Native => MirrorKind::Native,
            MirrorMode::Rsync => MirrorKind::Rsync,
        });
    }
    if cli.checksum {
        config = config.compare(CompareMode::Checksum);
    }
    if !cli.exclude.is_empty() {
        let mut excludes = config.excludes.clone();
        excludes.extend(cli.exclude.iter().cloned());
        config = config.excludes(excludes);
    }

    Ok(config.to_absolute()?)
}

/// Run one backup cycle
///
/// The outcome is reported through the notifier and the exit code reflects
/// which stage, if any, failed.
fn cmd_run(config: BackupConfig, notify_command: Option<&str>, show_progress: bool) -> anyhow::Result<i32> {
    let notifier: Box<dyn Notifier> = match notify_command {
        Some(line) => Box::new(CommandNotifier::from_command_line(line)?),
        None => Box::new(LogNotifier),
    };
    let source = config.source_dir.clone();
    let runner = BackupRunner::builder(config).notifier(notifier).build()?;

    println!("{} {}", "Backing up".blue().bold(), source.display().to_string().cyan());

    let start = Instant::now();
    let progress = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Taking snapshot...");
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };

    let outcome = runner.execute();

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let duration = Duration::from_secs(start.elapsed().as_secs());

    if outcome.success {
        println!("{} {}", "✓".green().bold(), outcome.subject.green().bold());
    } else if outcome.exit_code() == 2 {
        println!("{} {}", "!".yellow().bold(), outcome.subject.yellow().bold());
    } else {
        println!("{} {}", "✗".red().bold(), outcome.subject.red().bold());
    }

    if let Some(snapshot) = &outcome.snapshot {
        println!("  Snapshot: {}", snapshot.display().to_string().cyan());
    }
    if let Some(stats) = &outcome.stats {
        println!(
            "  Files: {} ({} copied, {}; {} linked, {})",
            stats.total_files().to_string().cyan(),
            stats.files_copied,
            format_bytes(stats.bytes_copied),
            stats.files_linked,
            format_bytes(stats.bytes_linked)
        );
        if stats.files_archived > 0 {
            println!("  Archived: {} previous versions", stats.files_archived.to_string().yellow());
        }
    }
    if let Some(pruned) = &outcome.pruned {
        println!("  Pruned: {}", pruned.display().to_string().dimmed());
    }
    if let Some(error) = &outcome.error {
        println!("  Error: {}", error.red());
    }
    println!("  Time: {}", format_duration(duration).to_string().cyan());

    Ok(outcome.exit_code())
}

/// List snapshots, oldest first
///
/// The snapshot the chain pointer names is marked with `*`.
fn cmd_list(config: &BackupConfig, detailed: bool) -> anyhow::Result<i32> {
    let snapshots = list_snapshots(&config.snapshot_root)?;
    let current = SnapshotChain::new(&config.chain_file).read()?;

    if snapshots.is_empty() {
        println!("{}", "No snapshots found.".yellow());
        return Ok(0);
    }

    println!("{}", "Snapshots:".blue().bold());
    println!();

    let now = Utc::now().naive_utc();
    for snapshot in &snapshots {
        let marker = if current.as_deref() == Some(snapshot.path.as_path()) {
            "*".green().bold()
        } else {
            " ".normal()
        };
        let age = (now - snapshot.created_at).to_std().unwrap_or_default();
        let age = Duration::from_secs(age.as_secs() / 60 * 60);

        print!("{} {} ", marker, snapshot.name.yellow().bold());
        println!("{}", format!("{} ago", format_duration(age)).dimmed());

        if detailed {
            let (files, bytes) = tree_size(&snapshot.path);
            println!(
                "    Files: {} | Size: {}",
                files.to_string().dimmed(),
                format_bytes(bytes).dimmed()
            );
            let archive = config.previous_versions_dir.join(&snapshot.name);
            if archive.exists() {
                println!("    Archive: {}", archive.display().to_string().dimmed());
            }
        }
    }

    println!("\n{}", format!("{} of at most {} snapshots", snapshots.len(), config.max_snapshots).dimmed());
    Ok(0)
}

/// Show the chain pointer, snapshot count and destination free space
fn cmd_status(config: &BackupConfig) -> anyhow::Result<i32> {
    let chain = SnapshotChain::new(&config.chain_file);
    let snapshots = list_snapshots(&config.snapshot_root)?;

    println!("{}", "Snapkeep Status:".blue().bold());
    println!();

    println!("{}", "Chain:".bold());
    println!("  Pointer file: {}", config.chain_file.display());
    match chain.read()? {
        Some(target) if target.is_dir() => {
            println!("  Last snapshot: {}", target.display().to_string().cyan());
        }
        Some(target) => {
            println!(
                "  Last snapshot: {} {}",
                target.display().to_string().red(),
                "(missing, next cycle takes a full copy)".yellow()
            );
        }
        None => println!("  Last snapshot: {}", "None (next cycle takes a full copy)".dimmed()),
    }

    println!("\n{}", "Snapshots:".bold());
    println!("  Root: {}", config.snapshot_root.display());
    println!("  Count: {} (max {})", snapshots.len(), config.max_snapshots);
    if let (Some(oldest), Some(newest)) = (snapshots.first(), snapshots.last()) {
        println!("  Oldest: {}", oldest.name);
        println!("  Newest: {}", newest.name);
    }
    let partials = partial_snapshots(&config.snapshot_root);
    if !partials.is_empty() {
        println!("  Incomplete: {}", partials.join(", ").yellow());
    }

    println!("\n{}", "Destination:".bold());
    match FsSpaceProbe.usage(&config.snapshot_root) {
        Ok(usage) => println!(
            "  Free: {:.2}% of {} (minimum {:.2}%)",
            usage.free_percent(),
            format_bytes(usage.total),
            config.min_free_percent
        ),
        Err(e) => println!("  Free: {}", e.to_string().red()),
    }

    Ok(0)
}

/// Run one retention pass outside a backup cycle
fn cmd_prune(config: &BackupConfig) -> anyhow::Result<i32> {
    let _lock = CycleLock::acquire(&config.snapshot_root)?;
    let keep = SnapshotChain::new(&config.chain_file).link_reference()?;

    match RetentionManager::new(config.max_snapshots).prune_except(&config.snapshot_root, keep.as_deref())? {
        Some(path) => println!("{} Deleted {}", "✓".green().bold(), path.display().to_string().yellow()),
        None => println!("{}", "Nothing to prune.".dimmed()),
    }
    Ok(0)
}

/// Probe free space, exiting 1 when below the threshold
fn cmd_check_space(config: &BackupConfig, path: Option<PathBuf>, threshold: Option<f64>) -> anyhow::Result<i32> {
    let path = path.unwrap_or_else(|| config.snapshot_root.clone());
    let threshold = threshold.unwrap_or(config.min_free_percent);

    match SpaceGuard::default().check(&path, threshold) {
        Ok(free) => {
            println!("{} Disk space check passed: {:.2}% free.", "✓".green().bold(), free);
            Ok(0)
        }
        Err(e @ SnapError::InsufficientSpace { .. }) => {
            println!("{} {}", "✗".red().bold(), e.to_string().red());
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

/// Write a config file built from the command-line flags
fn cmd_init_config(cli: &Cli, force: bool) -> anyhow::Result<i32> {
    let Some(path) = &cli.config else {
        bail!("init-config needs --config <file> to write to");
    };
    if path.exists() && !force {
        bail!("{} already exists. Use --force to overwrite.", path.display());
    }

    let config = resolve_config(cli, None)?;
    config.validate()?;
    config.save(path)?;

    println!("{} Wrote {}", "✓".green().bold(), path.display().to_string().cyan());
    println!("  Source: {}", config.source_dir.display().to_string().cyan());
    println!("  Snapshots: {}", config.snapshot_root.display().to_string().cyan());
    println!("  Keep: {} snapshots, {:.2}% free minimum", config.max_snapshots, config.min_free_percent);
    println!("\nNext steps:");
    println!("  - Run a cycle: {}", format!("snapkeep --config {} run", path.display()).yellow());
    Ok(0)
}

// Helper functions

/// Count regular files and their apparent size under `root`
fn tree_size(root: &Path) -> (usize, u64) {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .fold((0, 0), |(files, bytes), m| (files + 1, bytes + m.len()))
}

/// Names of leftover `<name>.partial` directories
fn partial_snapshots(root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.ends_with(PARTIAL_SUFFIX))
        .collect();
    names.sort();
    names
}
