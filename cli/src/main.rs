//! Wiper - Command-line interface for the secure wiping engine.
//!
//! Expands the given files and folders, overwrites every file with the chosen
//! algorithm and reports progress to stderr.

mod settings;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use wiper_engine::{
    expand_targets, DestructionPolicy, ProgressEvent, ProgressObserver, ProgressSnapshot,
    SessionSummary, TaskState, WipeEngine,
};

use crate::settings::Settings;

/// Wiper - Securely destroy files and folders
#[derive(Parser, Debug)]
#[command(name = "wiper")]
#[command(version = "0.1.0")]
#[command(about = "Overwrite files with wipe patterns, then delete them")]
struct Args {
    /// Files or folders to wipe
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Wipe algorithm (see --list-algorithms)
    #[arg(long, short, value_name = "NAME")]
    algorithm: Option<String>,

    /// Number of passes for algorithms with an editable repeat count
    #[arg(long, value_name = "N")]
    repeats: Option<u32>,

    /// Wipe several files at once
    #[arg(long)]
    parallel: bool,

    /// Worker threads when wiping in parallel (implies --parallel)
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// TOML settings file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Overwrite but leave the files in place
    #[arg(long, conflicts_with = "truncate_only")]
    keep: bool,

    /// Overwrite and truncate to zero bytes without deleting
    #[arg(long)]
    truncate_only: bool,

    /// Read back the final pass and compare it
    #[arg(long)]
    verify: bool,

    /// Print the available algorithms and exit
    #[arg(long)]
    list_algorithms: bool,

    /// Confirm the wipe; without it only the plan is printed
    #[arg(long, short)]
    yes: bool,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

/// Observer that prints a progress bar and the final summary
struct CliProgress {
    verbose: bool,
    passes: u32,
    start_time: Instant,
    last_progress_update: Mutex<PrintedProgress>,
}

/// The progress line currently on screen
#[derive(Debug, Default)]
struct PrintedProgress {
    at: Option<Instant>,
    revision: u64,
}

impl CliProgress {
    fn new(verbose: bool, passes: u32) -> Self {
        CliProgress {
            verbose,
            passes: passes.max(1),
            start_time: Instant::now(),
            last_progress_update: Mutex::new(PrintedProgress::default()),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: std::time::Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn print_progress_bar(percent: u32) -> String {
        let percent = percent.min(100);
        let filled = (percent / 5) as usize;
        let empty = 20 - filled;
        format!(
            "[{}{}] {}%",
            "=".repeat(filled),
            " ".repeat(empty),
            percent
        )
    }

    fn percent(snapshot: &ProgressSnapshot, passes: u32) -> u32 {
        let expected = snapshot.overall.total_file_size.saturating_mul(u64::from(passes));
        if expected == 0 {
            return 100;
        }
        (snapshot.overall.total_wiped_size as f64 / expected as f64 * 100.0) as u32
    }

    fn file_name(path: &std::path::Path) -> &str {
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("(unknown)")
    }

    /// Workers publish concurrently, so snapshots can arrive out of order.
    /// Only a snapshot newer than the one on screen is printed, at most
    /// once per 200ms.
    fn admit(printed: &mut PrintedProgress, revision: u64, now: Instant) -> bool {
        if revision <= printed.revision {
            return false;
        }
        if printed
            .at
            .map_or(false, |t| now.duration_since(t).as_millis() < 200)
        {
            return false;
        }
        printed.at = Some(now);
        printed.revision = revision;
        true
    }

    fn print_bytes_progress(&self, snapshot: &ProgressSnapshot) {
        let mut printed = self
            .last_progress_update
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if !Self::admit(&mut printed, snapshot.revision, Instant::now()) {
            return;
        }

        eprint!(
            "\rProgress: {} | {} of {} files | {} written",
            Self::print_progress_bar(Self::percent(snapshot, self.passes)),
            snapshot.states.total() - snapshot.states.active(),
            snapshot.states.total(),
            Self::format_bytes(snapshot.overall.total_wiped_size)
        );
        let _ = std::io::Write::flush(&mut std::io::stderr());
    }
}

impl ProgressObserver for CliProgress {
    fn on_progress(&self, event: &ProgressEvent, snapshot: &ProgressSnapshot) {
        match event {
            ProgressEvent::Registered { count } => {
                eprintln!(
                    "Wiping {} files ({})",
                    count,
                    Self::format_bytes(snapshot.overall.total_file_size)
                );
            }
            ProgressEvent::StateChanged { index, path, new, .. } if self.verbose => {
                if *new == TaskState::Processing || new.is_terminal() {
                    eprintln!("\r[{:3}] {}: {}", index, new, Self::file_name(path));
                }
            }
            ProgressEvent::BytesWritten { .. } => self.print_bytes_progress(snapshot),
            _ => {}
        }
    }

    fn on_elevation_recommended(&self, permission_failures: usize) {
        eprintln!();
        eprintln!(
            "{} file(s) were denied access. Run wiper again as administrator/root to wipe them.",
            permission_failures
        );
    }

    fn on_session_completed(&self, summary: &SessionSummary) {
        eprintln!();
        eprintln!("Wipe complete!");
        eprintln!(
            "Summary: {} wiped, {} failed, {} missing, {} canceled",
            summary.counts.finished,
            summary.counts.failed,
            summary.counts.missing,
            summary.counts.canceled
        );
        eprintln!(
            "Bytes written: {}",
            Self::format_bytes(summary.overall.total_wiped_size)
        );
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));

        if !summary.failed.is_empty() {
            eprintln!();
            eprintln!("Failed files:");
            for task in &summary.failed {
                match &task.error {
                    Some(error) => eprintln!("  {}: {}", task.path.display(), error),
                    None => eprintln!("  {}: (unknown error)", task.path.display()),
                }
            }
        }

        if !summary.missing.is_empty() {
            eprintln!();
            eprintln!("Missing files:");
            for task in &summary.missing {
                eprintln!("  {}", task.path.display());
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Parse arguments, then run the wipe
fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    // Exit code tracking
    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<()> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    if args.keep {
        settings.engine.destruction = DestructionPolicy::Keep;
    } else if args.truncate_only {
        settings.engine.destruction = DestructionPolicy::Truncate;
    }
    if args.verify {
        settings.engine.verify_final_pass = true;
    }

    let engine = WipeEngine::new(settings.engine.clone()).context("Engine configuration rejected")?;

    if args.list_algorithms {
        for algorithm in engine.registry().list() {
            let repeats = if algorithm.is_editable() {
                format!("{} pass(es), editable", algorithm.repeats())
            } else {
                format!("{} passes", algorithm.repeats())
            };
            println!(
                "{:<10} {:<28} {}",
                algorithm.name, algorithm.display_label, repeats
            );
        }
        return Ok(());
    }

    if args.paths.is_empty() {
        bail!("No files or folders given");
    }

    let name = args.algorithm.as_deref().unwrap_or(&settings.algorithm);
    let mut algorithm = engine.registry().select(name)?;
    if let Some(requested) = args.repeats.or(settings.repeats) {
        let applied = engine.registry().set_repeats(&mut algorithm, requested);
        if applied != requested {
            tracing::warn!(
                algorithm = %algorithm.name,
                requested,
                applied,
                "repeat count adjusted"
            );
        }
    }

    let mut processing = settings.processing;
    if args.parallel {
        processing.allow_parallel = true;
    }
    if let Some(threads) = args.threads {
        processing.allow_parallel = true;
        processing.thread_count = threads;
    }

    if !args.yes {
        let expansion = expand_targets(&args.paths, settings.engine.follow_symlinks);
        eprintln!("Plan:");
        eprintln!("  Algorithm: {} ({} passes)", algorithm.display_label, algorithm.repeats());
        eprintln!("  Files: {}", expansion.tasks.len());
        eprintln!("  After wipe: {}", settings.engine.destruction);
        for task in expansion.tasks.iter().take(20) {
            eprintln!("    {}", task.path().display());
        }
        if expansion.tasks.len() > 20 {
            eprintln!("    ... and {} more", expansion.tasks.len() - 20);
        }
        bail!("Refusing to wipe without --yes");
    }

    engine.subscribe(Arc::new(CliProgress::new(args.verbose, algorithm.repeats())));

    let session = engine
        .begin_session(&args.paths, &algorithm, &processing)
        .context("Failed to start wipe session")?;
    let summary = session.wait();

    if summary.has_failures() {
        bail!("{} file(s) could not be wiped", summary.counts.failed);
    }
    Ok(())
}
