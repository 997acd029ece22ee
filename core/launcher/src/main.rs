//! dl-launcher: command-line front end for the download worker.
//!
//! ## Subcommands
//!
//! - `detect`: classify the local install (fresh, interrupted, interrupted repair)
//! - `verify`: hash installed files against the manifest
//! - `download`: run a worker session to completion
//! - `repair`: verify, then re-fetch whatever failed

mod logging;
mod progress;

use clap::{Parser, Subcommand};
use launcher_core::{LauncherEngine, LauncherPaths, SessionOutcome};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dl-launcher")]
#[command(about = "Download worker supervisor")]
#[command(version)]
struct Cli {
    /// Launcher root holding config.json, logs/ and bin/
    #[arg(long, default_value = ".")]
    base: PathBuf,

    /// Config file to use instead of <base>/config.json
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker binary to use instead of <base>/bin/downloadIPC
    #[arg(long)]
    worker: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the classification of the local install as JSON
    Detect,

    /// Print files that fail verification, one per line
    Verify,

    /// Run a download session to completion
    Download,

    /// Verify the install and repair any files that fail
    Repair,
}

fn main() {
    let cli = Cli::parse();

    let mut paths = LauncherPaths::with_root(&cli.base);
    if let Some(config) = cli.config {
        paths = paths.with_config_file(config);
    }
    let logging_guard = logging::init(&paths.logs_dir());

    let mut engine = LauncherEngine::load(paths).with_observer(Arc::new(progress::TracingObserver));
    if let Some(worker) = cli.worker {
        engine = engine.with_worker(worker);
    }

    let code = match cli.command {
        Commands::Detect => detect(&engine),
        Commands::Verify => verify(&engine),
        Commands::Download => download(&engine),
        Commands::Repair => repair(&engine),
    };
    drop(logging_guard);
    std::process::exit(code);
}

fn detect(engine: &LauncherEngine) -> i32 {
    let Some(classification) = engine.detect_local_state() else {
        println!("no local state");
        return 0;
    };
    match serde_json::to_string_pretty(&classification) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to serialize classification");
            1
        }
    }
}

fn verify_with_progress(engine: &LauncherEngine) -> Vec<String> {
    engine.verify_integrity(|done, total| {
        tracing::info!(done, total, "Verifying");
    })
}

fn verify(engine: &LauncherEngine) -> i32 {
    for path in verify_with_progress(engine) {
        println!("{}", path);
    }
    0
}

fn report(outcome: &SessionOutcome) {
    tracing::info!(
        exit = ?outcome.exit,
        killed = outcome.killed,
        channel = ?outcome.channel_exit,
        "Worker session finished"
    );
}

fn exit_code(result: launcher_core::Result<SessionOutcome>) -> i32 {
    match result {
        Ok(outcome) if outcome.success() => 0,
        Ok(_) => 1,
        Err(err) => {
            tracing::error!(error = %err, "Worker session did not start");
            1
        }
    }
}

fn download(engine: &LauncherEngine) -> i32 {
    engine.detect_local_state();
    exit_code(engine.start_download(report))
}

fn repair(engine: &LauncherEngine) -> i32 {
    engine.detect_local_state();
    let broken = verify_with_progress(engine);
    if broken.is_empty() {
        tracing::info!("All files verified; nothing to repair");
        return 0;
    }
    tracing::info!(files = broken.len(), "Repairing files");
    exit_code(engine.repair_files(&broken, report))
}
