// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! NVR — Network Video Recorder
//!
//! Usage:
//!   nvr record --config config.json
//!   nvr status --config config.json
//!   nvr list   --config config.json --camera cam1
//!   nvr sweep  --config config.json

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nvr::nvr::Nvr;

#[derive(Parser)]
#[command(name = "nvr", about = "Network Video Recorder", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect every enabled camera and run until interrupted.
    Record {
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Print a brief status snapshot and exit.
    Status {
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },
    /// List recording files found on disk for a camera.
    List {
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
        /// Camera ID to list recordings for.
        #[arg(long)]
        camera: String,
    },
    /// Run a retention sweep over the recording root and exit.
    Sweep {
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },
}

/// Reads just `app.log_level` out of the config file, falling back to
/// `"info"` if the file is missing or malformed — logging isn't up yet to
/// report that failure, and the real error surfaces once `Nvr::new` loads
/// the file properly.
fn log_level_hint(config_path: &PathBuf) -> String {
    nvr::config::ConfigurationStore::load(config_path)
        .map(|store| store.app_config().log_level.clone())
        .unwrap_or_else(|_| "info".to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Command::Record { config }
        | Command::Status { config }
        | Command::List { config, .. }
        | Command::Sweep { config } => config,
    };
    let default_filter = log_level_hint(config_path);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    match cli.command {
        Command::Record { config } => run_record(config).await,
        Command::Status { config } => run_status(&config),
        Command::List { config, camera } => run_list(&config, &camera),
        Command::Sweep { config } => run_sweep(&config),
    }
}

async fn run_record(config_path: PathBuf) {
    let nvr = match Nvr::new(&config_path) {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(cameras = nvr.camera_ids().len(), "starting NVR");

    if let Err(e) = nvr.connect_all() {
        error!(error = %e, "failed to start cameras");
        std::process::exit(1);
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received CTRL+C, shutting down"),
        Err(e) => error!(error = %e, "signal error"),
    }

    if let Err(e) = nvr.disconnect_all() {
        error!(error = %e, "error while shutting down cameras");
    }
}

fn run_status(config_path: &PathBuf) {
    let nvr = match Nvr::new(config_path) {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let app = nvr.config().app_config();
    let cameras = nvr.config().get_all_cameras();
    let usage = nvr.recording().disk_usage().unwrap_or_default();

    println!("=== NVR Status ===");
    println!("Recording path : {}", app.recording_path.display());
    println!("Retention      : {} days", app.retention_days);
    println!("Disk usage     : {:.1} MB across {} files", usage.total_bytes as f64 / (1024.0 * 1024.0), usage.file_count);
    println!("Cameras        : {}", cameras.len());
    for cam in &cameras {
        println!(
            "  {} ({}): enabled={} recording={}",
            cam.camera_id, cam.name, cam.enabled, cam.recording_enabled
        );
    }
}

fn run_list(config_path: &PathBuf, camera_id: &str) {
    let nvr = match Nvr::new(config_path) {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let camera_dir = nvr.config().app_config().recording_path.join(camera_id);
    let Ok(date_dirs) = std::fs::read_dir(&camera_dir) else {
        println!("No recordings found for camera '{camera_id}'");
        return;
    };

    let mut files = Vec::new();
    for date_dir in date_dirs.flatten() {
        let Ok(entries) = std::fs::read_dir(date_dir.path()) else { continue };
        for entry in entries.flatten() {
            if entry.path().is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();

    if files.is_empty() {
        println!("No recordings found for camera '{camera_id}'");
        return;
    }

    println!("=== Recordings for camera '{camera_id}' ===");
    for path in &files {
        let size_kb = std::fs::metadata(path).map(|m| m.len() / 1024).unwrap_or(0);
        println!("  {}  ({} KB)", path.display(), size_kb);
    }
    println!("\nTotal: {} files", files.len());
}

fn run_sweep(config_path: &PathBuf) {
    let nvr = match Nvr::new(config_path) {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    match nvr.retention_sweep() {
        Ok(report) => println!(
            "Retention sweep complete: deleted {} files, freed {:.1} MB",
            report.deleted_files,
            report.freed_bytes as f64 / (1024.0 * 1024.0)
        ),
        Err(e) => {
            eprintln!("Retention sweep failed: {e}");
            std::process::exit(1);
        }
    }
}
