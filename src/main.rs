// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "rgbd-capture")]
#[command(about = "Record RGB-D sensor streams as a TUM-style dataset")]
#[command(version = env!("RGBD_CAPTURE_BUILD_VERSION"))]
#[command(subcommand_required = false)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a dataset (default)
    Capture(cli::CaptureArgs),

    /// List the video modes of the sensor
    List {
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Sensor backend
        #[arg(short, long, value_enum)]
        backend: Option<rgbd_capture::backends::sensor::SensorBackendType>,
    },

    /// Check a dataset directory for consistency
    Verify {
        /// Dataset root
        dir: PathBuf,
    },
}

fn env_filter() -> EnvFilter {
    // Examples: RUST_LOG=debug, RUST_LOG=rgbd_capture=debug
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log to stderr
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .with_level(true)
        .init();
}

/// Log to a file, for when the terminal preview owns the screen
fn init_file_logging(path: &std::path::Path) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::List { config, backend }) => {
            init_logging();
            let args = cli::CaptureArgs {
                config,
                backend,
                ..cli::CaptureArgs::default()
            };
            cli::list_modes(&args.resolve_config()?)
        }
        Some(Commands::Verify { dir }) => {
            init_logging();
            cli::verify_dataset(&dir)
        }
        Some(Commands::Capture(args)) => run_capture(args),
        None => run_capture(cli::CaptureArgs::default()),
    }
}

fn run_capture(args: cli::CaptureArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.resolve_config()?;
    let output_root = args.output_root();
    std::fs::create_dir_all(&output_root)?;

    if args.headless {
        init_logging();
    } else {
        init_file_logging(&cli::log_file_path(&output_root))?;
    }

    cli::capture(&args, &config, &output_root)
}
