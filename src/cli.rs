// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! - `capture`: record a dataset (default command)
//! - `list`: print the modes each stream supports
//! - `verify`: check a dataset directory for consistency

use chrono::Local;
use clap::Args;
use rgbd_capture::backends::sensor::{self, ActiveSensor, SensorBackendType, StreamKind};
use rgbd_capture::capture::{CaptureLoop, HeadlessFrontend, InterruptFlag, Termination};
use rgbd_capture::config::{CaptureConfig, WritePolicy};
use rgbd_capture::constants::dataset::{DEFAULT_ROOT_FOLDER, LOG_FILE};
use rgbd_capture::dataset;
use rgbd_capture::terminal::TerminalPreview;
use std::path::{Path, PathBuf};

#[derive(Args, Debug, Default)]
pub struct CaptureArgs {
    /// Dataset root (default: ~/RGBD/dataset_TIMESTAMP)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Sensor backend
    #[arg(short, long, value_enum)]
    pub backend: Option<SensorBackendType>,

    /// Stop after this many frames
    #[arg(short = 'n', long)]
    pub frames: Option<u64>,

    /// First frame index
    #[arg(long)]
    pub start_index: Option<u64>,

    /// Hold color until depth for the same frame has been read
    #[arg(long)]
    pub paired: bool,

    /// Do not mirror the images
    #[arg(long)]
    pub no_mirror: bool,

    /// No terminal preview; stop with Ctrl+C
    #[arg(long)]
    pub headless: bool,
}

impl CaptureArgs {
    /// Load the configuration file (if any) and apply command-line overrides
    pub fn resolve_config(&self) -> Result<CaptureConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => CaptureConfig::load(path)?,
            None => CaptureConfig::default(),
        };
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if self.frames.is_some() {
            config.max_frames = self.frames;
        }
        if let Some(start_index) = self.start_index {
            config.start_index = start_index;
        }
        if self.paired {
            config.write_policy = WritePolicy::Paired;
        }
        if self.no_mirror {
            config.mirror = false;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn output_root(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(default_output_root)
    }
}

/// `~/RGBD/dataset_<timestamp>`
pub fn default_output_root() -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_ROOT_FOLDER)
        .join(format!("dataset_{}", timestamp))
}

/// Path of the log file used while the terminal preview owns the screen
pub fn log_file_path(output_root: &Path) -> PathBuf {
    output_root.join(LOG_FILE)
}

/// Record a dataset
pub fn capture(
    args: &CaptureArgs,
    config: &CaptureConfig,
    output_root: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = sensor::open_session(config)?;
    let mut active = sensor::session::initialize(session, config)?;
    let capture_loop = CaptureLoop::from_config(config);

    let summary = if args.headless {
        println!("Capturing into {} (Ctrl+C to stop)", output_root.display());
        let mut frontend = HeadlessFrontend::new(InterruptFlag::install_ctrlc()?);
        capture_loop.run(&mut *active, &mut frontend, output_root)?
    } else {
        let device = active.device_info().name.clone();
        let mut preview = TerminalPreview::enter(device)?;
        let result = capture_loop.run(&mut *active, &mut preview, output_root);
        drop(preview);
        result?
    };

    // Release the device before reporting
    drop(active);

    let reason = match &summary.termination {
        Termination::Cancelled => "cancelled".to_string(),
        Termination::FrameLimit => "frame limit reached".to_string(),
        Termination::ReadFailure { stream, error, .. } => {
            format!("{} read failed: {}", stream, error)
        }
    };
    println!(
        "Captured {} frames ({}..{}) into {} [{}, {:.1}s]",
        summary.frames_completed,
        summary.first_index,
        summary.next_index,
        summary.output_root.display(),
        reason,
        summary.elapsed.as_secs_f64()
    );

    summary.into_result()?;
    Ok(())
}

/// Print the supported modes of both streams
pub fn list_modes(config: &CaptureConfig) -> Result<(), Box<dyn std::error::Error>> {
    let active = ActiveSensor::new(sensor::open_session(config)?);
    let info = active.device_info();

    println!("Device: {} ({})", info.name, info.driver);
    println!("  color: {}", info.color_path);
    println!("  depth: {}", info.depth_path);
    println!();

    for stream in StreamKind::ALL {
        match active.list_supported_modes(stream) {
            Ok(modes) => {
                println!("{} modes:", stream);
                for (index, mode) in modes.iter().enumerate() {
                    println!(
                        "  Mode {}: Resolution = ({},{}), PixelFormat = {}, FPS = {}",
                        index, mode.width, mode.height, mode.pixel_format, mode.framerate
                    );
                }
            }
            Err(e) => println!("{} modes: unavailable ({})", stream, e),
        }
        println!();
    }

    Ok(())
}

/// Check a dataset and print what is wrong with it
pub fn verify_dataset(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let report = dataset::verify(root)?;

    println!("Dataset: {}", root.display());
    println!("  color entries: {}", report.rgb.len());
    println!("  depth entries: {}", report.depth.len());
    println!("  ground truth entries: {}", report.groundtruth.len());
    if let (Some(first), Some(last)) = (report.depth.first(), report.depth.last()) {
        println!("  frames: {}..={}", first.index, last.index);
    }
    if let Some(orphan) = report.orphaned_color {
        println!("  orphaned color frame: {}", orphan);
    }

    if report.is_consistent() {
        println!("OK");
        return Ok(());
    }

    println!();
    println!("{} problem(s):", report.problems.len());
    for problem in &report.problems {
        println!("  {}", problem);
    }
    Err(format!("dataset {} is inconsistent", root.display()).into())
}
