// SPDX-License-Identifier: GPL-3.0-only

//! RGB-D Capture - record depth and color streams as a TUM-style dataset
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Sensor session abstraction with V4L2 and synthetic backends
//! - [`capture`]: The capture loop, preview and cancellation seams
//! - [`dataset`]: On-disk dataset layout, writer and verifier
//! - [`config`]: Startup configuration
//! - [`terminal`]: Live preview in the terminal
//!
//! # Example
//!
//! ```no_run
//! use rgbd_capture::backends::sensor::{self, SensorBackendType};
//! use rgbd_capture::capture::{CaptureLoop, HeadlessFrontend, InterruptFlag};
//! use rgbd_capture::config::CaptureConfig;
//!
//! let config = CaptureConfig {
//!     backend: SensorBackendType::Synthetic,
//!     max_frames: Some(30),
//!     ..CaptureConfig::default()
//! };
//! let session = sensor::open_session(&config)?;
//! let mut active = sensor::session::initialize(session, &config)?;
//! let mut frontend = HeadlessFrontend::new(InterruptFlag::new());
//! CaptureLoop::from_config(&config).run(&mut *active, &mut frontend, "dataset".as_ref())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backends;
pub mod capture;
pub mod config;
pub mod constants;
pub mod dataset;
pub mod errors;
pub mod terminal;

// Re-export commonly used types
pub use capture::{CaptureLoop, CaptureSummary, Termination};
pub use config::{CaptureConfig, WritePolicy};
pub use errors::{CaptureError, SensorError};
