// SPDX-License-Identifier: GPL-3.0-only

//! RGB-D sensor backend abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │    Capture Loop     │
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │    ActiveSensor     │  ← Scoped ownership, stop → destroy → close on drop
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ SensorSession Trait │  ← Common interface
//! └──────────┬──────────┘
//!            │
//!       ┌────┴──────┐
//!       ▼           ▼
//!   ┌──────┐  ┌───────────┐
//!   │ V4L2 │  │ Synthetic │
//!   └──────┘  └───────────┘
//! ```

pub mod format_converters;
pub mod session;
pub mod synthetic;
pub mod types;
#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub mod v4l2;
#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub mod v4l2_controls;

pub use session::ActiveSensor;
pub use types::*;

use crate::config::CaptureConfig;
use crate::errors::{SensorError, SensorResult};

/// One opened RGB-D device with a depth stream and a color stream
///
/// Streams move through create → configure → start → read → stop → destroy.
/// `stop` and `destroy` on a stream that is not in the matching state are no-ops,
/// so teardown can be issued unconditionally.
pub trait SensorSession {
    // ===== Device =====

    /// Identification of the opened device
    fn device_info(&self) -> &DeviceInfo;

    /// Supported video modes of a stream, in the order the device reports them
    fn list_supported_modes(&self, stream: StreamKind) -> SensorResult<Vec<VideoMode>>;

    /// Release the device
    ///
    /// All streams must have been stopped and destroyed first.
    fn close(&mut self);

    // ===== Stream lifecycle =====

    /// Acquire the stream handle
    ///
    /// # Returns
    /// * `Err(SensorError::NoSuchSensor)` - The device has no sensor of this kind
    fn create_stream(&mut self, stream: StreamKind) -> SensorResult<()>;

    /// Select one of the supported modes
    ///
    /// # Returns
    /// * `Err(SensorError::UnsupportedMode)` - `mode` is not in the supported list
    fn configure_stream(&mut self, stream: StreamKind, mode: &VideoMode) -> SensorResult<()>;

    /// Mode the stream will produce (the configured one, or the device default)
    fn current_mode(&self, stream: StreamKind) -> Option<VideoMode>;

    /// Start delivering frames
    ///
    /// # Returns
    /// * `Err(SensorError::StreamStart)` - The hardware path could not be opened
    fn start(&mut self, stream: StreamKind) -> SensorResult<()>;

    /// Stop delivering frames
    fn stop(&mut self, stream: StreamKind);

    /// Release the stream handle
    fn destroy(&mut self, stream: StreamKind);

    /// True when the stream is created and started
    fn is_stream_valid(&self, stream: StreamKind) -> bool;

    // ===== Frames =====

    /// Block until the next frame of `stream` is available
    ///
    /// An error is the "invalid frame": the stream was stopped, disconnected,
    /// timed out, or delivered a payload that does not match its mode.
    fn read_frame(&mut self, stream: StreamKind) -> SensorResult<RawFrame>;

    // ===== Controls =====

    /// Offset the color stream's exposure from its auto-exposure value
    ///
    /// Disables auto white balance as a side effect.
    ///
    /// # Returns
    /// * `Err(SensorError::ControlUnsupported)` - The device has no exposure control
    fn set_exposure_bias(&mut self, delta: i32) -> SensorResult<()>;
}

/// Discover and open a device on the configured backend
pub fn open_session(config: &CaptureConfig) -> SensorResult<Box<dyn SensorSession>> {
    match config.backend {
        SensorBackendType::Synthetic => {
            let sensor = synthetic::SyntheticSensor::open(synthetic::SyntheticConfig {
                realtime: true,
                ..synthetic::SyntheticConfig::default()
            })?;
            Ok(Box::new(sensor))
        }
        SensorBackendType::V4l2 => open_v4l2(config),
    }
}

#[cfg(all(target_os = "linux", feature = "v4l2"))]
fn open_v4l2(config: &CaptureConfig) -> SensorResult<Box<dyn SensorSession>> {
    let sensor = v4l2::V4l2Sensor::open(
        config.color_device.as_deref(),
        config.depth_device.as_deref(),
        config.read_timeout(),
    )?;
    Ok(Box::new(sensor))
}

#[cfg(not(all(target_os = "linux", feature = "v4l2")))]
fn open_v4l2(_config: &CaptureConfig) -> SensorResult<Box<dyn SensorSession>> {
    Err(SensorError::DeviceUnavailable(
        "built without V4L2 support (enable the `v4l2` feature)".to_string(),
    ))
}
