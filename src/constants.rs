// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Depth scale factor applied to raw sensor depth before writing
///
/// Raw depth arrives in millimetres; the TUM RGB-D format stores 5000 units
/// per metre, so each millimetre becomes 5 units.
pub const DEFAULT_DEPTH_SCALE: f64 = 5.0;

/// First frame index written to a new dataset
pub const DEFAULT_START_INDEX: u64 = 2;

/// Exposure offset applied to the color stream relative to its auto-exposure value
pub const DEFAULT_EXPOSURE_BIAS: i32 = 100;

/// Mirror both streams horizontally (front-facing sensor orientation)
pub const DEFAULT_MIRROR: bool = true;

/// Default stream resolution and rate for both color and depth
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const DEFAULT_FPS: u32 = 30;

/// Bounded wait for the cancellation poll after each iteration
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How long a blocking frame read waits before reporting an invalid frame
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Number of kernel buffers queued per V4L2 stream
pub const V4L2_BUFFER_COUNT: u32 = 4;

/// Dataset directory layout
pub mod dataset {
    /// Subdirectory holding color PNGs
    pub const RGB_DIR: &str = "rgb";
    /// Subdirectory holding depth PNGs
    pub const DEPTH_DIR: &str = "depth";
    /// Color index file
    pub const RGB_INDEX: &str = "rgb.txt";
    /// Depth index file
    pub const DEPTH_INDEX: &str = "depth.txt";
    /// Ground-truth pose index file
    pub const GROUNDTRUTH_INDEX: &str = "groundtruth.txt";
    /// Identity pose: translation (0, 0, 0), rotation quaternion (0, 0, 0, 1)
    pub const IDENTITY_POSE: &str = "0 0 0 0 0 0 1";
    /// Image file extension for both modalities
    pub const IMAGE_EXTENSION: &str = "png";
    /// Folder under the home directory used when no output root is given
    pub const DEFAULT_ROOT_FOLDER: &str = "RGBD";
    /// Log file written into the output root while the terminal preview is active
    pub const LOG_FILE: &str = "capture.log";
}

/// Depth preview rendering
pub mod depth_preview {
    /// Range used when auto-ranging finds no spread of valid pixels
    pub const FALLBACK_RANGE: (u16, u16) = (0, 20000);
}
