// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for sensor backends

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The two streams of an RGB-D sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Depth,
    Color,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Depth, StreamKind::Color];
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Depth => write!(f, "depth"),
            StreamKind::Color => write!(f, "color"),
        }
    }
}

/// Framerate as a fraction (numerator/denominator)
/// Stores exact framerate to handle NTSC rates like 59.94fps (60000/1001)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    /// Create a new framerate from numerator and denominator
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    /// Create a framerate from an integer (e.g., 30 becomes 30/1)
    pub fn from_int(fps: u32) -> Self {
        Self { num: fps, denom: 1 }
    }

    /// Build from a V4L2 frame interval (seconds per frame, so the fraction is inverted)
    pub fn from_interval(numerator: u32, denominator: u32) -> Self {
        Self::new(denominator, numerator)
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// Integer part of the framerate
    pub fn as_int(&self) -> u32 {
        self.num / self.denom
    }

    /// True if the integer part matches (59.94fps matches 59)
    pub fn matches_int(&self, fps: u32) -> bool {
        self.as_int() == fps
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.denom != 1 {
            write!(f, "{:.2}", self.as_f64())
        } else {
            write!(f, "{}", self.num)
        }
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self { num: 30, denom: 1 }
    }
}

/// Pixel encodings a sensor stream can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 24-bit RGB, 3 bytes per pixel
    Rgb24,
    /// 24-bit BGR, 3 bytes per pixel
    Bgr24,
    /// Packed 4:2:2 (Y0 U Y1 V)
    Yuyv,
    /// Packed 4:2:2 (U Y0 V Y1)
    Uyvy,
    /// Motion JPEG, one compressed image per frame
    Mjpeg,
    /// 16-bit little-endian depth in millimetres (V4L2 Z16)
    Depth16,
    /// 16-bit little-endian greyscale, used by kernel depth drivers for depth
    Y16,
    /// 10-bit packed depth, 4 pixels in 5 bytes
    Y10B,
}

impl PixelFormat {
    /// True for encodings produced by depth streams
    pub fn is_depth(&self) -> bool {
        matches!(self, Self::Depth16 | Self::Y16 | Self::Y10B)
    }

    /// FourCC code used by V4L2
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            Self::Rgb24 => *b"RGB3",
            Self::Bgr24 => *b"BGR3",
            Self::Yuyv => *b"YUYV",
            Self::Uyvy => *b"UYVY",
            Self::Mjpeg => *b"MJPG",
            Self::Depth16 => *b"Z16 ",
            Self::Y16 => *b"Y16 ",
            Self::Y10B => *b"Y10B",
        }
    }

    /// Parse a FourCC code
    ///
    /// Every accepted code maps back to itself through [`Self::fourcc`], so
    /// a mode enumerated from a device is requested with the code it was
    /// listed under.
    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"RGB3" => Some(Self::Rgb24),
            b"BGR3" => Some(Self::Bgr24),
            b"YUYV" => Some(Self::Yuyv),
            b"UYVY" => Some(Self::Uyvy),
            b"MJPG" => Some(Self::Mjpeg),
            b"Z16 " => Some(Self::Depth16),
            b"Y16 " => Some(Self::Y16),
            b"Y10B" => Some(Self::Y10B),
            _ => None,
        }
    }

    /// Expected payload size of one uncompressed frame, `None` for compressed encodings
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            Self::Rgb24 | Self::Bgr24 => Some(pixels * 3),
            Self::Yuyv | Self::Uyvy | Self::Depth16 | Self::Y16 => Some(pixels * 2),
            Self::Y10B => Some(pixels.div_ceil(4) * 5),
            Self::Mjpeg => None,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.fourcc();
        write!(f, "{}", String::from_utf8_lossy(&code).trim_end())
    }
}

/// A (resolution, pixel format, frame rate) tuple a stream can be configured to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoMode {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub framerate: Framerate,
}

impl VideoMode {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat, fps: u32) -> Self {
        Self {
            width,
            height,
            pixel_format,
            framerate: Framerate::from_int(fps),
        }
    }
}

impl std::fmt::Display for VideoMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} {} @ {}fps",
            self.width, self.height, self.pixel_format, self.framerate
        )
    }
}

/// Identification of an opened device
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    /// Human readable name
    pub name: String,
    /// Driver name
    pub driver: String,
    /// Node of the color stream (e.g., /dev/video0)
    pub color_path: String,
    /// Node of the depth stream
    pub depth_path: String,
}

/// A single frame pulled from a stream
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub stream: StreamKind,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Payload in the stream's native encoding
    pub data: Arc<[u8]>,
}

/// Sensor backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SensorBackendType {
    /// Video4Linux2 device nodes
    V4l2,
    /// Generated frames, no hardware required
    Synthetic,
}

impl Default for SensorBackendType {
    fn default() -> Self {
        if cfg!(all(target_os = "linux", feature = "v4l2")) {
            SensorBackendType::V4l2
        } else {
            SensorBackendType::Synthetic
        }
    }
}

impl std::fmt::Display for SensorBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorBackendType::V4l2 => write!(f, "v4l2"),
            SensorBackendType::Synthetic => write!(f, "synthetic"),
        }
    }
}
