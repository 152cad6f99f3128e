// SPDX-License-Identifier: GPL-3.0-only

//! Capture configuration
//!
//! Depth scale, requested video modes, exposure bias, mirroring and the
//! other knobs of a capture run. Values come from [`CaptureConfig::default`],
//! optionally overlaid by a JSON file, then by command-line flags.

use crate::backends::sensor::types::{PixelFormat, SensorBackendType, VideoMode};
use crate::constants;
use crate::errors::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What to do with the color frame of an iteration whose depth read fails
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// Write color as soon as it is read; a depth failure leaves an orphaned color entry
    #[default]
    Immediate,
    /// Hold color until depth for the same iteration succeeds
    Paired,
}

/// Desired video mode for one stream, resolved against the modes the device reports
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct StreamRequest {
    pub width: u32,
    pub height: u32,
    /// Integer framerate; `None` accepts any rate
    pub fps: Option<u32>,
    /// Pixel encoding; `None` accepts any encoding the backend can convert
    pub pixel_format: Option<PixelFormat>,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            width: constants::DEFAULT_WIDTH,
            height: constants::DEFAULT_HEIGHT,
            fps: Some(constants::DEFAULT_FPS),
            pixel_format: None,
        }
    }
}

impl StreamRequest {
    /// Check whether a device mode satisfies this request
    pub fn matches(&self, mode: &VideoMode) -> bool {
        mode.width == self.width
            && mode.height == self.height
            && self.fps.is_none_or(|fps| mode.framerate.matches_int(fps))
            && self.pixel_format.is_none_or(|pf| mode.pixel_format == pf)
    }

    /// First mode in device-reported order that satisfies the request
    pub fn resolve(&self, modes: &[VideoMode]) -> Option<VideoMode> {
        modes.iter().find(|mode| self.matches(mode)).copied()
    }
}

impl std::fmt::Display for StreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)?;
        if let Some(pixel_format) = self.pixel_format {
            write!(f, " {}", pixel_format)?;
        }
        if let Some(fps) = self.fps {
            write!(f, " @ {}fps", fps)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Sensor backend to open
    pub backend: SensorBackendType,
    /// Pin the V4L2 node of the color stream instead of auto-discovery
    pub color_device: Option<String>,
    /// Pin the V4L2 node of the depth stream instead of auto-discovery
    pub depth_device: Option<String>,
    /// Requested color mode
    pub color: StreamRequest,
    /// Requested depth mode
    pub depth: StreamRequest,
    /// First frame index of the dataset
    pub start_index: u64,
    /// Multiplier applied to raw depth before writing
    pub depth_scale: f64,
    /// Flip both streams horizontally
    pub mirror: bool,
    /// Exposure offset for the color stream; `None` leaves auto exposure alone
    pub exposure_bias: Option<i32>,
    /// Orphan handling when a depth read fails
    pub write_policy: WritePolicy,
    /// Stop after this many completed frames
    pub max_frames: Option<u64>,
    /// Blocking read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Cancellation poll wait in milliseconds
    pub cancel_poll_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: SensorBackendType::default(),
            color_device: None,
            depth_device: None,
            color: StreamRequest::default(),
            depth: StreamRequest::default(),
            start_index: constants::DEFAULT_START_INDEX,
            depth_scale: constants::DEFAULT_DEPTH_SCALE,
            mirror: constants::DEFAULT_MIRROR,
            exposure_bias: Some(constants::DEFAULT_EXPOSURE_BIAS),
            write_policy: WritePolicy::default(),
            max_frames: None,
            read_timeout_ms: constants::DEFAULT_READ_TIMEOUT.as_millis() as u64,
            cancel_poll_ms: constants::CANCEL_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl CaptureConfig {
    /// Load a configuration file, filling unspecified fields with defaults
    pub fn load(path: &Path) -> CaptureResult<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| CaptureError::io(path, e))?;
        let config: CaptureConfig = serde_json::from_str(&contents)
            .map_err(|e| CaptureError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the capture loop cannot work with
    pub fn validate(&self) -> CaptureResult<()> {
        if !self.depth_scale.is_finite() || self.depth_scale <= 0.0 {
            return Err(CaptureError::Config(format!(
                "depth_scale must be a positive number, got {}",
                self.depth_scale
            )));
        }

        for (name, request) in [("color", &self.color), ("depth", &self.depth)] {
            if request.width == 0 || request.height == 0 {
                return Err(CaptureError::Config(format!(
                    "{} resolution must be non-zero, got {}x{}",
                    name, request.width, request.height
                )));
            }
        }

        if self.color.pixel_format.is_some_and(|pf| pf.is_depth()) {
            return Err(CaptureError::Config(
                "color pixel_format must be a color encoding".to_string(),
            ));
        }
        if self.depth.pixel_format.is_some_and(|pf| !pf.is_depth()) {
            return Err(CaptureError::Config(
                "depth pixel_format must be a depth encoding".to_string(),
            ));
        }

        if self.max_frames == Some(0) {
            return Err(CaptureError::Config(
                "max_frames must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn cancel_poll(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capture_settings() {
        let config = CaptureConfig::default();
        assert_eq!(config.start_index, 2);
        assert_eq!(config.depth_scale, 5.0);
        assert!(config.mirror);
        assert_eq!(config.exposure_bias, Some(100));
        assert_eq!(config.write_policy, WritePolicy::Immediate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CaptureConfig =
            serde_json::from_str(r#"{ "start_index": 0, "write_policy": "paired" }"#).unwrap();
        assert_eq!(config.start_index, 0);
        assert_eq!(config.write_policy, WritePolicy::Paired);
        assert_eq!(config.depth_scale, constants::DEFAULT_DEPTH_SCALE);
        assert_eq!(config.color.width, constants::DEFAULT_WIDTH);
    }

    #[test]
    fn test_validate_rejects_bad_scale() {
        let config = CaptureConfig {
            depth_scale: 0.0,
            ..CaptureConfig::default()
        };
        assert!(matches!(config.validate(), Err(CaptureError::Config(_))));

        let config = CaptureConfig {
            depth_scale: f64::NAN,
            ..CaptureConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_swapped_encodings() {
        let mut config = CaptureConfig::default();
        config.color.pixel_format = Some(PixelFormat::Depth16);
        assert!(config.validate().is_err());

        let mut config = CaptureConfig::default();
        config.depth.pixel_format = Some(PixelFormat::Rgb24);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_picks_first_match_in_device_order() {
        let modes = [
            VideoMode::new(320, 240, PixelFormat::Rgb24, 30),
            VideoMode::new(640, 480, PixelFormat::Yuyv, 30),
            VideoMode::new(640, 480, PixelFormat::Rgb24, 30),
        ];
        let request = StreamRequest::default();
        assert_eq!(request.resolve(&modes), Some(modes[1]));

        let request = StreamRequest {
            pixel_format: Some(PixelFormat::Rgb24),
            ..StreamRequest::default()
        };
        assert_eq!(request.resolve(&modes), Some(modes[2]));
    }

    #[test]
    fn test_resolve_without_match() {
        let modes = [VideoMode::new(640, 480, PixelFormat::Rgb24, 60)];
        assert_eq!(StreamRequest::default().resolve(&modes), None);

        let any_rate = StreamRequest {
            fps: None,
            ..StreamRequest::default()
        };
        assert_eq!(any_rate.resolve(&modes), Some(modes[0]));
    }
}
