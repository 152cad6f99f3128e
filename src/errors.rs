// SPDX-License-Identifier: GPL-3.0-only

//! Error types for sensor sessions and the capture loop

use crate::backends::sensor::types::StreamKind;
use std::fmt;
use std::path::PathBuf;

/// Result type alias for sensor session operations
pub type SensorResult<T> = Result<T, SensorError>;

/// Result type alias for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Errors reported by a sensor backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// No device found, or the device could not be opened
    DeviceUnavailable(String),
    /// The device has no sensor of the requested kind
    NoSuchSensor(StreamKind),
    /// The stream has not been created (or was already destroyed)
    StreamNotCreated(StreamKind),
    /// Requested video mode is not in the supported list
    UnsupportedMode { stream: StreamKind, requested: String },
    /// Stream was created but could not be started
    StreamStart { stream: StreamKind, reason: String },
    /// Stream is not running (stopped, destroyed or never started)
    StreamStopped(StreamKind),
    /// No frame arrived within the read timeout
    Timeout(StreamKind),
    /// The device went away mid-stream
    Disconnected { stream: StreamKind, reason: String },
    /// A frame arrived but its payload does not match the active mode
    MalformedFrame { stream: StreamKind, reason: String },
    /// Camera control not available on this device
    ControlUnsupported(String),
    /// Other backend errors
    Backend(String),
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::DeviceUnavailable(msg) => write!(f, "Device unavailable: {}", msg),
            SensorError::NoSuchSensor(stream) => {
                write!(f, "This device does not have a {} sensor", stream)
            }
            SensorError::StreamNotCreated(stream) => {
                write!(f, "The {} stream has not been created", stream)
            }
            SensorError::UnsupportedMode { stream, requested } => {
                write!(f, "Unsupported {} mode: {}", stream, requested)
            }
            SensorError::StreamStart { stream, reason } => {
                write!(f, "Can't start {} stream: {}", stream, reason)
            }
            SensorError::StreamStopped(stream) => write!(f, "The {} stream is not running", stream),
            SensorError::Timeout(stream) => write!(f, "Timed out waiting for a {} frame", stream),
            SensorError::Disconnected { stream, reason } => {
                write!(f, "The {} stream disconnected: {}", stream, reason)
            }
            SensorError::MalformedFrame { stream, reason } => {
                write!(f, "Malformed {} frame: {}", stream, reason)
            }
            SensorError::ControlUnsupported(msg) => write!(f, "Control not supported: {}", msg),
            SensorError::Backend(msg) => write!(f, "Sensor backend error: {}", msg),
        }
    }
}

impl std::error::Error for SensorError {}

/// Errors reported by session initialization and the capture loop
#[derive(Debug)]
pub enum CaptureError {
    /// Device or stream setup failed; the session never started
    Initialization(String),
    /// A stream failed after being created; the session never started
    StreamStart(SensorError),
    /// A frame read returned no valid frame
    ReadFailure {
        stream: StreamKind,
        frame_index: u64,
        source: SensorError,
    },
    /// An index or image file could not be created or written
    Io {
        path: Option<PathBuf>,
        source: std::io::Error,
    },
    /// Image encoding failed
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    /// Invalid configuration
    Config(String),
}

impl CaptureError {
    /// Wrap an I/O error with the path it relates to
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CaptureError::Io {
            path: Some(path.into()),
            source,
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Initialization(msg) => write!(f, "Initialization failed: {}", msg),
            CaptureError::StreamStart(e) => write!(f, "{}", e),
            CaptureError::ReadFailure {
                stream,
                frame_index,
                source,
            } => write!(
                f,
                "Cannot read {} frame at index {}: {}",
                stream, frame_index, source
            ),
            CaptureError::Io {
                path: Some(path),
                source,
            } => write!(f, "I/O error on {}: {}", path.display(), source),
            CaptureError::Io { path: None, source } => write!(f, "I/O error: {}", source),
            CaptureError::Image { path, source } => {
                write!(f, "Failed to write image {}: {}", path.display(), source)
            }
            CaptureError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CaptureError::StreamStart(e) => Some(e),
            CaptureError::ReadFailure { source, .. } => Some(source),
            CaptureError::Io { source, .. } => Some(source),
            CaptureError::Image { source, .. } => Some(source),
            CaptureError::Initialization(_) | CaptureError::Config(_) => None,
        }
    }
}

impl From<SensorError> for CaptureError {
    fn from(err: SensorError) -> Self {
        match err {
            SensorError::StreamStart { .. } => CaptureError::StreamStart(err),
            other => CaptureError::Initialization(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Io {
            path: None,
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_start_keeps_its_kind() {
        let err: CaptureError = SensorError::StreamStart {
            stream: StreamKind::Depth,
            reason: "busy".to_string(),
        }
        .into();
        assert!(matches!(err, CaptureError::StreamStart(_)));
        assert_eq!(err.to_string(), "Can't start depth stream: busy");
    }

    #[test]
    fn test_other_sensor_errors_become_initialization() {
        let err: CaptureError = SensorError::DeviceUnavailable("no device".to_string()).into();
        assert!(matches!(err, CaptureError::Initialization(_)));
    }

    #[test]
    fn test_no_such_sensor_message() {
        let err = SensorError::NoSuchSensor(StreamKind::Color);
        assert_eq!(err.to_string(), "This device does not have a color sensor");
    }
}
