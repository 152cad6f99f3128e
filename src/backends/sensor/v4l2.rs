// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 RGB-D backend
//!
//! An RGB-D sensor shows up as two video nodes on the same bus, one
//! delivering a depth encoding (Z16, Y16 or Y10B) and one delivering color.
//! Each stream is driven synchronously through a memory-mapped buffer queue;
//! `read_frame` blocks on the kernel until a buffer is ready or the read
//! timeout elapses.

use super::format_converters::frame_from_bytes;
use super::{
    DeviceInfo, Framerate, PixelFormat, RawFrame, SensorSession, StreamKind, VideoMode,
    v4l2_controls,
};
use crate::constants::V4L2_BUFFER_COUNT;
use crate::errors::{SensorError, SensorResult};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Device, Format, FourCC};

/// A video node and what it can deliver
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub path: String,
    pub card: String,
    pub driver: String,
    pub bus_info: String,
    pub has_depth: bool,
    pub has_color: bool,
}

/// Probe one video node
fn probe_node(path: &str) -> Option<NodeInfo> {
    let dev = Device::with_path(path).ok()?;
    let caps = dev.query_caps().ok()?;
    let formats: Vec<PixelFormat> = dev
        .enum_formats()
        .into_iter()
        .flatten()
        .filter_map(|desc| PixelFormat::from_fourcc(&desc.fourcc.repr))
        .collect();

    Some(NodeInfo {
        path: path.to_string(),
        card: caps.card,
        driver: caps.driver,
        bus_info: caps.bus,
        has_depth: formats.iter().any(|f| f.is_depth()),
        has_color: formats.iter().any(|f| !f.is_depth()),
    })
}

/// Scan /dev/video* for capture nodes with a usable encoding
pub fn enumerate_nodes() -> Vec<NodeInfo> {
    let mut paths: Vec<String> = std::fs::read_dir("/dev")
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            name.starts_with("video").then(|| e.path().to_string_lossy().to_string())
        })
        .collect();
    paths.sort_by_key(|p| {
        p.trim_start_matches("/dev/video")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    paths
        .iter()
        .filter_map(|path| probe_node(path))
        .filter(|node| node.has_depth || node.has_color)
        .inspect(|node| {
            debug!(
                path = %node.path,
                card = %node.card,
                bus_info = %node.bus_info,
                depth = node.has_depth,
                color = node.has_color,
                "Found video node"
            );
        })
        .collect()
}

/// Pair a depth node with a color node on the same bus
///
/// Returns `(color, depth)`. A depth node that also offers color encodings is
/// never used as the color node.
pub fn find_rgbd_pair(nodes: &[NodeInfo]) -> Option<(NodeInfo, NodeInfo)> {
    let mut by_bus: HashMap<&str, Vec<&NodeInfo>> = HashMap::new();
    for node in nodes {
        by_bus.entry(node.bus_info.as_str()).or_default().push(node);
    }

    nodes.iter().filter(|n| n.has_depth).find_map(|depth| {
        by_bus
            .get(depth.bus_info.as_str())?
            .iter()
            .find(|n| n.has_color && !n.has_depth && n.path != depth.path)
            .map(|color| ((*color).clone(), depth.clone()))
    })
}

/// Enumerate the modes a node reports for one stream kind
///
/// Only discrete sizes are listed. Stepwise intervals contribute their
/// fastest rate.
fn enumerate_modes(dev: &Device, kind: StreamKind) -> Vec<VideoMode> {
    let mut modes = Vec::new();

    for desc in dev.enum_formats().into_iter().flatten() {
        let Some(pixel_format) = PixelFormat::from_fourcc(&desc.fourcc.repr) else {
            continue;
        };
        if pixel_format.is_depth() != (kind == StreamKind::Depth) {
            continue;
        }

        for size in dev.enum_framesizes(desc.fourcc).into_iter().flatten() {
            let FrameSizeEnum::Discrete(discrete) = size.size else {
                debug!(fourcc = %pixel_format, "Skipping stepwise frame size");
                continue;
            };

            let intervals = dev
                .enum_frameintervals(desc.fourcc, discrete.width, discrete.height)
                .unwrap_or_default();
            for interval in intervals {
                let framerate = match interval.interval {
                    FrameIntervalEnum::Discrete(frac) => {
                        Framerate::from_interval(frac.numerator, frac.denominator)
                    }
                    FrameIntervalEnum::Stepwise(step) => {
                        Framerate::from_interval(step.min.numerator, step.min.denominator)
                    }
                };
                modes.push(VideoMode {
                    width: discrete.width,
                    height: discrete.height,
                    pixel_format,
                    framerate,
                });
            }
        }
    }

    modes
}

struct V4l2Stream {
    kind: StreamKind,
    path: Option<String>,
    modes: Vec<VideoMode>,
    device: Option<Device>,
    mode: Option<VideoMode>,
    stream: Option<Stream<'static>>,
}

impl V4l2Stream {
    fn new(kind: StreamKind, path: Option<String>) -> Self {
        let modes = path
            .as_deref()
            .and_then(|p| Device::with_path(p).ok())
            .map(|dev| enumerate_modes(&dev, kind))
            .unwrap_or_default();
        Self {
            kind,
            path,
            modes,
            device: None,
            mode: None,
            stream: None,
        }
    }

    /// Mode the device is currently set to, if it is one we can decode
    fn device_mode(&self, dev: &Device) -> Option<VideoMode> {
        let format = dev.format().ok()?;
        let framerate = dev
            .params()
            .map(|p| Framerate::from_interval(p.interval.numerator, p.interval.denominator))
            .unwrap_or_default();
        mode_from_format(self.kind, &format, framerate)
    }
}

/// Decodable mode described by a device format
fn mode_from_format(kind: StreamKind, format: &Format, framerate: Framerate) -> Option<VideoMode> {
    let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr)?;
    if pixel_format.is_depth() != (kind == StreamKind::Depth) {
        return None;
    }
    Some(VideoMode {
        width: format.width,
        height: format.height,
        pixel_format,
        framerate,
    })
}

/// True if the driver accepted `mode` without adjusting it
fn format_matches(format: &Format, mode: &VideoMode) -> bool {
    format.width == mode.width
        && format.height == mode.height
        && format.fourcc == FourCC::new(&mode.pixel_format.fourcc())
}

fn request_format(dev: &Device, mode: &VideoMode) -> std::io::Result<Format> {
    let fourcc = FourCC::new(&mode.pixel_format.fourcc());
    dev.set_format(&Format::new(mode.width, mode.height, fourcc))
}

pub struct V4l2Sensor {
    info: DeviceInfo,
    color: V4l2Stream,
    depth: V4l2Stream,
    read_timeout: Duration,
}

impl V4l2Sensor {
    /// Open an RGB-D device
    ///
    /// Nodes given explicitly are used as-is; otherwise the first depth node
    /// with a color sibling on the same bus is picked.
    pub fn open(
        color_path: Option<&str>,
        depth_path: Option<&str>,
        read_timeout: Duration,
    ) -> SensorResult<Self> {
        let (color, depth) = match (color_path, depth_path) {
            (Some(color), Some(depth)) => (
                probe_node(color).ok_or_else(|| {
                    SensorError::DeviceUnavailable(format!("cannot open {}", color))
                })?,
                probe_node(depth).ok_or_else(|| {
                    SensorError::DeviceUnavailable(format!("cannot open {}", depth))
                })?,
            ),
            (pinned_color, pinned_depth) => {
                let nodes = enumerate_nodes();
                let (found_color, found_depth) = find_rgbd_pair(&nodes).ok_or_else(|| {
                    SensorError::DeviceUnavailable(
                        "no RGB-D device found (need a depth and a color node on the same bus)"
                            .to_string(),
                    )
                })?;
                let color = match pinned_color {
                    Some(path) => probe_node(path).ok_or_else(|| {
                        SensorError::DeviceUnavailable(format!("cannot open {}", path))
                    })?,
                    None => found_color,
                };
                let depth = match pinned_depth {
                    Some(path) => probe_node(path).ok_or_else(|| {
                        SensorError::DeviceUnavailable(format!("cannot open {}", path))
                    })?,
                    None => found_depth,
                };
                (color, depth)
            }
        };

        info!(
            card = %depth.card,
            color_path = %color.path,
            depth_path = %depth.path,
            "Opened V4L2 RGB-D device"
        );

        Ok(Self {
            info: DeviceInfo {
                name: depth.card.clone(),
                driver: depth.driver.clone(),
                color_path: color.path.clone(),
                depth_path: depth.path.clone(),
            },
            color: V4l2Stream::new(StreamKind::Color, color.has_color.then_some(color.path)),
            depth: V4l2Stream::new(StreamKind::Depth, depth.has_depth.then_some(depth.path)),
            read_timeout,
        })
    }

    fn stream(&self, kind: StreamKind) -> &V4l2Stream {
        match kind {
            StreamKind::Color => &self.color,
            StreamKind::Depth => &self.depth,
        }
    }

    fn stream_mut(&mut self, kind: StreamKind) -> &mut V4l2Stream {
        match kind {
            StreamKind::Color => &mut self.color,
            StreamKind::Depth => &mut self.depth,
        }
    }
}

impl SensorSession for V4l2Sensor {
    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn list_supported_modes(&self, stream: StreamKind) -> SensorResult<Vec<VideoMode>> {
        let state = self.stream(stream);
        if state.path.is_none() {
            return Err(SensorError::NoSuchSensor(stream));
        }
        Ok(state.modes.clone())
    }

    fn close(&mut self) {
        for kind in StreamKind::ALL {
            self.destroy(kind);
        }
        debug!(device = %self.info.name, "V4L2 device closed");
    }

    fn create_stream(&mut self, stream: StreamKind) -> SensorResult<()> {
        let state = self.stream_mut(stream);
        let path = state.path.clone().ok_or(SensorError::NoSuchSensor(stream))?;
        let dev = Device::with_path(&path)
            .map_err(|e| SensorError::DeviceUnavailable(format!("{}: {}", path, e)))?;

        state.mode = state.device_mode(&dev);
        if state.mode.is_none() {
            state.mode = state.modes.first().copied();
        }
        state.device = Some(dev);
        debug!(stream = %stream, path = %path, default_mode = ?state.mode, "Stream created");
        Ok(())
    }

    fn configure_stream(&mut self, stream: StreamKind, mode: &VideoMode) -> SensorResult<()> {
        let state = self.stream_mut(stream);
        let dev = state
            .device
            .as_ref()
            .ok_or(SensorError::StreamNotCreated(stream))?;
        let unsupported = || SensorError::UnsupportedMode {
            stream,
            requested: mode.to_string(),
        };

        if !state.modes.contains(mode) {
            return Err(unsupported());
        }

        let accepted = match request_format(dev, mode) {
            Ok(actual) => format_matches(&actual, mode),
            Err(e) => {
                warn!(stream = %stream, error = %e, "VIDIOC_S_FMT failed");
                false
            }
        };
        if !accepted {
            // S_FMT may have switched the device to whatever it could offer instead
            if let Some(previous) = state.mode
                && let Err(e) = request_format(dev, &previous)
            {
                warn!(stream = %stream, error = %e, "Cannot restore previous format");
            }
            state.mode = state.device_mode(dev);
            debug!(stream = %stream, mode = ?state.mode, "Device format after rejected request");
            return Err(unsupported());
        }

        if let Err(e) = dev.set_params(&Parameters::with_fps(mode.framerate.as_int())) {
            warn!(stream = %stream, error = %e, "Failed to set frame rate");
        }

        state.mode = Some(*mode);
        Ok(())
    }

    fn current_mode(&self, stream: StreamKind) -> Option<VideoMode> {
        self.stream(stream).mode
    }

    fn start(&mut self, stream: StreamKind) -> SensorResult<()> {
        let read_timeout = self.read_timeout;
        let state = self.stream_mut(stream);
        let dev = state
            .device
            .as_ref()
            .ok_or(SensorError::StreamNotCreated(stream))?;
        if state.mode.is_none() {
            return Err(SensorError::StreamStart {
                stream,
                reason: "device is set to an encoding that cannot be decoded".to_string(),
            });
        }

        let mut mmap = Stream::with_buffers(dev, Type::VideoCapture, V4L2_BUFFER_COUNT)
            .map_err(|e| SensorError::StreamStart {
                stream,
                reason: e.to_string(),
            })?;
        mmap.set_timeout(read_timeout);
        state.stream = Some(mmap);
        Ok(())
    }

    fn stop(&mut self, stream: StreamKind) {
        if self.stream_mut(stream).stream.take().is_some() {
            debug!(stream = %stream, "Stream stopped");
        }
    }

    fn destroy(&mut self, stream: StreamKind) {
        self.stop(stream);
        let state = self.stream_mut(stream);
        if state.device.take().is_some() {
            state.mode = None;
            debug!(stream = %stream, "Stream destroyed");
        }
    }

    fn is_stream_valid(&self, stream: StreamKind) -> bool {
        let state = self.stream(stream);
        state.device.is_some() && state.stream.is_some()
    }

    fn read_frame(&mut self, stream: StreamKind) -> SensorResult<RawFrame> {
        let state = self.stream_mut(stream);
        let mode = state.mode.ok_or(SensorError::StreamStopped(stream))?;
        let mmap = state
            .stream
            .as_mut()
            .ok_or(SensorError::StreamStopped(stream))?;

        let (buf, meta) = mmap.next().map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                SensorError::Timeout(stream)
            }
            _ => SensorError::Disconnected {
                stream,
                reason: e.to_string(),
            },
        })?;

        let used = (meta.bytesused as usize).min(buf.len());
        let payload = if used > 0 { &buf[..used] } else { buf };

        Ok(frame_from_bytes(
            stream,
            mode.width,
            mode.height,
            mode.pixel_format,
            payload.to_vec(),
        ))
    }

    fn set_exposure_bias(&mut self, delta: i32) -> SensorResult<()> {
        let path = self
            .color
            .path
            .clone()
            .ok_or(SensorError::NoSuchSensor(StreamKind::Color))?;
        v4l2_controls::apply_exposure_bias(&path, delta).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(path: &str, bus: &str, has_depth: bool, has_color: bool) -> NodeInfo {
        NodeInfo {
            path: path.to_string(),
            card: "Test".to_string(),
            driver: "test".to_string(),
            bus_info: bus.to_string(),
            has_depth,
            has_color,
        }
    }

    #[test]
    fn test_pairs_nodes_on_same_bus() {
        let nodes = vec![
            node("/dev/video0", "usb-1", false, true),
            node("/dev/video2", "usb-2", false, true),
            node("/dev/video3", "usb-2", true, false),
        ];
        let (color, depth) = find_rgbd_pair(&nodes).unwrap();
        assert_eq!(color.path, "/dev/video2");
        assert_eq!(depth.path, "/dev/video3");
    }

    #[test]
    fn test_y16_mode_is_requested_as_y16() {
        let mode = VideoMode::new(640, 480, PixelFormat::Y16, 30);
        let accepted = Format::new(640, 480, FourCC::new(b"Y16 "));
        assert!(format_matches(&accepted, &mode));
        assert!(!format_matches(&Format::new(640, 480, FourCC::new(b"Z16 ")), &mode));
    }

    #[test]
    fn test_adjusted_format_is_read_back() {
        // Driver answered a Y16 request with Y10B at another height
        let adjusted = Format::new(640, 488, FourCC::new(b"Y10B"));
        let requested = VideoMode::new(640, 480, PixelFormat::Y16, 30);
        assert!(!format_matches(&adjusted, &requested));

        let mode = mode_from_format(StreamKind::Depth, &adjusted, Framerate::from_int(30));
        assert_eq!(mode, Some(VideoMode::new(640, 488, PixelFormat::Y10B, 30)));
        // A color stream cannot decode a depth encoding
        assert_eq!(
            mode_from_format(StreamKind::Color, &adjusted, Framerate::from_int(30)),
            None
        );
    }

    #[test]
    fn test_no_pair_without_color_sibling() {
        let nodes = vec![
            node("/dev/video0", "usb-1", false, true),
            node("/dev/video1", "usb-2", true, true),
        ];
        assert!(find_rgbd_pair(&nodes).is_none());
    }
}
