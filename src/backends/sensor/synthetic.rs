// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic RGB-D sensor
//!
//! Generates deterministic frames without hardware. Used for demos, for
//! `--backend synthetic`, and by the tests, which inject failures and
//! inspect the recorded lifecycle calls.
//!
//! Frame content for frame `n` (counted per stream from 0):
//! - color: R = (x + n) mod 256, G = y mod 256, B = 128
//! - depth: `base_depth + x + y` millimetres

use super::format_converters::{frame_from_bytes, pack_y10b};
use super::{DeviceInfo, PixelFormat, RawFrame, SensorSession, StreamKind, VideoMode};
use crate::errors::{SensorError, SensorResult};
use image::RgbImage;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// A call made on the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Opened,
    ModesListed(StreamKind),
    Created(StreamKind),
    Configured(StreamKind, VideoMode),
    Started(StreamKind),
    Stopped(StreamKind),
    Destroyed(StreamKind),
    ExposureBias(i32),
    Closed,
}

/// Shared view of the lifecycle calls, readable after the session is dropped
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<LifecycleEvent>>>);

impl EventLog {
    fn push(&self, event: LifecycleEvent) {
        if let Ok(mut events) = self.0.lock() {
            events.push(event);
        }
    }

    /// Copy of every event recorded so far
    pub fn snapshot(&self) -> Vec<LifecycleEvent> {
        self.0.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Only the teardown calls (stop, destroy, close), in order
    pub fn teardown(&self) -> Vec<LifecycleEvent> {
        self.snapshot()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    LifecycleEvent::Stopped(_) | LifecycleEvent::Destroyed(_) | LifecycleEvent::Closed
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Color modes in reported order; the first is the default
    pub color_modes: Vec<VideoMode>,
    /// Depth modes in reported order; the first is the default
    pub depth_modes: Vec<VideoMode>,
    /// False simulates "no device found"
    pub device_present: bool,
    pub has_color: bool,
    pub has_depth: bool,
    /// Stream whose start fails
    pub fail_start: Option<StreamKind>,
    /// Successful color reads before every further read fails
    pub color_reads_before_failure: Option<u64>,
    /// Successful depth reads before every further read fails
    pub depth_reads_before_failure: Option<u64>,
    pub exposure_supported: bool,
    /// Depth at the top-left pixel, in millimetres
    pub base_depth_mm: u16,
    /// Pace color reads at the mode's frame rate
    pub realtime: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            color_modes: vec![
                VideoMode::new(320, 240, PixelFormat::Rgb24, 30),
                VideoMode::new(640, 480, PixelFormat::Rgb24, 30),
                VideoMode::new(640, 480, PixelFormat::Yuyv, 30),
                VideoMode::new(1280, 1024, PixelFormat::Rgb24, 15),
            ],
            depth_modes: vec![
                VideoMode::new(320, 240, PixelFormat::Depth16, 30),
                VideoMode::new(640, 480, PixelFormat::Depth16, 30),
                VideoMode::new(640, 480, PixelFormat::Depth16, 60),
            ],
            device_present: true,
            has_color: true,
            has_depth: true,
            fail_start: None,
            color_reads_before_failure: None,
            depth_reads_before_failure: None,
            exposure_supported: true,
            base_depth_mm: 1000,
            realtime: false,
        }
    }
}

#[derive(Debug, Default)]
struct SyntheticStream {
    created: bool,
    started: bool,
    mode: Option<VideoMode>,
    reads: u64,
}

pub struct SyntheticSensor {
    config: SyntheticConfig,
    info: DeviceInfo,
    color: SyntheticStream,
    depth: SyntheticStream,
    exposure: i32,
    auto_white_balance: bool,
    closed: bool,
    events: EventLog,
}

impl SyntheticSensor {
    /// Open a synthetic device
    ///
    /// # Returns
    /// * `Err(SensorError::DeviceUnavailable)` - `device_present` is false
    pub fn open(config: SyntheticConfig) -> SensorResult<Self> {
        if !config.device_present {
            return Err(SensorError::DeviceUnavailable(
                "no synthetic device present".to_string(),
            ));
        }

        let events = EventLog::default();
        events.push(LifecycleEvent::Opened);
        info!("Synthetic sensor opened");

        Ok(Self {
            config,
            info: DeviceInfo {
                name: "Synthetic RGB-D sensor".to_string(),
                driver: "synthetic".to_string(),
                color_path: "synthetic:color".to_string(),
                depth_path: "synthetic:depth".to_string(),
            },
            color: SyntheticStream::default(),
            depth: SyntheticStream::default(),
            exposure: 300,
            auto_white_balance: true,
            closed: false,
            events,
        })
    }

    /// Handle to the lifecycle log
    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    /// Current exposure value and auto white balance state
    pub fn exposure_state(&self) -> (i32, bool) {
        (self.exposure, self.auto_white_balance)
    }

    fn stream(&self, kind: StreamKind) -> &SyntheticStream {
        match kind {
            StreamKind::Color => &self.color,
            StreamKind::Depth => &self.depth,
        }
    }

    fn stream_mut(&mut self, kind: StreamKind) -> &mut SyntheticStream {
        match kind {
            StreamKind::Color => &mut self.color,
            StreamKind::Depth => &mut self.depth,
        }
    }

    fn modes(&self, kind: StreamKind) -> &[VideoMode] {
        match kind {
            StreamKind::Color => &self.config.color_modes,
            StreamKind::Depth => &self.config.depth_modes,
        }
    }

    fn has_sensor(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Color => self.config.has_color,
            StreamKind::Depth => self.config.has_depth,
        }
    }

    fn reads_before_failure(&self, kind: StreamKind) -> Option<u64> {
        match kind {
            StreamKind::Color => self.config.color_reads_before_failure,
            StreamKind::Depth => self.config.depth_reads_before_failure,
        }
    }

    fn render(&self, kind: StreamKind, mode: &VideoMode, n: u64) -> SensorResult<Vec<u8>> {
        match kind {
            StreamKind::Color => render_color(mode, n),
            StreamKind::Depth => Ok(render_depth(mode, self.config.base_depth_mm)),
        }
    }
}

/// Gradient color image for frame `n`
pub fn color_pattern(width: u32, height: u32, n: u64) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            ((x as u64 + n) % 256) as u8,
            (y % 256) as u8,
            128,
        ])
    })
}

/// Raw depth in millimetres at pixel (x, y)
pub fn depth_pattern(base_depth_mm: u16, x: u32, y: u32) -> u16 {
    (base_depth_mm as u32 + x + y).min(u16::MAX as u32) as u16
}

fn render_color(mode: &VideoMode, n: u64) -> SensorResult<Vec<u8>> {
    let image = color_pattern(mode.width, mode.height, n);
    let data = match mode.pixel_format {
        PixelFormat::Rgb24 => image.into_raw(),
        PixelFormat::Bgr24 => image
            .pixels()
            .flat_map(|p| [p.0[2], p.0[1], p.0[0]])
            .collect(),
        PixelFormat::Yuyv | PixelFormat::Uyvy => {
            // Luma only; chroma neutral
            let luma: Vec<u8> = image.pixels().map(|p| p.0[0]).collect();
            luma.chunks(2)
                .flat_map(|pair| {
                    let y0 = pair[0];
                    let y1 = pair.get(1).copied().unwrap_or(y0);
                    match mode.pixel_format {
                        PixelFormat::Yuyv => [y0, 128, y1, 128],
                        _ => [128, y0, 128, y1],
                    }
                })
                .collect()
        }
        PixelFormat::Mjpeg => {
            let mut jpeg = Vec::new();
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
                .encode_image(&image)
                .map_err(|e| SensorError::Backend(format!("JPEG encode failed: {}", e)))?;
            jpeg
        }
        PixelFormat::Depth16 | PixelFormat::Y16 | PixelFormat::Y10B => {
            return Err(SensorError::Backend(format!(
                "{} is not a color encoding",
                mode.pixel_format
            )));
        }
    };
    Ok(data)
}

fn render_depth(mode: &VideoMode, base_depth_mm: u16) -> Vec<u8> {
    let values: Vec<u16> = (0..mode.height)
        .flat_map(|y| (0..mode.width).map(move |x| depth_pattern(base_depth_mm, x, y)))
        .collect();
    match mode.pixel_format {
        PixelFormat::Y10B => pack_y10b(&values),
        _ => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

impl SensorSession for SyntheticSensor {
    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn list_supported_modes(&self, stream: StreamKind) -> SensorResult<Vec<VideoMode>> {
        if !self.has_sensor(stream) {
            return Err(SensorError::NoSuchSensor(stream));
        }
        self.events.push(LifecycleEvent::ModesListed(stream));
        Ok(self.modes(stream).to_vec())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.events.push(LifecycleEvent::Closed);
        }
    }

    fn create_stream(&mut self, stream: StreamKind) -> SensorResult<()> {
        if !self.has_sensor(stream) {
            return Err(SensorError::NoSuchSensor(stream));
        }
        let default_mode = self.modes(stream).first().copied();
        let state = self.stream_mut(stream);
        state.created = true;
        state.mode = default_mode;
        self.events.push(LifecycleEvent::Created(stream));
        Ok(())
    }

    fn configure_stream(&mut self, stream: StreamKind, mode: &VideoMode) -> SensorResult<()> {
        if !self.stream(stream).created {
            return Err(SensorError::StreamNotCreated(stream));
        }
        if !self.modes(stream).contains(mode) {
            return Err(SensorError::UnsupportedMode {
                stream,
                requested: mode.to_string(),
            });
        }
        self.stream_mut(stream).mode = Some(*mode);
        self.events.push(LifecycleEvent::Configured(stream, *mode));
        Ok(())
    }

    fn current_mode(&self, stream: StreamKind) -> Option<VideoMode> {
        self.stream(stream).mode
    }

    fn start(&mut self, stream: StreamKind) -> SensorResult<()> {
        if !self.stream(stream).created {
            return Err(SensorError::StreamNotCreated(stream));
        }
        if self.config.fail_start == Some(stream) {
            return Err(SensorError::StreamStart {
                stream,
                reason: "simulated start failure".to_string(),
            });
        }
        if self.stream(stream).mode.is_none() {
            return Err(SensorError::StreamStart {
                stream,
                reason: "no video mode".to_string(),
            });
        }
        self.stream_mut(stream).started = true;
        self.events.push(LifecycleEvent::Started(stream));
        Ok(())
    }

    fn stop(&mut self, stream: StreamKind) {
        let state = self.stream_mut(stream);
        if state.started {
            state.started = false;
            self.events.push(LifecycleEvent::Stopped(stream));
        }
    }

    fn destroy(&mut self, stream: StreamKind) {
        let state = self.stream_mut(stream);
        if state.created {
            *state = SyntheticStream::default();
            self.events.push(LifecycleEvent::Destroyed(stream));
        }
    }

    fn is_stream_valid(&self, stream: StreamKind) -> bool {
        let state = self.stream(stream);
        state.created && state.started
    }

    fn read_frame(&mut self, stream: StreamKind) -> SensorResult<RawFrame> {
        let state = self.stream(stream);
        if !state.started {
            return Err(SensorError::StreamStopped(stream));
        }
        let Some(mode) = state.mode else {
            return Err(SensorError::StreamStopped(stream));
        };
        let n = state.reads;

        if self.reads_before_failure(stream).is_some_and(|limit| n >= limit) {
            debug!(stream = %stream, reads = n, "Simulated read failure");
            return Err(SensorError::Disconnected {
                stream,
                reason: "simulated disconnect".to_string(),
            });
        }

        if self.config.realtime && stream == StreamKind::Color {
            let fps = mode.framerate.as_f64().max(1.0);
            std::thread::sleep(Duration::from_secs_f64(1.0 / fps));
        }

        let data = self.render(stream, &mode, n)?;
        self.stream_mut(stream).reads += 1;
        Ok(frame_from_bytes(
            stream,
            mode.width,
            mode.height,
            mode.pixel_format,
            data,
        ))
    }

    fn set_exposure_bias(&mut self, delta: i32) -> SensorResult<()> {
        if !self.config.exposure_supported {
            return Err(SensorError::ControlUnsupported(
                "synthetic device has no exposure control".to_string(),
            ));
        }
        self.auto_white_balance = false;
        self.exposure = self.exposure.saturating_add(delta);
        self.events.push(LifecycleEvent::ExposureBias(delta));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::format_converters::{color_to_rgb, depth_to_image};

    fn started(config: SyntheticConfig) -> SyntheticSensor {
        let mut sensor = SyntheticSensor::open(config).unwrap();
        for stream in StreamKind::ALL {
            sensor.create_stream(stream).unwrap();
            sensor.start(stream).unwrap();
        }
        sensor
    }

    #[test]
    fn test_missing_device() {
        let result = SyntheticSensor::open(SyntheticConfig {
            device_present: false,
            ..SyntheticConfig::default()
        });
        assert!(matches!(result, Err(SensorError::DeviceUnavailable(_))));
    }

    #[test]
    fn test_modes_reported_in_order() {
        let sensor = SyntheticSensor::open(SyntheticConfig::default()).unwrap();
        let modes = sensor.list_supported_modes(StreamKind::Depth).unwrap();
        assert_eq!(modes.len(), 3);
        assert_eq!(modes[0].width, 320);
        assert_eq!(modes[2].framerate.as_int(), 60);
    }

    #[test]
    fn test_configure_rejects_unlisted_mode() {
        let mut sensor = SyntheticSensor::open(SyntheticConfig::default()).unwrap();
        sensor.create_stream(StreamKind::Color).unwrap();
        let result =
            sensor.configure_stream(StreamKind::Color, &VideoMode::new(800, 600, PixelFormat::Rgb24, 30));
        assert!(matches!(result, Err(SensorError::UnsupportedMode { .. })));
        assert_eq!(sensor.current_mode(StreamKind::Color).map(|m| m.width), Some(320));
    }

    #[test]
    fn test_frames_decode_to_the_pattern() {
        let mut sensor = started(SyntheticConfig::default());

        let frame = sensor.read_frame(StreamKind::Color).unwrap();
        let rgb = color_to_rgb(&frame).unwrap();
        assert_eq!(rgb.get_pixel(10, 3).0, [10, 3, 128]);

        let frame = sensor.read_frame(StreamKind::Depth).unwrap();
        let depth = depth_to_image(&frame, 1.0).unwrap();
        assert_eq!(depth.get_pixel(10, 3).0[0], 1013);
    }

    #[test]
    fn test_y10b_depth_mode() {
        let mut sensor = started(SyntheticConfig {
            depth_modes: vec![VideoMode::new(8, 2, PixelFormat::Y10B, 30)],
            base_depth_mm: 500,
            ..SyntheticConfig::default()
        });
        let frame = sensor.read_frame(StreamKind::Depth).unwrap();
        let depth = depth_to_image(&frame, 1.0).unwrap();
        assert_eq!(depth.get_pixel(7, 1).0[0], 508);
    }

    #[test]
    fn test_read_failure_after_limit() {
        let mut sensor = started(SyntheticConfig {
            depth_reads_before_failure: Some(2),
            ..SyntheticConfig::default()
        });
        assert!(sensor.read_frame(StreamKind::Depth).is_ok());
        assert!(sensor.read_frame(StreamKind::Depth).is_ok());
        assert!(sensor.read_frame(StreamKind::Depth).is_err());
        assert!(sensor.read_frame(StreamKind::Color).is_ok());
    }

    #[test]
    fn test_read_after_stop_is_invalid() {
        let mut sensor = started(SyntheticConfig::default());
        sensor.stop(StreamKind::Color);
        assert_eq!(
            sensor.read_frame(StreamKind::Color).unwrap_err(),
            SensorError::StreamStopped(StreamKind::Color)
        );
    }

    #[test]
    fn test_exposure_bias_disables_awb() {
        let mut sensor = SyntheticSensor::open(SyntheticConfig::default()).unwrap();
        sensor.set_exposure_bias(100).unwrap();
        assert_eq!(sensor.exposure_state(), (400, false));

        let mut sensor = SyntheticSensor::open(SyntheticConfig {
            exposure_supported: false,
            ..SyntheticConfig::default()
        })
        .unwrap();
        assert!(matches!(
            sensor.set_exposure_bias(100),
            Err(SensorError::ControlUnsupported(_))
        ));
    }

    #[test]
    fn test_stop_and_destroy_are_idempotent() {
        let mut sensor = started(SyntheticConfig::default());
        let events = sensor.events();
        sensor.stop(StreamKind::Depth);
        sensor.stop(StreamKind::Depth);
        sensor.destroy(StreamKind::Depth);
        sensor.destroy(StreamKind::Depth);
        assert_eq!(
            events.teardown(),
            vec![
                LifecycleEvent::Stopped(StreamKind::Depth),
                LifecycleEvent::Destroyed(StreamKind::Depth),
            ]
        );
    }
}
