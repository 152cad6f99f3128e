// SPDX-License-Identifier: GPL-3.0-only

//! Session bring-up and scoped teardown

use super::{SensorSession, StreamKind, VideoMode};
use crate::config::{CaptureConfig, StreamRequest};
use crate::errors::{CaptureError, CaptureResult, SensorError};
use std::ops::{Deref, DerefMut};
use tracing::{debug, error, info, warn};

/// Owns an opened session and tears it down when dropped
///
/// Teardown order is fixed: stop depth, stop color, destroy depth, destroy
/// color, close the device. It runs on every exit path, including early
/// returns from [`initialize`] and read failures in the capture loop.
pub struct ActiveSensor {
    session: Box<dyn SensorSession>,
}

impl ActiveSensor {
    pub fn new(session: Box<dyn SensorSession>) -> Self {
        Self { session }
    }

    /// True when both streams are created and started
    pub fn is_ready(&self) -> bool {
        StreamKind::ALL
            .iter()
            .all(|&stream| self.session.is_stream_valid(stream))
    }
}

impl Deref for ActiveSensor {
    type Target = dyn SensorSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for ActiveSensor {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for ActiveSensor {
    fn drop(&mut self) {
        debug!("Tearing down sensor session");
        self.session.stop(StreamKind::Depth);
        self.session.stop(StreamKind::Color);
        self.session.destroy(StreamKind::Depth);
        self.session.destroy(StreamKind::Color);
        self.session.close();
        info!("Sensor session closed");
    }
}

/// Log every supported mode of a stream, in device order
pub fn log_supported_modes(session: &dyn SensorSession, stream: StreamKind) -> Vec<VideoMode> {
    match session.list_supported_modes(stream) {
        Ok(modes) => {
            info!(stream = %stream, count = modes.len(), "Supported modes");
            for (index, mode) in modes.iter().enumerate() {
                info!(
                    stream = %stream,
                    index,
                    width = mode.width,
                    height = mode.height,
                    pixel_format = %mode.pixel_format,
                    fps = %mode.framerate,
                    "Mode"
                );
            }
            modes
        }
        Err(e) => {
            warn!(stream = %stream, error = %e, "Failed to enumerate modes");
            Vec::new()
        }
    }
}

/// Create, configure and start one stream
///
/// A mode that cannot be honoured is a warning; the stream keeps its default.
/// A start failure destroys the stream before returning.
fn bring_up_stream(
    session: &mut dyn SensorSession,
    stream: StreamKind,
    modes: &[VideoMode],
    request: &StreamRequest,
) -> CaptureResult<()> {
    session.create_stream(stream).map_err(|e| match e {
        SensorError::NoSuchSensor(_) => CaptureError::Initialization(e.to_string()),
        other => CaptureError::Initialization(format!("Can't create {} stream: {}", stream, other)),
    })?;

    match request.resolve(modes) {
        Some(mode) => match session.configure_stream(stream, &mode) {
            Ok(()) => info!(stream = %stream, mode = %mode, "Mode: OK"),
            Err(e) => warn!(stream = %stream, mode = %mode, error = %e, "Mode: not OK, keeping default"),
        },
        None => warn!(
            stream = %stream,
            requested = %request,
            "Requested mode not supported, keeping default"
        ),
    }

    if let Err(e) = session.start(stream) {
        error!(stream = %stream, error = %e, "Can't start stream");
        session.destroy(stream);
        return Err(match e {
            SensorError::StreamStart { .. } => CaptureError::StreamStart(e),
            other => CaptureError::StreamStart(SensorError::StreamStart {
                stream,
                reason: other.to_string(),
            }),
        });
    }

    match session.current_mode(stream) {
        Some(mode) => info!(stream = %stream, mode = %mode, "Stream started"),
        None => info!(stream = %stream, "Stream started"),
    }
    Ok(())
}

/// Bring an opened session to the running state
///
/// The modes of both streams are listed first, then depth is brought up
/// before color. Any failure tears the whole session
/// down before the error is returned.
pub fn initialize(
    session: Box<dyn SensorSession>,
    config: &CaptureConfig,
) -> CaptureResult<ActiveSensor> {
    let mut sensor = ActiveSensor::new(session);

    let device = sensor.device_info().clone();
    info!(
        name = %device.name,
        driver = %device.driver,
        color = %device.color_path,
        depth = %device.depth_path,
        "Device opened"
    );

    let depth_modes = log_supported_modes(&*sensor, StreamKind::Depth);
    let color_modes = log_supported_modes(&*sensor, StreamKind::Color);

    bring_up_stream(&mut *sensor, StreamKind::Depth, &depth_modes, &config.depth)?;
    bring_up_stream(&mut *sensor, StreamKind::Color, &color_modes, &config.color)?;

    if !sensor.is_ready() {
        error!("No valid streams");
        return Err(CaptureError::Initialization(
            "No valid streams. Exiting".to_string(),
        ));
    }

    if let Some(delta) = config.exposure_bias {
        match sensor.set_exposure_bias(delta) {
            Ok(()) => info!(delta, "Exposure bias applied, auto white balance disabled"),
            Err(e) => warn!(delta, error = %e, "Could not apply exposure bias"),
        }
    }

    Ok(sensor)
}
