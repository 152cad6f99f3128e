// SPDX-License-Identifier: GPL-3.0-only

//! The capture loop
//!
//! One iteration reads a color frame, then a depth frame, writes both to the
//! dataset under the same index, shows them, and polls for cancellation.
//! The loop runs on the calling thread; reads block on the sensor.

use crate::backends::sensor::format_converters::{self, DepthImage};
use crate::backends::sensor::{SensorSession, StreamKind};
use crate::config::{CaptureConfig, WritePolicy};
use crate::dataset::DatasetWriter;
use crate::errors::{CaptureError, CaptureResult, SensorError};
use image::RgbImage;
use image::imageops::flip_horizontal_in_place;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Receives each frame for display
///
/// Display is side-effect only; nothing it does affects what is written.
pub trait FramePreview {
    fn show_color(&mut self, index: u64, image: &RgbImage) -> std::io::Result<()>;
    fn show_depth(&mut self, index: u64, image: &DepthImage) -> std::io::Result<()>;
}

/// Operator cancellation
pub trait CancelSignal {
    /// Wait at most `timeout` for a cancel request
    fn poll_cancel(&mut self, timeout: Duration) -> std::io::Result<bool>;
}

/// Everything the loop needs from its operator-facing side
pub trait CaptureFrontend: FramePreview + CancelSignal {}

impl<T: FramePreview + CancelSignal> CaptureFrontend for T {}

/// Cancellation flag, set from a signal handler or another thread
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    flag: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a flag that is raised by Ctrl+C
    pub fn install_ctrlc() -> Result<Self, ctrlc::Error> {
        let interrupt = Self::new();
        let flag = Arc::clone(&interrupt.flag);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })?;
        Ok(interrupt)
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl CancelSignal for InterruptFlag {
    fn poll_cancel(&mut self, _timeout: Duration) -> std::io::Result<bool> {
        Ok(self.is_raised())
    }
}

/// Frontend without display, cancelled by Ctrl+C
pub struct HeadlessFrontend {
    interrupt: InterruptFlag,
}

impl HeadlessFrontend {
    pub fn new(interrupt: InterruptFlag) -> Self {
        Self { interrupt }
    }
}

impl FramePreview for HeadlessFrontend {
    fn show_color(&mut self, _index: u64, _image: &RgbImage) -> std::io::Result<()> {
        Ok(())
    }

    fn show_depth(&mut self, index: u64, _image: &DepthImage) -> std::io::Result<()> {
        if index % 30 == 0 {
            info!(index, "Capturing");
        }
        Ok(())
    }
}

impl CancelSignal for HeadlessFrontend {
    fn poll_cancel(&mut self, timeout: Duration) -> std::io::Result<bool> {
        self.interrupt.poll_cancel(timeout)
    }
}

/// Why the loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The operator asked to stop
    Cancelled,
    /// The configured frame count was reached
    FrameLimit,
    /// A read returned no valid frame
    ReadFailure {
        stream: StreamKind,
        frame_index: u64,
        error: SensorError,
    },
}

/// Outcome of a capture run
#[derive(Debug, Clone)]
pub struct CaptureSummary {
    pub output_root: PathBuf,
    pub first_index: u64,
    /// Index the next iteration would have used
    pub next_index: u64,
    /// Iterations whose color and depth were both written
    pub frames_completed: u64,
    pub elapsed: Duration,
    pub termination: Termination,
}

impl CaptureSummary {
    /// Turn a read failure into an error, pass every other outcome through
    pub fn into_result(self) -> CaptureResult<Self> {
        if let Termination::ReadFailure {
            stream,
            frame_index,
            error,
        } = &self.termination
        {
            return Err(CaptureError::ReadFailure {
                stream: *stream,
                frame_index: *frame_index,
                source: error.clone(),
            });
        }
        Ok(self)
    }
}

/// Action returned by one iteration to control the loop
#[derive(Debug, Clone, PartialEq, Eq)]
enum LoopAction {
    Continue,
    Stop(Termination),
}

/// Frame index shared by both streams, incremented once per completed iteration
#[derive(Debug, Clone, Copy)]
pub struct FrameCounter {
    first: u64,
    current: u64,
}

impl FrameCounter {
    pub fn new(first: u64) -> Self {
        Self {
            first,
            current: first,
        }
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn advance(&mut self) {
        self.current += 1;
    }

    /// Iterations completed since the counter was created
    pub fn completed(&self) -> u64 {
        self.current - self.first
    }
}

/// Settings of the capture loop, taken from [`CaptureConfig`]
#[derive(Debug, Clone)]
pub struct CaptureLoop {
    start_index: u64,
    depth_scale: f64,
    mirror: bool,
    write_policy: WritePolicy,
    max_frames: Option<u64>,
    cancel_poll: Duration,
}

impl CaptureLoop {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            start_index: config.start_index,
            depth_scale: config.depth_scale,
            mirror: config.mirror,
            write_policy: config.write_policy,
            max_frames: config.max_frames,
            cancel_poll: config.cancel_poll(),
        }
    }

    /// Capture into `output_root` until cancelled, limited or a read fails
    ///
    /// A read failure ends the loop normally with
    /// [`Termination::ReadFailure`]; I/O errors on the dataset are returned
    /// as `Err`. Index files are flushed in both cases.
    pub fn run(
        &self,
        session: &mut dyn SensorSession,
        frontend: &mut dyn CaptureFrontend,
        output_root: &Path,
    ) -> CaptureResult<CaptureSummary> {
        for stream in StreamKind::ALL {
            if !session.is_stream_valid(stream) {
                return Err(CaptureError::Initialization(format!(
                    "The {} stream is not running",
                    stream
                )));
            }
        }

        let mut writer = DatasetWriter::create(output_root)?;
        let mut counter = FrameCounter::new(self.start_index);
        let started = Instant::now();

        info!(
            root = %output_root.display(),
            start_index = self.start_index,
            depth_scale = self.depth_scale,
            mirror = self.mirror,
            write_policy = ?self.write_policy,
            "Capture started"
        );

        let outcome = loop {
            match self.step(session, frontend, &mut writer, &mut counter) {
                Ok(LoopAction::Continue) => {}
                Ok(LoopAction::Stop(termination)) => break Ok(termination),
                Err(e) => break Err(e),
            }
        };

        let flushed = writer.finish();
        let termination = outcome?;
        flushed?;

        let summary = CaptureSummary {
            output_root: output_root.to_path_buf(),
            first_index: self.start_index,
            next_index: counter.current(),
            frames_completed: counter.completed(),
            elapsed: started.elapsed(),
            termination,
        };
        info!(
            frames = summary.frames_completed,
            next_index = summary.next_index,
            termination = ?summary.termination,
            "Capture finished"
        );
        Ok(summary)
    }

    fn step(
        &self,
        session: &mut dyn SensorSession,
        frontend: &mut dyn CaptureFrontend,
        writer: &mut DatasetWriter,
        counter: &mut FrameCounter,
    ) -> CaptureResult<LoopAction> {
        let index = counter.current();

        let mut color = match session
            .read_frame(StreamKind::Color)
            .and_then(|frame| format_converters::color_to_rgb(&frame))
        {
            Ok(image) => image,
            Err(e) => return Ok(read_failure(StreamKind::Color, index, e)),
        };
        if self.mirror {
            flip_horizontal_in_place(&mut color);
        }
        frontend.show_color(index, &color)?;

        let pending_color = match self.write_policy {
            WritePolicy::Immediate => {
                writer.write_color(index, &color)?;
                None
            }
            WritePolicy::Paired => Some(color),
        };

        let mut depth = match session
            .read_frame(StreamKind::Depth)
            .and_then(|frame| format_converters::depth_to_image(&frame, self.depth_scale))
        {
            Ok(image) => image,
            Err(e) => {
                if pending_color.is_some() {
                    debug!(index, "Dropping unpaired color frame");
                }
                return Ok(read_failure(StreamKind::Depth, index, e));
            }
        };
        if self.mirror {
            flip_horizontal_in_place(&mut depth);
        }
        frontend.show_depth(index, &depth)?;

        if let Some(color) = pending_color {
            writer.write_color(index, &color)?;
        }
        writer.write_depth(index, &depth)?;
        counter.advance();

        if self
            .max_frames
            .is_some_and(|limit| counter.completed() >= limit)
        {
            info!(frames = counter.completed(), "Frame limit reached");
            return Ok(LoopAction::Stop(Termination::FrameLimit));
        }

        if frontend.poll_cancel(self.cancel_poll)? {
            info!(index = counter.current(), "Capture cancelled");
            return Ok(LoopAction::Stop(Termination::Cancelled));
        }

        Ok(LoopAction::Continue)
    }
}

fn read_failure(stream: StreamKind, frame_index: u64, error: SensorError) -> LoopAction {
    error!(stream = %stream, frame_index, error = %error, "Cannot read frame. Quitting");
    LoopAction::Stop(Termination::ReadFailure {
        stream,
        frame_index,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_counter() {
        let mut counter = FrameCounter::new(2);
        assert_eq!(counter.current(), 2);
        counter.advance();
        counter.advance();
        assert_eq!(counter.current(), 4);
        assert_eq!(counter.completed(), 2);
    }

    #[test]
    fn test_interrupt_flag_shared_between_clones() {
        let mut flag = InterruptFlag::new();
        let handle = flag.clone();
        assert!(!flag.poll_cancel(Duration::ZERO).unwrap());
        handle.raise();
        assert!(flag.poll_cancel(Duration::ZERO).unwrap());
    }

    #[test]
    fn test_read_failure_becomes_error() {
        let summary = CaptureSummary {
            output_root: PathBuf::from("/tmp/x"),
            first_index: 2,
            next_index: 6,
            frames_completed: 4,
            elapsed: Duration::ZERO,
            termination: Termination::ReadFailure {
                stream: StreamKind::Depth,
                frame_index: 6,
                error: SensorError::Timeout(StreamKind::Depth),
            },
        };
        assert!(matches!(
            summary.into_result(),
            Err(CaptureError::ReadFailure {
                stream: StreamKind::Depth,
                frame_index: 6,
                ..
            })
        ));
    }
}
