// SPDX-License-Identifier: GPL-3.0-only

//! Terminal live preview
//!
//! Renders the color and depth frames side by side using Unicode half-block
//! characters for improved vertical resolution. Esc, 'q' and Ctrl+C cancel
//! the capture.

use crate::backends::sensor::format_converters::{DepthImage, depth_to_rgb};
use crate::capture::{CancelSignal, FramePreview};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use image::RgbImage;
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    widgets::Widget,
};
use std::io::{self, Stdout, stdout};
use std::time::{Duration, Instant};
use tracing::warn;

/// Live preview in the terminal's alternate screen
///
/// Raw mode and the alternate screen are left when the preview is dropped.
pub struct TerminalPreview {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    color: FrameWidget,
    depth: FrameWidget,
    index: u64,
    fps: FpsCounter,
    status: String,
}

impl TerminalPreview {
    pub fn enter(status: impl Into<String>) -> io::Result<Self> {
        enable_raw_mode()?;
        let mut out = stdout();
        if let Err(e) = execute!(out, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(e);
        }
        let terminal = match Terminal::new(CrosstermBackend::new(out)) {
            Ok(terminal) => terminal,
            Err(e) => {
                let _ = execute!(stdout(), LeaveAlternateScreen);
                let _ = disable_raw_mode();
                return Err(e);
            }
        };

        Ok(Self {
            terminal,
            color: FrameWidget::new("Color"),
            depth: FrameWidget::new("Depth"),
            index: 0,
            fps: FpsCounter::new(),
            status: status.into(),
        })
    }

    fn draw(&mut self) -> io::Result<()> {
        let status = format!(
            " frame {} | {:.1} fps | {} | Esc/q quit",
            self.index,
            self.fps.fps(),
            self.status
        );
        let color = &self.color;
        let depth = &self.depth;

        self.terminal.draw(|f| {
            let area = f.area();
            let [frames_area, status_area] = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(1), Constraint::Length(1)])
                .areas(area);
            let [color_area, depth_area] = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .areas(frames_area);

            f.render_widget(color, color_area);
            f.render_widget(depth, depth_area);
            f.render_widget(StatusBar { message: &status }, status_area);
        })?;
        Ok(())
    }
}

impl Drop for TerminalPreview {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!(error = %e, "Failed to leave raw mode");
        }
        if let Err(e) = execute!(self.terminal.backend_mut(), LeaveAlternateScreen) {
            warn!(error = %e, "Failed to leave alternate screen");
        }
        let _ = self.terminal.show_cursor();
    }
}

impl FramePreview for TerminalPreview {
    fn show_color(&mut self, index: u64, image: &RgbImage) -> io::Result<()> {
        self.index = index;
        self.color.update(image.clone());
        Ok(())
    }

    fn show_depth(&mut self, index: u64, image: &DepthImage) -> io::Result<()> {
        self.index = index;
        self.depth.update(depth_to_rgb(image));
        self.fps.tick();
        self.draw()
    }
}

impl CancelSignal for TerminalPreview {
    fn poll_cancel(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut waited = timeout;
        while event::poll(waited)? {
            if let Event::Key(key) = event::read()?
                && is_cancel_key(&key)
            {
                return Ok(true);
            }
            // Drain whatever else is queued without waiting again
            waited = Duration::ZERO;
        }
        Ok(false)
    }
}

/// Esc, 'q' or Ctrl+C
pub fn is_cancel_key(key: &KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Frame rate over a sliding one-second window
struct FpsCounter {
    window_start: Instant,
    frames: u32,
    fps: f64,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
            fps: 0.0,
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.frames as f64 / elapsed.as_secs_f64();
            self.frames = 0;
            self.window_start = Instant::now();
        }
    }

    fn fps(&self) -> f64 {
        self.fps
    }
}

/// Widget that renders an RGB image using half-block characters
struct FrameWidget {
    title: &'static str,
    image: Option<RgbImage>,
}

impl FrameWidget {
    fn new(title: &'static str) -> Self {
        Self { title, image: None }
    }

    fn update(&mut self, image: RgbImage) {
        self.image = Some(image);
    }
}

impl Widget for &FrameWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.height < 2 || area.width == 0 {
            return;
        }
        buf.set_string(area.x, area.y, self.title, Style::default().fg(Color::Gray));
        let area = Rect {
            y: area.y + 1,
            height: area.height - 1,
            ..area
        };

        let Some(image) = &self.image else {
            let msg = "Waiting for sensor...";
            let x = area.x + (area.width.saturating_sub(msg.len() as u16)) / 2;
            let y = area.y + area.height / 2;
            buf.set_string(x, y, msg, Style::default());
            return;
        };
        if image.width() == 0 || image.height() == 0 {
            return;
        }

        // Each terminal cell displays 2 vertical pixels
        let frame_aspect = image.width() as f64 / image.height() as f64;
        let term_width = area.width as f64;
        let term_height = (area.height * 2) as f64;

        let (display_width, display_height) = if term_width / term_height > frame_aspect {
            let h = term_height;
            ((h * frame_aspect) as u16, (h / 2.0) as u16)
        } else {
            let w = term_width;
            (w as u16, (w / frame_aspect / 2.0) as u16)
        };
        if display_width == 0 || display_height == 0 {
            return;
        }

        let x_offset = area.x + (area.width.saturating_sub(display_width)) / 2;
        let y_offset = area.y + (area.height.saturating_sub(display_height)) / 2;

        let x_scale = image.width() as f64 / display_width as f64;
        let y_scale = image.height() as f64 / (display_height * 2) as f64;

        for ty in 0..display_height {
            for tx in 0..display_width {
                let src_x = (tx as f64 * x_scale) as u32;
                let src_y_top = (ty as f64 * 2.0 * y_scale) as u32;
                let src_y_bottom = ((ty as f64 * 2.0 + 1.0) * y_scale) as u32;

                if let Some(cell) = buf.cell_mut((x_offset + tx, y_offset + ty)) {
                    cell.set_char('▀');
                    cell.set_fg(sample_pixel(image, src_x, src_y_top));
                    cell.set_bg(sample_pixel(image, src_x, src_y_bottom));
                }
            }
        }
    }
}

fn sample_pixel(image: &RgbImage, x: u32, y: u32) -> Color {
    let x = x.min(image.width() - 1);
    let y = y.min(image.height() - 1);
    let [r, g, b] = image.get_pixel(x, y).0;
    Color::Rgb(r, g, b)
}

/// Status bar widget
struct StatusBar<'a> {
    message: &'a str,
}

impl Widget for StatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let style = Style::default().fg(Color::White).bg(Color::DarkGray);
        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, area.y)) {
                cell.set_char(' ');
                cell.set_bg(Color::DarkGray);
            }
        }
        let text: String = self.message.chars().take(area.width as usize).collect();
        buf.set_string(area.x, area.y, text, style);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_keys() {
        let press = |code, modifiers| KeyEvent::new(code, modifiers);
        assert!(is_cancel_key(&press(KeyCode::Esc, KeyModifiers::NONE)));
        assert!(is_cancel_key(&press(KeyCode::Char('q'), KeyModifiers::NONE)));
        assert!(is_cancel_key(&press(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(!is_cancel_key(&press(KeyCode::Char('c'), KeyModifiers::NONE)));
        assert!(!is_cancel_key(&press(KeyCode::Enter, KeyModifiers::NONE)));
    }

    #[test]
    fn test_frame_widget_renders_half_blocks() {
        let mut widget = FrameWidget::new("Color");
        widget.update(RgbImage::from_pixel(4, 4, image::Rgb([255, 0, 0])));

        let area = Rect::new(0, 0, 4, 3);
        let mut buf = Buffer::empty(area);
        (&widget).render(area, &mut buf);

        let cell = buf.cell((0, 1)).unwrap();
        assert_eq!(cell.symbol(), "▀");
        assert_eq!(cell.fg, Color::Rgb(255, 0, 0));
    }

    #[test]
    fn test_status_bar_truncates() {
        let area = Rect::new(0, 0, 5, 1);
        let mut buf = Buffer::empty(area);
        StatusBar {
            message: "frame 12345",
        }
        .render(area, &mut buf);
        assert_eq!(buf.cell((4, 0)).unwrap().symbol(), "e");
    }
}
