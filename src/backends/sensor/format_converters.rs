// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion for sensor frames
//!
//! Color frames are normalized to 8-bit RGB and depth frames to 16-bit
//! single-channel images, whatever encoding the stream delivers. The
//! colormap helpers at the bottom are only used by the live preview.

use super::types::{PixelFormat, RawFrame, StreamKind};
use crate::constants::depth_preview;
use crate::errors::{SensorError, SensorResult};
use image::{ImageBuffer, ImageFormat, Luma, RgbImage};

/// Single-channel 16-bit depth image, as written to the dataset
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Byte order of packed 4:2:2 data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Yuv422Layout {
    /// Y0 U Y1 V
    Yuyv,
    /// U Y0 V Y1
    Uyvy,
}

fn malformed(frame: &RawFrame, reason: impl Into<String>) -> SensorError {
    SensorError::MalformedFrame {
        stream: frame.stream,
        reason: reason.into(),
    }
}

/// Make sure an uncompressed payload holds a full frame
fn check_payload(frame: &RawFrame) -> SensorResult<()> {
    if let Some(expected) = frame.format.frame_size(frame.width, frame.height)
        && frame.data.len() < expected
    {
        return Err(malformed(
            frame,
            format!(
                "{} payload is {} bytes, expected {} for {}x{}",
                frame.format,
                frame.data.len(),
                expected,
                frame.width,
                frame.height
            ),
        ));
    }
    Ok(())
}

/// Convert a color frame to RGB
///
/// # Returns
/// * `Err(SensorError::MalformedFrame)` - Short payload, undecodable JPEG, or a depth encoding
pub fn color_to_rgb(frame: &RawFrame) -> SensorResult<RgbImage> {
    check_payload(frame)?;
    let (width, height) = (frame.width, frame.height);
    let pixels = width as usize * height as usize;

    let rgb = match frame.format {
        PixelFormat::Rgb24 => frame.data[..pixels * 3].to_vec(),
        PixelFormat::Bgr24 => frame.data[..pixels * 3]
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        PixelFormat::Yuyv => yuv422_to_rgb(&frame.data, width, height, Yuv422Layout::Yuyv),
        PixelFormat::Uyvy => yuv422_to_rgb(&frame.data, width, height, Yuv422Layout::Uyvy),
        PixelFormat::Mjpeg => {
            let decoded = image::load_from_memory_with_format(&frame.data, ImageFormat::Jpeg)
                .map_err(|e| malformed(frame, format!("JPEG decode failed: {}", e)))?
                .to_rgb8();
            if decoded.dimensions() != (width, height) {
                return Err(malformed(
                    frame,
                    format!(
                        "JPEG is {}x{}, stream mode is {}x{}",
                        decoded.width(),
                        decoded.height(),
                        width,
                        height
                    ),
                ));
            }
            return Ok(decoded);
        }
        PixelFormat::Depth16 | PixelFormat::Y16 | PixelFormat::Y10B => {
            return Err(malformed(
                frame,
                format!("{} is not a color encoding", frame.format),
            ));
        }
    };

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| malformed(frame, "converted buffer does not match frame size"))
}

/// Convert a depth frame to a 16-bit image, multiplying every sample by `scale`
///
/// # Returns
/// * `Err(SensorError::MalformedFrame)` - Short payload or a color encoding
pub fn depth_to_image(frame: &RawFrame, scale: f64) -> SensorResult<DepthImage> {
    check_payload(frame)?;
    let pixels = frame.width as usize * frame.height as usize;

    let raw: Vec<u16> = match frame.format {
        PixelFormat::Depth16 | PixelFormat::Y16 => frame.data[..pixels * 2]
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect(),
        PixelFormat::Y10B => unpack_y10b(&frame.data, frame.width, frame.height),
        _ => {
            return Err(malformed(
                frame,
                format!("{} is not a depth encoding", frame.format),
            ));
        }
    };

    let scaled = raw
        .into_iter()
        .map(|d| scaled_depth_value(d, scale))
        .collect();

    DepthImage::from_raw(frame.width, frame.height, scaled)
        .ok_or_else(|| malformed(frame, "converted buffer does not match frame size"))
}

/// Scale one raw depth sample, rounding to nearest and saturating to the 16-bit range
pub fn scaled_depth_value(raw: u16, scale: f64) -> u16 {
    (raw as f64 * scale).round().clamp(0.0, u16::MAX as f64) as u16
}

/// Convert packed YUV 4:2:2 to RGB
///
/// Each 4-byte group encodes 2 pixels. Uses BT.601 coefficients. With an odd
/// pixel count the last group may be cut short after its first luma sample;
/// that pixel is converted without chroma.
pub fn yuv422_to_rgb(data: &[u8], width: u32, height: u32, layout: Yuv422Layout) -> Vec<u8> {
    let pixel_count = (width * height) as usize;
    let mut rgb = Vec::with_capacity(pixel_count * 3);

    for chunk in data.chunks(4) {
        let (y0, u, y1, v) = match (layout, chunk) {
            (Yuv422Layout::Yuyv, &[y0, u, y1, v]) => (y0, u, y1, v),
            (Yuv422Layout::Uyvy, &[u, y0, v, y1]) => (y0, u, y1, v),
            (Yuv422Layout::Yuyv, &[y0, _, ..]) => (y0, 128, y0, 128),
            (Yuv422Layout::Uyvy, &[_, y0, ..]) => (y0, 128, y0, 128),
            _ => break,
        };
        let u = u as f32 - 128.0;
        let v = v as f32 - 128.0;

        for y in [y0 as f32, y1 as f32] {
            if rgb.len() >= pixel_count * 3 {
                break;
            }
            let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
            let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
            let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
            rgb.extend_from_slice(&[r, g, b]);
        }
    }

    rgb
}

/// Expand Y10B into one `u16` per pixel
///
/// Every 5-byte group carries four samples: the high 8 bits of each in bytes
/// 0..4, then their low 2 bits packed LSB-first into byte 4. Output values
/// stay in the sensor's 0..=1023 range.
pub fn unpack_y10b(data: &[u8], width: u32, height: u32) -> Vec<u16> {
    let pixel_count = (width * height) as usize;
    let mut output = Vec::with_capacity(pixel_count);

    for chunk in data.chunks_exact(5) {
        let low = chunk[4] as u16;
        for (i, &high) in chunk[..4].iter().enumerate() {
            if output.len() >= pixel_count {
                return output;
            }
            output.push(((high as u16) << 2) | ((low >> (2 * i)) & 0x03));
        }
    }

    output
}

/// Pack 10-bit values into Y10B, the inverse of [`unpack_y10b`]
pub fn pack_y10b(values: &[u16]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(values.len().div_ceil(4) * 5);
    for group in values.chunks(4) {
        let mut low = 0u8;
        for i in 0..4 {
            let v = group.get(i).copied().unwrap_or(0) & 0x3FF;
            packed.push((v >> 2) as u8);
            low |= ((v & 0x03) as u8) << (2 * i);
        }
        packed.push(low);
    }
    packed
}

/// Polynomial fit of the Turbo colormap, `t` in 0..=1 from near (blue) to far (red)
fn turbo(t: f32) -> [u8; 3] {
    let r = (0.13572138
        + t * (4.6153926 + t * (-42.66032 + t * (132.13108 + t * (-152.54825 + t * 59.28144)))))
        .clamp(0.0, 1.0);
    let g = (0.09140261
        + t * (2.19418 + t * (4.84296 + t * (-14.18503 + t * (4.27805 + t * 2.53377)))))
        .clamp(0.0, 1.0);
    let b = (0.1066733
        + t * (12.64194 + t * (-60.58204 + t * (109.99648 + t * (-82.52904 + t * 20.43388)))))
        .clamp(0.0, 1.0);
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

/// Colorize a depth image for display
///
/// The colormap spans the nearest to the farthest valid sample of this
/// image. Zero means no reading and is drawn black.
pub fn depth_to_rgb(depth: &DepthImage) -> RgbImage {
    let (min_d, max_d) = depth
        .pixels()
        .map(|p| p.0[0])
        .filter(|&d| d != 0)
        .fold((u16::MAX, 0u16), |(lo, hi), d| (lo.min(d), hi.max(d)));
    let (min_depth, max_depth) = if max_d <= min_d {
        depth_preview::FALLBACK_RANGE
    } else {
        (min_d, max_d)
    };

    let range = max_depth.saturating_sub(min_depth).max(1) as f32;

    RgbImage::from_fn(depth.width(), depth.height(), |x, y| {
        let d = depth.get_pixel(x, y).0[0];
        if d == 0 {
            return image::Rgb([0, 0, 0]);
        }
        let t = (d.saturating_sub(min_depth) as f32 / range).clamp(0.0, 1.0);
        image::Rgb(turbo(t))
    })
}

/// Build a frame from bytes, for tests and the synthetic backend
pub fn frame_from_bytes(
    stream: StreamKind,
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
) -> RawFrame {
    RawFrame {
        stream,
        width,
        height,
        format,
        data: data.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(format: PixelFormat, width: u32, height: u32, data: Vec<u8>) -> RawFrame {
        frame_from_bytes(StreamKind::Color, width, height, format, data)
    }

    fn depth(format: PixelFormat, width: u32, height: u32, data: Vec<u8>) -> RawFrame {
        frame_from_bytes(StreamKind::Depth, width, height, format, data)
    }

    #[test]
    fn test_y10b_unpacking() {
        // High bytes 255,128,64,0 with low bits 3,0,0,0
        // A=1023, B=512, C=256, D=0
        let raw_data = vec![255u8, 128, 64, 0, 3];
        let depth = unpack_y10b(&raw_data, 2, 2);
        assert_eq!(depth, vec![1023, 512, 256, 0]);
    }

    #[test]
    fn test_y10b_pack_matches_kernel_layout() {
        assert_eq!(pack_y10b(&[1023, 512, 256, 0]), vec![255u8, 128, 64, 0, 3]);
        let values = [1u16, 2, 3, 1000, 513];
        assert_eq!(unpack_y10b(&pack_y10b(&values), 5, 1), values);
    }

    #[test]
    fn test_bgr_is_swapped_to_rgb() {
        let frame = color(PixelFormat::Bgr24, 2, 1, vec![1, 2, 3, 4, 5, 6]);
        let rgb = color_to_rgb(&frame).unwrap();
        assert_eq!(rgb.into_raw(), vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_yuyv_and_uyvy_white() {
        let yuyv = color(PixelFormat::Yuyv, 2, 1, vec![255, 128, 255, 128]);
        let uyvy = color(PixelFormat::Uyvy, 2, 1, vec![128, 255, 128, 255]);
        for frame in [yuyv, uyvy] {
            let rgb = color_to_rgb(&frame).unwrap();
            assert!(rgb.pixels().all(|p| p.0.iter().all(|&c| c > 250)));
        }
    }

    #[test]
    fn test_odd_pixel_count_yuyv() {
        // 3x1: one full macropixel, then a half one
        let frame = color(PixelFormat::Yuyv, 3, 1, vec![255, 128, 255, 128, 255, 128]);
        let rgb = color_to_rgb(&frame).unwrap();
        assert_eq!(rgb.dimensions(), (3, 1));
        assert!(rgb.pixels().all(|p| p.0.iter().all(|&c| c > 250)));

        let frame = color(PixelFormat::Uyvy, 3, 1, vec![128, 0, 128, 0, 128, 0, 128, 0]);
        assert_eq!(color_to_rgb(&frame).unwrap().get_pixel(2, 0).0, [0, 0, 0]);
    }

    #[test]
    fn test_y16_decodes_like_z16() {
        let data: Vec<u8> = [1000u16, 2000].iter().flat_map(|v| v.to_le_bytes()).collect();
        let z16 = depth_to_image(&depth(PixelFormat::Depth16, 2, 1, data.clone()), 1.0).unwrap();
        let y16 = depth_to_image(&depth(PixelFormat::Y16, 2, 1, data), 1.0).unwrap();
        assert_eq!(y16.into_raw(), z16.into_raw());
    }

    #[test]
    fn test_short_payload_is_malformed() {
        let frame = color(PixelFormat::Rgb24, 4, 4, vec![0; 10]);
        assert!(matches!(
            color_to_rgb(&frame),
            Err(SensorError::MalformedFrame {
                stream: StreamKind::Color,
                ..
            })
        ));
    }

    #[test]
    fn test_mjpeg_decodes() {
        let source = RgbImage::from_pixel(8, 8, image::Rgb([200, 40, 40]));
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 95)
            .encode_image(&source)
            .unwrap();

        let rgb = color_to_rgb(&color(PixelFormat::Mjpeg, 8, 8, jpeg.clone())).unwrap();
        assert_eq!(rgb.dimensions(), (8, 8));
        assert!(rgb.get_pixel(4, 4).0[0] > 150);

        // Dimension mismatch against the stream mode
        assert!(color_to_rgb(&color(PixelFormat::Mjpeg, 16, 16, jpeg)).is_err());
    }

    #[test]
    fn test_depth_scaling_rounds_and_saturates() {
        assert_eq!(scaled_depth_value(1000, 5.0), 5000);
        assert_eq!(scaled_depth_value(3, 0.5), 2);
        assert_eq!(scaled_depth_value(20000, 5.0), u16::MAX);
        assert_eq!(scaled_depth_value(0, 5.0), 0);
    }

    #[test]
    fn test_depth16_to_scaled_image() {
        let data = [1000u16, 0, 13107, 65535]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let image = depth_to_image(&depth(PixelFormat::Depth16, 2, 2, data), 5.0).unwrap();
        assert_eq!(image.into_raw(), vec![5000, 0, 65535, 65535]);
    }

    #[test]
    fn test_color_encoding_rejected_for_depth() {
        let frame = depth(PixelFormat::Rgb24, 1, 1, vec![0, 0, 0]);
        assert!(depth_to_image(&frame, 5.0).is_err());
    }

    #[test]
    fn test_depth_preview_marks_invalid_black() {
        let image = DepthImage::from_raw(3, 1, vec![0, 1000, 2000]).unwrap();
        let rgb = depth_to_rgb(&image);
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 0]);
        assert_ne!(rgb.get_pixel(1, 0), rgb.get_pixel(2, 0));
    }

    #[test]
    fn test_depth_preview_spans_image_range() {
        let image = DepthImage::from_raw(2, 1, vec![5000, 9000]).unwrap();
        let rgb = depth_to_rgb(&image);
        assert_eq!(rgb.get_pixel(0, 0).0, turbo(0.0));
        assert_eq!(rgb.get_pixel(1, 0).0, turbo(1.0));

        // A single valid depth falls back to the fixed range
        let flat = DepthImage::from_raw(1, 1, vec![10000]).unwrap();
        let (lo, hi) = depth_preview::FALLBACK_RANGE;
        let t = (10000 - lo) as f32 / (hi - lo) as f32;
        assert_eq!(depth_to_rgb(&flat).get_pixel(0, 0).0, turbo(t));
    }

    #[test]
    fn test_turbo_colormap() {
        let start = turbo(0.0);
        let mid = turbo(0.5);
        let end = turbo(1.0);

        assert_ne!(start, mid);
        assert_ne!(mid, end);
        assert!(end[0] > start[0]);
    }
}
