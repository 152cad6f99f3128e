// SPDX-License-Identifier: GPL-3.0-only

//! TUM RGB-D style dataset layout
//!
//! ```text
//! <root>/
//!   rgb/<i>.png        8-bit RGB
//!   depth/<i>.png      16-bit grayscale, raw depth times the scale factor
//!   rgb.txt            "<i> rgb/<i>.png"
//!   depth.txt          "<i> depth/<i>.png"
//!   groundtruth.txt    "<i> 0 0 0 0 0 0 1"
//! ```
//!
//! The frame index doubles as the timestamp column. Index files are opened
//! in append mode, so capturing twice into the same root extends them.

use crate::backends::sensor::format_converters::DepthImage;
use crate::constants::dataset::{
    DEPTH_DIR, DEPTH_INDEX, GROUNDTRUTH_INDEX, IDENTITY_POSE, IMAGE_EXTENSION, RGB_DIR,
    RGB_INDEX,
};
use crate::errors::{CaptureError, CaptureResult};
use image::{ImageFormat, RgbImage};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Relative path of the color image for `index`
pub fn rgb_relative_path(index: u64) -> String {
    format!("{}/{}.{}", RGB_DIR, index, IMAGE_EXTENSION)
}

/// Relative path of the depth image for `index`
pub fn depth_relative_path(index: u64) -> String {
    format!("{}/{}.{}", DEPTH_DIR, index, IMAGE_EXTENSION)
}

/// Ground-truth line for `index` (identity pose)
pub fn groundtruth_line(index: u64) -> String {
    format!("{} {}", index, IDENTITY_POSE)
}

struct IndexFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl IndexFile {
    fn open_append(path: PathBuf) -> CaptureResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CaptureError::io(&path, e))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    fn append_line(&mut self, line: &str) -> CaptureResult<()> {
        writeln!(self.writer, "{}", line).map_err(|e| CaptureError::io(&self.path, e))
    }

    fn flush(&mut self) -> CaptureResult<()> {
        self.writer
            .flush()
            .map_err(|e| CaptureError::io(&self.path, e))
    }
}

/// Writes frames and index entries into a dataset root
///
/// An image is written before its index line, so an index never points at a
/// file that does not exist.
pub struct DatasetWriter {
    root: PathBuf,
    rgb_index: IndexFile,
    depth_index: IndexFile,
    groundtruth_index: IndexFile,
}

impl DatasetWriter {
    /// Create the directory layout and open the three index files
    pub fn create(root: &Path) -> CaptureResult<Self> {
        for dir in [root.join(RGB_DIR), root.join(DEPTH_DIR)] {
            std::fs::create_dir_all(&dir).map_err(|e| CaptureError::io(&dir, e))?;
        }

        let writer = Self {
            root: root.to_path_buf(),
            rgb_index: IndexFile::open_append(root.join(RGB_INDEX))?,
            depth_index: IndexFile::open_append(root.join(DEPTH_INDEX))?,
            groundtruth_index: IndexFile::open_append(root.join(GROUNDTRUTH_INDEX))?,
        };
        info!(root = %root.display(), "Dataset opened");
        Ok(writer)
    }

    /// Write `rgb/<index>.png` and append its rgb.txt entry
    pub fn write_color(&mut self, index: u64, image: &RgbImage) -> CaptureResult<()> {
        let relative = rgb_relative_path(index);
        let path = self.root.join(&relative);
        image
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|source| CaptureError::Image {
                path: path.clone(),
                source,
            })?;
        self.rgb_index
            .append_line(&format!("{} {}", index, relative))?;
        debug!(index, path = %path.display(), "Color frame written");
        Ok(())
    }

    /// Write `depth/<index>.png` and append its depth.txt and groundtruth.txt entries
    pub fn write_depth(&mut self, index: u64, image: &DepthImage) -> CaptureResult<()> {
        let relative = depth_relative_path(index);
        let path = self.root.join(&relative);
        image
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|source| CaptureError::Image {
                path: path.clone(),
                source,
            })?;
        self.depth_index
            .append_line(&format!("{} {}", index, relative))?;
        self.groundtruth_index.append_line(&groundtruth_line(index))?;
        debug!(index, path = %path.display(), "Depth frame written");
        Ok(())
    }

    /// Flush all index files
    pub fn flush(&mut self) -> CaptureResult<()> {
        self.rgb_index.flush()?;
        self.depth_index.flush()?;
        self.groundtruth_index.flush()
    }

    /// Flush and close the index files
    pub fn finish(mut self) -> CaptureResult<()> {
        self.flush()?;
        info!(root = %self.root.display(), "Dataset closed");
        Ok(())
    }
}

/// One `<index> <value>` line from an index file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub index: u64,
    pub value: String,
}

/// Something wrong with a dataset on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetProblem {
    /// A line that is not `<index> <value>`
    MalformedLine {
        file: &'static str,
        line: usize,
        content: String,
    },
    /// Indices in a file do not increase by one
    NonConsecutive {
        file: &'static str,
        previous: u64,
        found: u64,
    },
    /// The path column does not match the index
    UnexpectedPath {
        file: &'static str,
        index: u64,
        path: String,
    },
    /// An index line references a missing image
    MissingImage { index: u64, path: String },
    /// depth.txt and rgb.txt disagree at the same position
    IndexMismatch { position: usize, rgb: Option<u64>, depth: u64 },
    /// rgb.txt has more than one entry beyond depth.txt
    TooManyColorEntries { rgb: usize, depth: usize },
    /// groundtruth.txt does not mirror depth.txt with identity poses
    GroundTruthMismatch { position: usize, line: String },
}

impl std::fmt::Display for DatasetProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetProblem::MalformedLine {
                file,
                line,
                content,
            } => write!(f, "{}:{}: malformed line {:?}", file, line, content),
            DatasetProblem::NonConsecutive {
                file,
                previous,
                found,
            } => write!(f, "{}: index {} follows {}", file, found, previous),
            DatasetProblem::UnexpectedPath { file, index, path } => {
                write!(f, "{}: index {} points at {}", file, index, path)
            }
            DatasetProblem::MissingImage { index, path } => {
                write!(f, "index {}: {} does not exist", index, path)
            }
            DatasetProblem::IndexMismatch {
                position,
                rgb,
                depth,
            } => match rgb {
                Some(rgb) => write!(
                    f,
                    "entry {}: depth index {} but rgb index {}",
                    position, depth, rgb
                ),
                None => write!(f, "entry {}: depth index {} has no rgb entry", position, depth),
            },
            DatasetProblem::TooManyColorEntries { rgb, depth } => write!(
                f,
                "{} rgb entries for {} depth entries (at most one orphan allowed)",
                rgb, depth
            ),
            DatasetProblem::GroundTruthMismatch { position, line } => {
                write!(f, "groundtruth.txt entry {}: unexpected {:?}", position, line)
            }
        }
    }
}

/// Result of [`verify`]
#[derive(Debug, Clone, Default)]
pub struct DatasetReport {
    pub rgb: Vec<IndexEntry>,
    pub depth: Vec<IndexEntry>,
    pub groundtruth: Vec<IndexEntry>,
    /// Trailing color entry without depth, left by a depth read failure
    pub orphaned_color: Option<u64>,
    pub problems: Vec<DatasetProblem>,
}

impl DatasetReport {
    pub fn is_consistent(&self) -> bool {
        self.problems.is_empty()
    }

    /// Number of complete (color + depth) frames
    pub fn frame_count(&self) -> usize {
        self.depth.len()
    }
}

fn read_index(
    root: &Path,
    file: &'static str,
    problems: &mut Vec<DatasetProblem>,
) -> CaptureResult<Vec<IndexEntry>> {
    let path = root.join(file);
    let reader = match File::open(&path) {
        Ok(f) => BufReader::new(f),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CaptureError::io(&path, e)),
    };

    let mut entries = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| CaptureError::io(&path, e))?;
        if line.is_empty() {
            continue;
        }
        let parsed = line
            .split_once(' ')
            .and_then(|(index, value)| Some((index.parse::<u64>().ok()?, value)));
        match parsed {
            Some((index, value)) => entries.push(IndexEntry {
                index,
                value: value.to_string(),
            }),
            None => problems.push(DatasetProblem::MalformedLine {
                file,
                line: line_no + 1,
                content: line,
            }),
        }
    }

    for pair in entries.windows(2) {
        if pair[1].index != pair[0].index + 1 {
            problems.push(DatasetProblem::NonConsecutive {
                file,
                previous: pair[0].index,
                found: pair[1].index,
            });
        }
    }

    Ok(entries)
}

fn check_images(
    root: &Path,
    file: &'static str,
    entries: &[IndexEntry],
    expected_path: fn(u64) -> String,
    problems: &mut Vec<DatasetProblem>,
) {
    for entry in entries {
        if entry.value != expected_path(entry.index) {
            problems.push(DatasetProblem::UnexpectedPath {
                file,
                index: entry.index,
                path: entry.value.clone(),
            });
        }
        if !root.join(&entry.value).is_file() {
            problems.push(DatasetProblem::MissingImage {
                index: entry.index,
                path: entry.value.clone(),
            });
        }
    }
}

/// Check a dataset root for consistency
///
/// Every depth entry must have a color entry with the same index at the same
/// position, and a matching identity-pose ground-truth line. rgb.txt may run
/// one entry ahead of depth.txt; that entry is reported as an orphan, not
/// as a problem.
pub fn verify(root: &Path) -> CaptureResult<DatasetReport> {
    let mut problems = Vec::new();
    let rgb = read_index(root, RGB_INDEX, &mut problems)?;
    let depth = read_index(root, DEPTH_INDEX, &mut problems)?;
    let groundtruth = read_index(root, GROUNDTRUTH_INDEX, &mut problems)?;

    check_images(root, RGB_INDEX, &rgb, rgb_relative_path, &mut problems);
    check_images(root, DEPTH_INDEX, &depth, depth_relative_path, &mut problems);

    for (position, d) in depth.iter().enumerate() {
        let rgb_index = rgb.get(position).map(|e| e.index);
        if rgb_index != Some(d.index) {
            problems.push(DatasetProblem::IndexMismatch {
                position,
                rgb: rgb_index,
                depth: d.index,
            });
        }
    }

    let orphaned_color = match rgb.len().checked_sub(depth.len()) {
        Some(0) | None => None,
        Some(1) => rgb.last().map(|e| e.index),
        Some(_) => {
            problems.push(DatasetProblem::TooManyColorEntries {
                rgb: rgb.len(),
                depth: depth.len(),
            });
            None
        }
    };

    let expected_groundtruth = depth.iter().map(|d| groundtruth_line(d.index));
    let mut actual_groundtruth = groundtruth
        .iter()
        .map(|g| format!("{} {}", g.index, g.value));
    for (position, expected) in expected_groundtruth.enumerate() {
        match actual_groundtruth.next() {
            Some(line) if line == expected => {}
            Some(line) => problems.push(DatasetProblem::GroundTruthMismatch { position, line }),
            None => problems.push(DatasetProblem::GroundTruthMismatch {
                position,
                line: String::new(),
            }),
        }
    }
    for (offset, line) in actual_groundtruth.enumerate() {
        problems.push(DatasetProblem::GroundTruthMismatch {
            position: depth.len() + offset,
            line,
        });
    }

    Ok(DatasetReport {
        rgb,
        depth,
        groundtruth,
        orphaned_color,
        problems,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color() -> RgbImage {
        RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30]))
    }

    fn depth() -> DepthImage {
        DepthImage::from_pixel(4, 3, image::Luma([5000u16]))
    }

    #[test]
    fn test_layout_and_index_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DatasetWriter::create(dir.path()).unwrap();
        for index in 2..4 {
            writer.write_color(index, &color()).unwrap();
            writer.write_depth(index, &depth()).unwrap();
        }
        writer.finish().unwrap();

        let rgb = std::fs::read_to_string(dir.path().join("rgb.txt")).unwrap();
        assert_eq!(rgb, "2 rgb/2.png\n3 rgb/3.png\n");
        let depth_txt = std::fs::read_to_string(dir.path().join("depth.txt")).unwrap();
        assert_eq!(depth_txt, "2 depth/2.png\n3 depth/3.png\n");
        let gt = std::fs::read_to_string(dir.path().join("groundtruth.txt")).unwrap();
        assert_eq!(gt, "2 0 0 0 0 0 0 1\n3 0 0 0 0 0 0 1\n");

        let report = verify(dir.path()).unwrap();
        assert!(report.is_consistent(), "{:?}", report.problems);
        assert_eq!(report.frame_count(), 2);
        assert_eq!(report.orphaned_color, None);
    }

    #[test]
    fn test_depth_png_round_trips_16_bit() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DatasetWriter::create(dir.path()).unwrap();
        let image = DepthImage::from_raw(2, 1, vec![65535, 1234]).unwrap();
        writer.write_depth(7, &image).unwrap();
        writer.finish().unwrap();

        let loaded = image::open(dir.path().join("depth/7.png")).unwrap().into_luma16();
        assert_eq!(loaded.into_raw(), vec![65535, 1234]);
    }

    #[test]
    fn test_index_files_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rgb.txt"), "0 rgb/0.png\n").unwrap();

        let mut writer = DatasetWriter::create(dir.path()).unwrap();
        writer.write_color(1, &color()).unwrap();
        writer.finish().unwrap();

        let rgb = std::fs::read_to_string(dir.path().join("rgb.txt")).unwrap();
        assert_eq!(rgb, "0 rgb/0.png\n1 rgb/1.png\n");
    }

    #[test]
    fn test_verify_reports_single_orphan() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DatasetWriter::create(dir.path()).unwrap();
        writer.write_color(1, &color()).unwrap();
        writer.write_depth(1, &depth()).unwrap();
        writer.write_color(2, &color()).unwrap();
        writer.finish().unwrap();

        let report = verify(dir.path()).unwrap();
        assert!(report.is_consistent(), "{:?}", report.problems);
        assert_eq!(report.orphaned_color, Some(2));
    }

    #[test]
    fn test_verify_flags_missing_image_and_gap() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DatasetWriter::create(dir.path()).unwrap();
        writer.write_color(1, &color()).unwrap();
        writer.write_depth(1, &depth()).unwrap();
        writer.write_color(3, &color()).unwrap();
        writer.write_depth(3, &depth()).unwrap();
        writer.finish().unwrap();
        std::fs::remove_file(dir.path().join("rgb/3.png")).unwrap();

        let report = verify(dir.path()).unwrap();
        assert!(report.problems.contains(&DatasetProblem::MissingImage {
            index: 3,
            path: "rgb/3.png".to_string()
        }));
        assert!(report.problems.iter().any(|p| matches!(
            p,
            DatasetProblem::NonConsecutive {
                previous: 1,
                found: 3,
                ..
            }
        )));
    }

    #[test]
    fn test_verify_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let report = verify(dir.path()).unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.frame_count(), 0);
    }
}
