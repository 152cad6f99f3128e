// SPDX-License-Identifier: GPL-3.0-only

//! Exposure and white balance controls for the color node
//!
//! The color sensor is switched from auto to manual exposure at an offset
//! from the value the auto-exposure loop had settled on. The `v4l` crate
//! does not expose control queries with ranges, so this talks to the
//! driver through raw ioctls on one open file descriptor.

use crate::errors::{SensorError, SensorResult};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use tracing::{debug, info, warn};

const CLASS_USER_BASE: u32 = 0x0098_0900;
const CLASS_CAMERA_BASE: u32 = 0x009a_0900;

/// Automatic white balance (boolean)
pub const CID_AUTO_WHITE_BALANCE: u32 = CLASS_USER_BASE + 12;
/// Exposure mode menu
pub const CID_EXPOSURE_AUTO: u32 = CLASS_CAMERA_BASE + 1;
/// Exposure time in 100µs units
pub const CID_EXPOSURE_ABSOLUTE: u32 = CLASS_CAMERA_BASE + 2;

/// `V4L2_EXPOSURE_MANUAL` entry of the exposure mode menu
const EXPOSURE_MODE_MANUAL: i32 = 1;
const FLAG_DISABLED: u32 = 0x0001;

// _IOWR('V', nr, size)
const VIDIOC_G_CTRL: libc::c_ulong = 0xC008_561B;
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008_561C;
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC044_5624;

#[repr(C)]
#[derive(Default)]
struct RawControl {
    id: u32,
    value: i32,
}

#[repr(C)]
#[derive(Default)]
struct RawQueryCtrl {
    id: u32,
    kind: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

/// Range of an enabled control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRange {
    pub name: String,
    pub minimum: i32,
    pub maximum: i32,
    pub default_value: i32,
}

impl ControlRange {
    pub fn clamp(&self, value: i32) -> i32 {
        value.clamp(self.minimum, self.maximum.max(self.minimum))
    }
}

/// An open V4L2 node used for control ioctls
pub struct ControlDevice {
    path: String,
    file: File,
}

impl ControlDevice {
    pub fn open(path: &str) -> SensorResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| SensorError::Backend(format!("Cannot open {}: {}", path, e)))?;
        Ok(Self {
            path: path.to_string(),
            file,
        })
    }

    /// Range of a control, or `None` if the driver lacks it or has it disabled
    pub fn range(&self, id: u32) -> Option<ControlRange> {
        let mut query = RawQueryCtrl {
            id,
            ..RawQueryCtrl::default()
        };
        // SAFETY: the struct matches the kernel's v4l2_queryctrl layout
        let rc = unsafe {
            libc::ioctl(self.file.as_raw_fd(), VIDIOC_QUERYCTRL, &mut query as *mut RawQueryCtrl)
        };
        if rc < 0 || query.flags & FLAG_DISABLED != 0 {
            return None;
        }

        let len = query.name.iter().position(|&b| b == 0).unwrap_or(32);
        Some(ControlRange {
            name: String::from_utf8_lossy(&query.name[..len]).into_owned(),
            minimum: query.minimum,
            maximum: query.maximum,
            default_value: query.default_value,
        })
    }

    pub fn get(&self, id: u32) -> Option<i32> {
        let mut ctrl = RawControl { id, value: 0 };
        // SAFETY: the struct matches the kernel's v4l2_control layout
        let rc = unsafe {
            libc::ioctl(self.file.as_raw_fd(), VIDIOC_G_CTRL, &mut ctrl as *mut RawControl)
        };
        if rc < 0 {
            debug!(path = %self.path, id, "VIDIOC_G_CTRL failed");
            return None;
        }
        Some(ctrl.value)
    }

    pub fn set(&self, id: u32, value: i32) -> SensorResult<()> {
        let mut ctrl = RawControl { id, value };
        // SAFETY: as in `get`
        let rc = unsafe {
            libc::ioctl(self.file.as_raw_fd(), VIDIOC_S_CTRL, &mut ctrl as *mut RawControl)
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            warn!(path = %self.path, id, value, error = %err, "VIDIOC_S_CTRL failed");
            return Err(SensorError::Backend(format!(
                "Cannot set control {:#x} on {}: {}",
                id, self.path, err
            )));
        }
        Ok(())
    }
}

/// Turn off auto white balance and fix exposure at `delta` from the auto value
///
/// Returns the exposure value that was written.
pub fn apply_exposure_bias(device_path: &str, delta: i32) -> SensorResult<i32> {
    let device = ControlDevice::open(device_path)
        .map_err(|e| SensorError::ControlUnsupported(e.to_string()))?;
    let exposure = device.range(CID_EXPOSURE_ABSOLUTE).ok_or_else(|| {
        SensorError::ControlUnsupported(format!("{} has no absolute exposure control", device_path))
    })?;

    if device.range(CID_AUTO_WHITE_BALANCE).is_some() {
        device.set(CID_AUTO_WHITE_BALANCE, 0)?;
    } else {
        debug!(device_path, "No auto white balance control");
    }

    // Must be read while auto exposure is still active
    let baseline = device
        .get(CID_EXPOSURE_ABSOLUTE)
        .unwrap_or(exposure.default_value);

    if device.range(CID_EXPOSURE_AUTO).is_some() {
        device.set(CID_EXPOSURE_AUTO, EXPOSURE_MODE_MANUAL)?;
    }

    let target = exposure.clamp(baseline.saturating_add(delta));
    device.set(CID_EXPOSURE_ABSOLUTE, target)?;

    info!(device_path, baseline, target, "Manual exposure set");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_ids() {
        assert_eq!(CID_EXPOSURE_AUTO, 0x009a0901);
        assert_eq!(CID_EXPOSURE_ABSOLUTE, 0x009a0902);
        assert_eq!(CID_AUTO_WHITE_BALANCE, 0x0098090c);
    }

    #[test]
    fn test_ioctl_struct_sizes() {
        assert_eq!(std::mem::size_of::<RawControl>(), 8);
        assert_eq!(std::mem::size_of::<RawQueryCtrl>(), 68);
    }

    #[test]
    fn test_range_clamp() {
        let range = ControlRange {
            name: "Exposure".to_string(),
            minimum: 3,
            maximum: 2047,
            default_value: 250,
        };
        assert_eq!(range.clamp(2100), 2047);
        assert_eq!(range.clamp(-5), 3);
        assert_eq!(range.clamp(350), 350);
    }

    #[test]
    fn test_missing_device_is_unsupported() {
        assert!(ControlDevice::open("/dev/does-not-exist").is_err());
        assert!(matches!(
            apply_exposure_bias("/dev/does-not-exist", 100),
            Err(SensorError::ControlUnsupported(_))
        ));
    }
}
