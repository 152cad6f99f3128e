// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for RGB-D sensors
//!
//! # Modules
//!
//! - [`sensor`]: Sensor sessions, stream lifecycle and frame conversion

pub mod sensor;
