//! RoboCore motor controller firmware library.
//!
//! Exposes the pure-logic modules for integration testing and the fuzz
//! harness. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module; host builds run the
//! same dispatcher over simulation adapters.

#![deny(unused_must_use)]

pub mod app;
pub mod channel;
pub mod config;
pub mod error;
pub mod hall;
pub mod pins;
pub mod propulsion;
pub mod protocol;
pub mod pwm_control;
pub mod resources;
pub mod safety;

// Hardware-facing modules; the ESP32 paths are cfg-gated inside.
pub mod adapters;
pub mod drivers;

pub use error::{Error, Result};
pub use protocol::{Board, Controller};
