//! Application boundary.
//!
//! The dispatcher, drivers and interlocks never touch registers directly.
//! Every interaction with pins, timers, UARTs and flash goes through the
//! **port traits** defined in [`ports`], keeping the domain testable on the
//! host against the simulation adapters.

pub mod ports;
