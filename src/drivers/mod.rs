//! Pin-level drivers and peripheral helpers.

pub mod analog;
pub mod counter;
pub mod digital;
pub mod hw_init;
pub mod pwm;
pub mod ultrasonic;
pub mod watchdog;
