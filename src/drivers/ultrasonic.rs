//! Single-pin ultrasonic ranger (PING-style).
//!
//! The same pin triggers the ping and receives the echo: a clean LOW, a
//! 5 µs HIGH trigger, then the pin turns input and the echo pulse width is
//! timed. Range is reported in whole centimetres.

use embedded_hal::digital::PinState;

use crate::app::ports::{HardwarePort, PinMode};

/// Echo wait bound; beyond ~5 m the sensor reports nothing useful.
pub const ECHO_TIMEOUT_US: u32 = 30_000;

/// Round-trip microseconds to centimetres (sound at ~29 µs/cm).
pub const fn micros_to_cm(micros: u32) -> u32 {
    micros / 29 / 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ultrasonic {
    pin: u8,
    last_published: Option<u32>,
}

impl Ultrasonic {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            last_published: None,
        }
    }

    /// Fire one ping and return the range in cm (0 when no echo).
    pub fn range(&self, io: &mut dyn HardwarePort) -> u32 {
        io.pin_mode(self.pin, PinMode::Output);
        io.digital_write(self.pin, PinState::Low);
        io.delay_us(2);
        io.digital_write(self.pin, PinState::High);
        io.delay_us(5);
        io.digital_write(self.pin, PinState::Low);
        io.pin_mode(self.pin, PinMode::Input);
        micros_to_cm(io.pulse_in(self.pin, PinState::High, ECHO_TIMEOUT_US))
    }

    /// Record `range` for telemetry; returns `true` when it differs from the
    /// previously published value.
    pub fn publish(&mut self, range: u32) -> bool {
        if self.last_published == Some(range) {
            return false;
        }
        self.last_published = Some(range);
        true
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::adapters::hardware::BoardHardware;

    #[test]
    fn converts_echo_to_cm() {
        let mut hw = BoardHardware::new();
        hw.set_pulse(40, 580);
        let s = Ultrasonic::new(40);
        assert_eq!(s.range(&mut hw), 10);
        assert_eq!(hw.mode(40), Some(PinMode::Input));
        assert_eq!(hw.level(40), Some(PinState::Low));
    }

    #[test]
    fn publishes_only_changes() {
        let mut s = Ultrasonic::new(40);
        assert!(s.publish(12));
        assert!(!s.publish(12));
        assert!(s.publish(11));
    }

    #[test]
    fn conversion_truncates() {
        assert_eq!(micros_to_cm(57), 0);
        assert_eq!(micros_to_cm(58), 1);
    }
}
