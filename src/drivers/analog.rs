//! Persistent analog input with an optional exclusion band.

use crate::app::ports::{HardwarePort, PinMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalogPin {
    pin: u8,
    mode: PinMode,
    low: u16,
    high: u16,
}

impl AnalogPin {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            mode: PinMode::Input,
            low: 0,
            high: 0,
        }
    }

    pub fn set_mode(&mut self, io: &mut dyn HardwarePort, mode: PinMode) {
        self.mode = mode;
        io.pin_mode(self.pin, mode);
    }

    pub fn read(&self, io: &mut dyn HardwarePort) -> u16 {
        io.analog_read(self.pin)
    }

    /// Readings inside `[low, high]` are suppressed from the watch list.
    /// A `low` of 0 disables the band.
    pub fn set_exclusion(&mut self, low: u16, high: u16) {
        self.low = low;
        self.high = high;
    }

    pub fn is_excluded(&self, value: u16) -> bool {
        self.low != 0 && (self.low..=self.high).contains(&value)
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn mode(&self) -> PinMode {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_low_disables_band() {
        let mut a = AnalogPin::new(55);
        a.set_exclusion(0, 500);
        assert!(!a.is_excluded(100));
        a.set_exclusion(100, 200);
        assert!(a.is_excluded(100));
        assert!(a.is_excluded(200));
        assert!(!a.is_excluded(201));
    }
}
