//! Persistent digital pin.
//!
//! Entries in the digital arena remember the electrical mode they were
//! configured with and, for watched inputs (`M305`/`M306`), the level that
//! counts as a hit.

use embedded_hal::digital::PinState;

use crate::app::ports::{HardwarePort, PinMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalPin {
    pin: u8,
    mode: PinMode,
    target: PinState,
}

impl DigitalPin {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            mode: PinMode::Input,
            target: PinState::High,
        }
    }

    pub fn set_mode(&mut self, io: &mut dyn HardwarePort, mode: PinMode) {
        self.mode = mode;
        io.pin_mode(self.pin, mode);
    }

    pub fn write(&mut self, io: &mut dyn HardwarePort, state: PinState) {
        io.digital_write(self.pin, state);
    }

    pub fn read(&self, io: &mut dyn HardwarePort) -> PinState {
        io.digital_read(self.pin)
    }

    pub fn set_target(&mut self, target: PinState) {
        self.target = target;
    }

    /// Whether the current reading equals the watch target.
    pub fn on_target(&self, io: &mut dyn HardwarePort) -> Option<PinState> {
        let state = self.read(io);
        (state == self.target).then_some(state)
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn mode(&self) -> PinMode {
        self.mode
    }

    pub fn target(&self) -> PinState {
        self.target
    }
}

/// Protocol encoding of a pin level.
pub const fn level_code(state: PinState) -> u8 {
    match state {
        PinState::Low => 0,
        PinState::High => 1,
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::adapters::hardware::BoardHardware;

    #[test]
    fn target_match() {
        let mut hw = BoardHardware::new();
        let mut d = DigitalPin::new(30);
        d.set_mode(&mut hw, PinMode::Input);
        d.set_target(PinState::Low);
        hw.set_input(30, PinState::High);
        assert_eq!(d.on_target(&mut hw), None);
        hw.set_input(30, PinState::Low);
        assert_eq!(d.on_target(&mut hw), Some(PinState::Low));
    }

    #[test]
    fn mode_is_applied() {
        let mut hw = BoardHardware::new();
        let mut d = DigitalPin::new(31);
        d.set_mode(&mut hw, PinMode::Output);
        assert_eq!(hw.mode(31), Some(PinMode::Output));
        d.write(&mut hw, PinState::High);
        assert_eq!(hw.level(31), Some(PinState::High));
    }
}
