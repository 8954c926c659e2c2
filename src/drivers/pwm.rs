//! PWM timer channel bound to one pin.
//!
//! `init` resolves the timer/compare unit the pin is wired to. Pins with no
//! timer still accept duty writes, which degrade to a plain HIGH/LOW at the
//! 50% threshold. Writing a duty of 0 disconnects the compare output and
//! drives the pin LOW, since some fast-PWM modes emit a narrow spike at a
//! zero compare value.

use embedded_hal::digital::PinState;

use crate::app::ports::{HardwarePort, InterruptSource, OutputMode, PinMode, TimerBinding};
use crate::drivers::counter::InterruptHook;

/// Timer 2 is the 8-bit timer with its own fast-PWM encoding.
const EIGHT_BIT_TIMER: u8 = 2;

/// Waveform generation mode for a resolution on a timer.
pub const fn wave_mode_for(timer: u8, bits: u8) -> u8 {
    if timer == EIGHT_BIT_TIMER {
        return 0b0011;
    }
    match bits {
        9 => 0b0110,
        10 => 0b0111,
        _ => 0b0101,
    }
}

#[derive(Debug, Clone)]
pub struct PwmTimerChannel {
    pin: u8,
    binding: Option<TimerBinding>,
    prescale: u8,
    resolution: u8,
    duty: u16,
    output: OutputMode,
    counter_source: Option<InterruptSource>,
}

impl PwmTimerChannel {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            binding: None,
            prescale: 1,
            resolution: 8,
            duty: 0,
            output: OutputMode::Stop,
            counter_source: None,
        }
    }

    /// Switch the pin to output and bind it to its timer.
    pub fn init(&mut self, io: &mut dyn HardwarePort) {
        io.pin_mode(self.pin, PinMode::Output);
        self.binding = io.timer_for(self.pin);
    }

    pub fn set_prescale(&mut self, io: &mut dyn HardwarePort, prescale: u8) {
        self.prescale = prescale;
        if let Some(binding) = self.binding {
            io.timer_configure(binding, prescale, wave_mode_for(binding.timer, self.resolution));
        }
    }

    /// Change the compare register width. Zeroes the compare value.
    pub fn set_resolution(&mut self, io: &mut dyn HardwarePort, bits: u8) {
        self.resolution = bits;
        if let Some(binding) = self.binding {
            io.timer_configure(binding, self.prescale, wave_mode_for(binding.timer, bits));
            io.timer_write(binding, self.output, 0);
            self.duty = 0;
        }
    }

    pub fn write_duty(&mut self, io: &mut dyn HardwarePort, duty: u16, mode: OutputMode) {
        let mode = if duty == 0 {
            io.digital_write(self.pin, PinState::Low);
            OutputMode::Stop
        } else {
            mode
        };
        self.duty = duty;
        self.output = mode;
        match self.binding {
            Some(binding) => io.timer_write(binding, mode, duty),
            None => {
                let level = if duty < 128 { PinState::Low } else { PinState::High };
                io.digital_write(self.pin, level);
            }
        }
    }

    /// Disconnect the compare output and hold the pin LOW.
    pub fn off(&mut self, io: &mut dyn HardwarePort) {
        if let Some(binding) = self.binding {
            io.timer_write(binding, OutputMode::Stop, self.duty);
        }
        io.digital_write(self.pin, PinState::Low);
        self.output = OutputMode::Stop;
    }

    /// Count timer cycles into `hook`, on overflow or on this pin's compare
    /// match. Returns `false` when the pin has no timer.
    pub fn attach_counter(&mut self, io: &mut dyn HardwarePort, hook: InterruptHook, overflow: bool) -> bool {
        let Some(binding) = self.binding else {
            return false;
        };
        let source = if overflow {
            InterruptSource::Overflow(binding.timer)
        } else {
            InterruptSource::CompareMatch(binding)
        };
        io.attach_interrupt(source, hook);
        self.counter_source = Some(source);
        true
    }

    pub fn detach_counter(&mut self, io: &mut dyn HardwarePort) {
        if let Some(source) = self.counter_source.take() {
            io.detach_interrupt(source);
        }
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn binding(&self) -> Option<TimerBinding> {
        self.binding
    }

    pub fn prescale(&self) -> u8 {
        self.prescale
    }

    pub fn resolution(&self) -> u8 {
        self.resolution
    }

    pub fn duty(&self) -> u16 {
        self.duty
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output
    }

    /// Electrical mode of the pin; PWM pins are always outputs.
    pub fn pin_mode(&self) -> PinMode {
        PinMode::Output
    }
}
