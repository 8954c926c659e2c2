//! Board constants for the RoboCore controller.
//!
//! Single source of truth for pin capacity, reserved pins, arena sizes and
//! the PWM timer routing. Drivers never hard-code these values.

use crate::app::ports::{CompareUnit, TimerBinding};

// ---------------------------------------------------------------------------
// Pin pool
// ---------------------------------------------------------------------------

/// Number of addressable pins tracked by the resource pool.
pub const MAX_PINS: usize = 100;

/// Power-supply control pin, `-1` when the board has none.
pub const PS_ON_PIN: i16 = -1;
/// Cooling fan pin, `-1` when the board has none.
pub const FAN_PIN: i16 = -1;

/// Pins that can never be assigned. Negative entries are placeholders for
/// absent board features and are skipped when the pool is built.
pub const SENSITIVE_PINS: [i16; 4] = [0, 1, PS_ON_PIN, FAN_PIN];

// ---------------------------------------------------------------------------
// Arena capacities
// ---------------------------------------------------------------------------

pub const PWM_SLOTS: usize = 12;
pub const DIGITAL_SLOTS: usize = 32;
pub const ANALOG_SLOTS: usize = 16;
pub const SONIC_SLOTS: usize = 10;

/// Motor and PWM-only drivers only ever scan this many leading entries of
/// the PWM and digital arenas.
pub const DRIVER_SCAN: usize = 10;

/// Channels per driver and driver slots per kind.
pub const MAX_CHANNELS: usize = 10;
pub const MAX_SLOTS: usize = 10;

// ---------------------------------------------------------------------------
// Serial ports
// ---------------------------------------------------------------------------

/// Command console baud rate.
pub const CONSOLE_BAUD: u32 = 115_200;
/// Smart motor controller link baud rate.
pub const SMART_BAUD: u32 = 115_200;

// ---------------------------------------------------------------------------
// PWM routing
// ---------------------------------------------------------------------------

/// PWM-capable pins and the timer/compare unit each one is wired to.
/// Timer 2 is the 8-bit timer and keeps a fixed wave mode.
pub const PWM_TIMER_MAP: [(u8, TimerBinding); 15] = [
    (2, TimerBinding::new(3, CompareUnit::B)),
    (3, TimerBinding::new(3, CompareUnit::C)),
    (5, TimerBinding::new(3, CompareUnit::A)),
    (6, TimerBinding::new(4, CompareUnit::A)),
    (7, TimerBinding::new(4, CompareUnit::B)),
    (8, TimerBinding::new(4, CompareUnit::C)),
    (9, TimerBinding::new(2, CompareUnit::B)),
    (10, TimerBinding::new(2, CompareUnit::A)),
    (11, TimerBinding::new(1, CompareUnit::A)),
    (12, TimerBinding::new(1, CompareUnit::B)),
    (13, TimerBinding::new(0, CompareUnit::A)),
    (4, TimerBinding::new(0, CompareUnit::B)),
    (44, TimerBinding::new(5, CompareUnit::C)),
    (45, TimerBinding::new(5, CompareUnit::B)),
    (46, TimerBinding::new(5, CompareUnit::A)),
];

/// Look up the timer a pin is wired to.
pub fn timer_for_pin(pin: u8) -> Option<TimerBinding> {
    PWM_TIMER_MAP
        .iter()
        .find(|(p, _)| *p == pin)
        .map(|(_, binding)| *binding)
}

/// Whether `pin` is in the sensitive set.
pub fn is_sensitive(pin: u8) -> bool {
    SENSITIVE_PINS
        .iter()
        .any(|&p| p >= 0 && p as u8 == pin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_map_has_unique_pins() {
        for (i, (a, _)) in PWM_TIMER_MAP.iter().enumerate() {
            for (b, _) in &PWM_TIMER_MAP[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn negative_sensitive_entries_are_skipped() {
        assert!(is_sensitive(0));
        assert!(is_sensitive(1));
        assert!(!is_sensitive(2));
        assert!(!is_sensitive(255));
    }

    #[test]
    fn timer_lookup() {
        assert_eq!(timer_for_pin(10), Some(TimerBinding::new(2, CompareUnit::A)));
        assert_eq!(timer_for_pin(22), None);
    }
}
