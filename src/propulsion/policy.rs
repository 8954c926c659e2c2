//! Direction and power-shaping policies shared by the drivers.
//!
//! Each bridge topology realises a direction change differently (a
//! direction pin, a swapped input, a switched pin) but they all agree on
//! when a flip happens and on how a signed command becomes an output
//! magnitude. Those shared rules live here as plain functions so the
//! drivers only map the outcome onto their own pins.

use embedded_hal::digital::PinState;

use crate::channel::Direction;

/// Outcome of applying a signed command to the current direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Steering {
    pub direction: Direction,
    pub flipped: bool,
    /// Unsigned command magnitude.
    pub magnitude: i32,
}

/// Positive power drives forward, negative reverse, zero keeps the current
/// direction.
pub fn steer(current: Direction, power: i32) -> Steering {
    let wanted = match power.signum() {
        1 => Direction::Forward,
        -1 => Direction::Reverse,
        _ => current,
    };
    Steering {
        direction: wanted,
        flipped: wanted != current,
        magnitude: power.saturating_abs(),
    }
}

/// Direction-pin level for `direction` on a motor whose default direction
/// may mirror the wiring.
pub fn direction_pin_level(direction: Direction, default: Direction) -> PinState {
    PinState::from(direction.is_forward() != default.is_forward())
}

/// Which of the two bridge inputs (0 = A, 1 = B) carries drive.
pub fn input_offset(direction: Direction, default: Direction) -> usize {
    usize::from(direction.is_forward() != default.is_forward())
}

/// How a driver stores min/max/scale settings received from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerScaling {
    /// PWM-style drivers keep settings in 0..255 duty units: `|v| / 4`.
    Quartered,
    /// The smart controller works in its native -1000..1000 units.
    Raw,
}

impl PowerScaling {
    pub fn apply(self, value: i32) -> i32 {
        match self {
            Self::Quartered => value.saturating_abs() / 4,
            Self::Raw => value,
        }
    }
}

/// Duty for a command magnitude on a PWM-style driver: scale -1000..1000 to
/// duty units, lift to the channel minimum, cap at the maximum, then divide
/// by the scale divisor when one is set.
pub fn shape_duty(magnitude: i32, min_power: i32, max_power: i32, scale: i32) -> i32 {
    let mut p = magnitude / 4;
    if p != 0 && p < min_power {
        p = min_power;
    }
    if p > max_power {
        p = max_power;
    }
    if scale != 0 {
        p /= scale;
    }
    p
}
