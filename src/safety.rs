//! Safety interlocks shared by every motor driver.
//!
//! Two interlocks guard a running driver:
//!
//! - **Proximity**: a channel linked to an ultrasonic sensor trips when it
//!   travels toward the side the sensor faces and the range is below the
//!   channel's minimum distance.
//! - **Dead-man**: a channel with an encoder trips once its pulse counter
//!   reaches the channel's duration limit. Every power command resets the
//!   counters, so the limit bounds how far a wheel may turn unsupervised.
//!
//! Both are no-ops while every channel is stopped. A trip stops the whole
//! driver, never a single channel; the stop itself is issued by the caller
//! (see `MotorControl::check_ultrasonic_shutdown`) so the cause code is
//! threaded through the driver's own emergency stop.

use log::warn;

use crate::app::ports::HardwarePort;
use crate::channel::{ChannelId, MotorCommon};
use crate::resources::ResourceRegistry;

/// Messages for fault bits 0..=7 as published under `motorfault`.
pub const FAULT_MESSAGES: [&str; 8] = [
    "Overheat",
    "Overvoltage",
    "Undervoltage",
    "Short circuit",
    "Emergency stop",
    "Sepex excitation fault",
    "MOSFET failure",
    "Startup configuration fault",
];

/// Messages for every bit set in `fault`, lowest bit first.
pub fn fault_messages(fault: i32) -> impl Iterator<Item = &'static str> {
    FAULT_MESSAGES
        .iter()
        .enumerate()
        .filter(move |(bit, _)| fault & (1 << bit) != 0)
        .map(|(_, msg)| *msg)
}

/// Channel whose linked sensor sees an obstacle in its direction of travel.
pub fn ultrasonic_trip(
    common: &MotorCommon,
    res: &ResourceRegistry,
    io: &mut dyn HardwarePort,
) -> Option<ChannelId> {
    if !common.is_running() {
        return None;
    }
    for (ch, state) in common.channels() {
        let Some(link) = state.ultrasonic else {
            continue;
        };
        if state.current_direction != link.facing {
            continue;
        }
        let Some(sensor) = res.sonics.get(link.sensor) else {
            continue;
        };
        let range = sensor.range(io);
        if range < link.min_distance {
            warn!(
                "safety: channel {} range {} cm below {} cm, stopping",
                ch, range, link.min_distance
            );
            return Some(ch);
        }
    }
    None
}

/// Channel whose encoder budget is exhausted.
pub fn encoder_trip(common: &MotorCommon) -> Option<ChannelId> {
    if !common.is_running() {
        return None;
    }
    common.channels().find_map(|(ch, state)| {
        let enc = state.encoder.as_ref()?;
        let count = enc.counter.count();
        (count >= state.duration_limit).then(|| {
            warn!("safety: channel {} encoder stall ({} pulses)", ch, count);
            ch
        })
    })
}
