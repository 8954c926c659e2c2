//! Channel addressing and the per-channel state shared by every driver.
//!
//! Channels are numbered 1..=10 on the wire and stored 0..=9. [`ChannelId`]
//! is the only way into the per-channel arrays, so the off-by-one lives in
//! exactly one place.

use std::sync::Arc;

use crate::drivers::counter::PulseCounter;
use crate::error::ResourceError;
use crate::pins::MAX_CHANNELS;

/// Encoder pulses allowed between power commands before a stall stop.
pub const DEFAULT_DURATION: u32 = 4;

// ── Channel identity ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u8);

impl ChannelId {
    /// Validate an external channel number (1..=10).
    pub fn new(number: i64) -> Result<Self, ResourceError> {
        match u8::try_from(number) {
            Ok(n) if (1..=MAX_CHANNELS as u8).contains(&n) => Ok(Self(n)),
            _ => Err(ResourceError::InvalidChannel(number)),
        }
    }

    /// Channel for an internal array index (0..=9).
    pub fn from_index(index: usize) -> Option<Self> {
        (index < MAX_CHANNELS).then(|| Self(index as u8 + 1))
    }

    /// Internal array index.
    pub const fn index(self) -> usize {
        self.0 as usize - 1
    }

    /// External channel number.
    pub const fn number(self) -> u8 {
        self.0
    }

    /// Every channel from 1 through `count`.
    pub fn up_to(count: u8) -> impl Iterator<Item = Self> {
        (1..=count.min(MAX_CHANNELS as u8)).map(Self)
    }
}

impl core::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Direction ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Reverse,
    Forward,
}

impl Direction {
    /// Protocol flag: 0 is reverse, anything else forward.
    pub const fn from_flag(flag: i64) -> Self {
        if flag == 0 { Self::Reverse } else { Self::Forward }
    }

    pub const fn code(self) -> u8 {
        match self {
            Self::Reverse => 0,
            Self::Forward => 1,
        }
    }

    pub const fn is_forward(self) -> bool {
        matches!(self, Self::Forward)
    }
}

// ── Per-channel state ─────────────────────────────────────────

/// Proximity sensor linked to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UltrasonicLink {
    /// Index in the ultrasonic arena.
    pub sensor: usize,
    /// Direction of travel the sensor looks into.
    pub facing: Direction,
    /// Range (cm) below which travel toward the sensor stops.
    pub min_distance: u32,
}

/// Wheel encoder feeding a pulse counter from its pin-change interrupt.
#[derive(Debug, Clone)]
pub struct Encoder {
    pub pin: u8,
    pub counter: Arc<PulseCounter>,
}

#[derive(Debug, Clone)]
pub struct ChannelState {
    /// Last commanded speed (-1000..=1000) or level (0..=2000).
    pub speed: i32,
    pub current_direction: Direction,
    /// Mirrors the command sense for a physically reversed motor.
    pub default_direction: Direction,
    pub min_power: i32,
    /// Encoder pulses allowed before a stall stop.
    pub duration_limit: u32,
    pub ultrasonic: Option<UltrasonicLink>,
    pub encoder: Option<Encoder>,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            speed: 0,
            current_direction: Direction::Reverse,
            default_direction: Direction::Reverse,
            min_power: 0,
            duration_limit: DEFAULT_DURATION,
            ultrasonic: None,
            encoder: None,
        }
    }
}

// ── Driver-wide state ─────────────────────────────────────────

/// State every motor driver carries regardless of topology.
#[derive(Debug, Clone)]
pub struct MotorCommon {
    channels: [ChannelState; MAX_CHANNELS],
    channel_count: u8,
    /// Output cap in the driver's final units.
    pub max_power: i32,
    /// Divisor applied after capping, 0 disables.
    pub power_scale: i32,
    /// Override: power commands succeed without moving anything.
    pub shutdown: bool,
    /// Sticky fault bits, 0 after a successful command.
    pub fault_flag: i32,
    pub status_flag: i32,
}

impl MotorCommon {
    pub fn new(max_power: i32) -> Self {
        Self {
            channels: core::array::from_fn(|_| ChannelState::default()),
            channel_count: 0,
            max_power,
            power_scale: 0,
            shutdown: false,
            fault_flag: 0,
            status_flag: 0,
        }
    }

    pub fn channel(&self, ch: ChannelId) -> &ChannelState {
        &self.channels[ch.index()]
    }

    pub fn channel_mut(&mut self, ch: ChannelId) -> &mut ChannelState {
        &mut self.channels[ch.index()]
    }

    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &ChannelState)> {
        self.channels
            .iter()
            .enumerate()
            .filter_map(|(i, c)| ChannelId::from_index(i).map(|id| (id, c)))
    }

    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    pub fn set_channel_count(&mut self, count: u8) {
        self.channel_count = count;
    }

    /// Creating channel `ch` raises the count to at least `ch`.
    pub fn include_channel(&mut self, ch: ChannelId) {
        if self.channel_count < ch.number() {
            self.channel_count = ch.number();
        }
    }

    /// Whether any channel has a nonzero commanded speed.
    pub fn is_running(&self) -> bool {
        self.channels.iter().any(|c| c.speed != 0)
    }

    pub fn reset_speeds(&mut self) {
        for c in &mut self.channels {
            c.speed = 0;
        }
    }

    pub fn reset_encoders(&self) {
        for c in &self.channels {
            if let Some(enc) = &c.encoder {
                enc.counter.reset();
            }
        }
    }

    /// Encoder count of `ch`, -1 without an encoder.
    pub fn encoder_count(&self, ch: ChannelId) -> i64 {
        self.channel(ch)
            .encoder
            .as_ref()
            .map_or(-1, |e| i64::from(e.counter.count()))
    }

    /// Number of channels with a linked proximity sensor.
    pub fn total_ultrasonics(&self) -> usize {
        self.channels.iter().filter(|c| c.ultrasonic.is_some()).count()
    }
}
