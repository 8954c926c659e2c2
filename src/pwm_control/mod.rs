//! PWM-only drivers for loads with no reverse phase (LEDs, pumps).
//!
//! These share the channel and arena model of the motor drivers but carry
//! no direction, encoder or proximity state. Levels arrive in the motor
//! range (-1000..=1000) and are offset to 0..=2000 before scaling.

pub mod variable_pwm;

use crate::channel::ChannelId;
use crate::error::{DriverFault, Result};
use crate::pins::MAX_CHANNELS;
use crate::propulsion::DriveContext;

pub use variable_pwm::VariablePwmDriver;

/// Default level cap; `M500`-style config may lower it.
pub const DEFAULT_MAX_LEVEL: i32 = 2000;

/// State every PWM-only driver carries.
#[derive(Debug, Clone)]
pub struct PwmCommon {
    levels: [i32; MAX_CHANNELS],
    min_level: [i32; MAX_CHANNELS],
    duration: [u32; MAX_CHANNELS],
    channel_count: u8,
    pub max_level: i32,
    pub power_scale: i32,
    pub shutdown: bool,
    pub fault_flag: i32,
    pub status_flag: i32,
}

impl Default for PwmCommon {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEVEL)
    }
}

impl PwmCommon {
    pub fn new(max_level: i32) -> Self {
        Self {
            levels: [0; MAX_CHANNELS],
            min_level: [0; MAX_CHANNELS],
            duration: [u32::MAX; MAX_CHANNELS],
            channel_count: 0,
            max_level,
            power_scale: 0,
            shutdown: false,
            fault_flag: 0,
            status_flag: 0,
        }
    }

    pub fn level(&self, ch: ChannelId) -> i32 {
        self.levels[ch.index()]
    }

    pub fn set_level(&mut self, ch: ChannelId, level: i32) {
        self.levels[ch.index()] = level;
    }

    pub fn min_level(&self, ch: ChannelId) -> i32 {
        self.min_level[ch.index()]
    }

    pub fn duration(&self, ch: ChannelId) -> u32 {
        self.duration[ch.index()]
    }

    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    pub fn include_channel(&mut self, ch: ChannelId) {
        if self.channel_count < ch.number() {
            self.channel_count = ch.number();
        }
    }

    pub fn reset_levels(&mut self) {
        self.levels = [0; MAX_CHANNELS];
    }
}

pub trait PwmControl {
    fn common(&self) -> &PwmCommon;

    fn common_mut(&mut self) -> &mut PwmCommon;

    /// Drive `ch` at `level` (-1000..=1000).
    fn command_level(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId, level: i32) -> Result<()>;

    fn emergency_stop(&mut self, ctx: &mut DriveContext<'_>, status: i32) -> i32;

    fn describe(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId) -> String;

    fn release(&mut self, ctx: &mut DriveContext<'_>);

    fn is_connected(&self) -> bool {
        true
    }

    fn query_fault(&self) -> i32 {
        self.common().fault_flag
    }

    fn query_status(&self) -> i32 {
        self.common().status_flag
    }

    fn set_shutdown(&mut self, ctx: &mut DriveContext<'_>) {
        self.emergency_stop(ctx, DriverFault::Shutdown.code());
        self.common_mut().shutdown = true;
    }

    fn set_run(&mut self, ctx: &mut DriveContext<'_>) {
        self.emergency_stop(ctx, DriverFault::Resume.code());
        self.common_mut().shutdown = false;
    }

    /// Minimum level in duty units, stored as given.
    fn set_min_level(&mut self, ch: ChannelId, level: i32) {
        self.common_mut().min_level[ch.index()] = level;
    }

    fn set_max_level(&mut self, level: i32) {
        self.common_mut().max_level = level;
    }

    fn set_power_scale(&mut self, scale: i32) {
        self.common_mut().power_scale = scale;
    }

    fn set_duration(&mut self, ch: ChannelId, duration: u32) {
        self.common_mut().duration[ch.index()] = duration;
    }
}
