//! Motor drivers and the contract they share.
//!
//! ```text
//!   Dispatcher ──▶ MotorDriver slot ──▶ &mut dyn MotorControl
//!                                          │
//!                 ┌──────────────┬─────────┴────┬───────────────┐
//!              HBridge      SplitBridge    SwitchBridge    SmartSerial
//! ```
//!
//! Every driver owns a [`MotorCommon`] record and implements the topology-
//! specific operations; setters, encoder wiring and the safety checks are
//! provided methods on [`MotorControl`] that work on that record. Drivers
//! hold arena indices into the [`ResourceRegistry`], which arrives with
//! the board I/O in a [`DriveContext`] on every call.

pub mod hbridge;
pub mod policy;
pub mod smart_serial;
pub mod split_bridge;
pub mod switch_bridge;

use std::sync::Arc;

use log::{error, info};

use crate::app::ports::{HardwarePort, InterruptSource, PinMode, SerialLink};
use crate::channel::{ChannelId, Direction, Encoder, MotorCommon, UltrasonicLink};
use crate::drivers::counter::{InterruptHook, PulseCounter};
use crate::error::{ResourceError, Result};
use crate::pins::DRIVER_SCAN;
use crate::resources::ResourceRegistry;
use crate::safety;

pub use hbridge::HBridgeDriver;
pub use policy::PowerScaling;
pub use smart_serial::SmartSerialDriver;
pub use split_bridge::SplitBridgeDriver;
pub use switch_bridge::SwitchBridgeDriver;

/// Everything a driver touches besides its own state.
pub struct DriveContext<'a> {
    pub res: &'a mut ResourceRegistry,
    pub io: &'a mut dyn HardwarePort,
    pub link: &'a mut dyn SerialLink,
}

/// PWM routing of one channel: arena index plus timer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmDrive {
    pub pwm: Option<usize>,
    /// Direction or enable pin, 0 when unset.
    pub aux_pin: u8,
    pub prescale: u8,
    pub resolution: u8,
}

impl Default for PwmDrive {
    fn default() -> Self {
        Self {
            pwm: None,
            aux_pin: 0,
            prescale: 1,
            resolution: 8,
        }
    }
}

/// Re-initialise a PWM arena entry with the channel's timer settings.
pub(crate) fn prime_pwm(ctx: &mut DriveContext<'_>, idx: usize, prescale: u8, resolution: u8) -> bool {
    let Some(pwm) = ctx.res.pwms.get_mut(idx) else {
        return false;
    };
    pwm.init(ctx.io);
    pwm.set_prescale(ctx.io, prescale);
    pwm.set_resolution(ctx.io, resolution);
    true
}

/// Shaped duty as a compare value.
pub(crate) fn duty_units(duty: i32) -> u16 {
    u16::try_from(duty.max(0)).unwrap_or(u16::MAX)
}

/// Claim a pin and give it a PWM arena entry among the driver-scanned slots.
pub(crate) fn claim_pwm(ctx: &mut DriveContext<'_>, pin: u8, idx: usize) -> Result<()> {
    if !ctx.res.pins.assign(pin) {
        return Err(ResourceError::PinUnavailable(pin).into());
    }
    let mut pwm = crate::drivers::pwm::PwmTimerChannel::new(pin);
    pwm.init(ctx.io);
    ctx.res.pwms.insert(idx, pwm)?;
    Ok(())
}

/// Claim an output pin in the digital arena, or reuse its entry when the
/// pin is already a driver output (shared enable lines).
pub(crate) fn claim_output(ctx: &mut DriveContext<'_>, pin: u8, shareable: bool) -> Result<usize> {
    if ctx.res.pins.assign(pin) {
        let idx = match ctx.res.digitals.first_free(DRIVER_SCAN) {
            Some(idx) => idx,
            None => {
                ctx.res.pins.unassign(pin);
                return Err(ResourceError::ArenaFull.into());
            }
        };
        let mut d = crate::drivers::digital::DigitalPin::new(pin);
        d.set_mode(ctx.io, PinMode::Output);
        ctx.res.digitals.insert(idx, d)?;
        return Ok(idx);
    }
    if shareable {
        if let Some(idx) = ctx.res.digital_index_within(pin, DRIVER_SCAN) {
            return Ok(idx);
        }
    }
    Err(ResourceError::PinUnavailable(pin).into())
}

/// Drop a PWM arena entry and return its pin to the pool.
pub(crate) fn release_pwm(ctx: &mut DriveContext<'_>, idx: usize) {
    if let Some(mut pwm) = ctx.res.pwms.take(idx) {
        pwm.detach_counter(ctx.io);
        pwm.off(ctx.io);
        ctx.res.pins.unassign(pwm.pin());
    }
}

/// Append `0=p,1=p,..,9=p` for the driver-scanned digital entries (0 when
/// empty).
pub(crate) fn write_pin_listing(res: &ResourceRegistry, out: &mut String) {
    use core::fmt::Write as _;
    for i in 0..DRIVER_SCAN {
        if i > 0 {
            out.push(',');
        }
        let pin = res.digitals.get(i).map_or(0, |d| d.pin());
        let _ = write!(out, "{}={}", i, pin);
    }
}

/// Drop the digital entry for `pin` (if any) and return the pin.
pub(crate) fn release_digital_pin(ctx: &mut DriveContext<'_>, pin: u8) {
    if let Some(idx) = ctx.res.digital_index_within(pin, DRIVER_SCAN) {
        ctx.res.digitals.take(idx);
        ctx.res.pins.unassign(pin);
    }
}

// ───────────────────────────────────────────────────────────────
// Motor control contract
// ───────────────────────────────────────────────────────────────

pub trait MotorControl {
    fn common(&self) -> &MotorCommon;

    fn common_mut(&mut self) -> &mut MotorCommon;

    /// Drive `ch` at `power` (-1000..=1000).
    fn command_power(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId, power: i32) -> Result<()>;

    /// Zero every channel, reset speeds and counters, set fault 16 and hand
    /// `status` back unchanged.
    fn emergency_stop(&mut self, ctx: &mut DriveContext<'_>, status: i32) -> i32;

    fn is_connected(&mut self, ctx: &mut DriveContext<'_>) -> bool;

    fn query_fault(&mut self, ctx: &mut DriveContext<'_>) -> i32;

    fn query_status(&mut self, ctx: &mut DriveContext<'_>) -> i32;

    /// Diagnostic dump of the channel's pin assignment.
    fn describe(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId) -> String;

    /// Return every pin the driver holds to the pool.
    fn release(&mut self, ctx: &mut DriveContext<'_>);

    /// How min/max/scale settings are stored.
    fn power_scaling(&self) -> PowerScaling;

    fn default_max_power(&self) -> i32;

    // ── Provided ──────────────────────────────────────────────

    /// Override: stop and make power commands no-ops.
    fn set_shutdown(&mut self, ctx: &mut DriveContext<'_>) {
        self.emergency_stop(ctx, crate::error::DriverFault::Shutdown.code());
        self.common_mut().shutdown = true;
    }

    fn set_run(&mut self, ctx: &mut DriveContext<'_>) {
        self.emergency_stop(ctx, crate::error::DriverFault::Resume.code());
        self.common_mut().shutdown = false;
    }

    fn set_min_power(&mut self, ch: ChannelId, power: i32) {
        let value = self.power_scaling().apply(power);
        self.common_mut().channel_mut(ch).min_power = value;
    }

    fn set_max_power(&mut self, power: i32) {
        let value = self.power_scaling().apply(power);
        self.common_mut().max_power = value;
    }

    fn reset_max_power(&mut self) {
        let value = self.default_max_power();
        self.common_mut().max_power = value;
    }

    fn set_power_scale(&mut self, scale: i32) {
        let value = self.power_scaling().apply(scale);
        self.common_mut().power_scale = value;
    }

    fn set_default_direction(&mut self, ch: ChannelId, dir: Direction) {
        self.common_mut().channel_mut(ch).default_direction = dir;
    }

    /// Encoder budget for `ch`; an attached counter adopts it immediately.
    fn set_duration(&mut self, ch: ChannelId, limit: u32) {
        let state = self.common_mut().channel_mut(ch);
        state.duration_limit = limit;
        if let Some(enc) = &state.encoder {
            enc.counter.set_max(limit);
        }
    }

    /// Link the ultrasonic sensor on `sensor_pin`. The link lands on `ch`
    /// when given, else on the channel numbered after the sensor's arena
    /// slot.
    fn link_distance_sensor(
        &mut self,
        res: &ResourceRegistry,
        sensor_pin: u8,
        min_distance: u32,
        facing: Direction,
        ch: Option<ChannelId>,
    ) -> Result<ChannelId> {
        let sensor = res
            .sonic_index(sensor_pin)
            .filter(|&i| i < DRIVER_SCAN)
            .ok_or(ResourceError::PinUnavailable(sensor_pin))?;
        let target = match ch {
            Some(ch) => ch,
            None => ChannelId::from_index(sensor).ok_or(ResourceError::SlotEmpty)?,
        };
        self.common_mut().channel_mut(target).ultrasonic = Some(UltrasonicLink {
            sensor,
            facing,
            min_distance,
        });
        info!("motor: sensor pin {} linked to channel {}", sensor_pin, target);
        Ok(target)
    }

    /// Count pin changes on `pin` into a pulse counter for `ch`.
    fn create_encoder(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId, pin: u8) -> Result<()> {
        if let Some(old) = self.common_mut().channel_mut(ch).encoder.take() {
            ctx.io.detach_interrupt(InterruptSource::PinChange(old.pin));
            ctx.res.pins.unassign(old.pin);
        }
        if !ctx.res.pins.assign(pin) {
            return Err(ResourceError::PinUnavailable(pin).into());
        }
        let state = self.common_mut().channel_mut(ch);
        let counter = Arc::new(PulseCounter::new(state.duration_limit));
        ctx.io.pin_mode(pin, PinMode::Input);
        ctx.io.attach_interrupt(
            InterruptSource::PinChange(pin),
            InterruptHook::Counter(Arc::clone(&counter)),
        );
        state.encoder = Some(Encoder { pin, counter });
        info!("motor: encoder on pin {} for channel {}", pin, ch);
        Ok(())
    }

    /// Detach every encoder and return its pin.
    fn release_encoders(&mut self, ctx: &mut DriveContext<'_>) {
        for idx in 0..crate::pins::MAX_CHANNELS {
            let Some(ch) = ChannelId::from_index(idx) else {
                continue;
            };
            if let Some(enc) = self.common_mut().channel_mut(ch).encoder.take() {
                ctx.io.detach_interrupt(InterruptSource::PinChange(enc.pin));
                ctx.res.pins.unassign(enc.pin);
            }
        }
    }

    /// Proximity interlock; stops the driver with code 8 on a trip.
    fn check_ultrasonic_shutdown(&mut self, ctx: &mut DriveContext<'_>) -> bool {
        if safety::ultrasonic_trip(self.common(), ctx.res, ctx.io).is_some() {
            error!("motor: ultrasonic interlock tripped");
            self.emergency_stop(ctx, crate::error::DriverFault::UltrasonicVeto.code());
            return true;
        }
        false
    }

    /// Dead-man interlock; stops the driver with code 10 on a trip.
    fn check_encoder_shutdown(&mut self, ctx: &mut DriveContext<'_>) -> bool {
        if safety::encoder_trip(self.common()).is_some() {
            error!("motor: encoder interlock tripped");
            self.emergency_stop(ctx, crate::error::DriverFault::EncoderStall.code());
            return true;
        }
        false
    }
}

// ───────────────────────────────────────────────────────────────
// Slot contents
// ───────────────────────────────────────────────────────────────

/// Driver topologies selectable with `M10 T<type>` (type 4 is the PWM-only
/// driver, held in its own slot table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerType {
    SmartSerial,
    HBridge,
    SplitBridge,
    SwitchBridge,
    VariablePwm,
}

impl ControllerType {
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::SmartSerial),
            1 => Some(Self::HBridge),
            2 => Some(Self::SplitBridge),
            3 => Some(Self::SwitchBridge),
            4 => Some(Self::VariablePwm),
            _ => None,
        }
    }
}

/// A motor slot's driver.
pub enum MotorDriver {
    HBridge(HBridgeDriver),
    SplitBridge(SplitBridgeDriver),
    SwitchBridge(SwitchBridgeDriver),
    Smart(SmartSerialDriver),
}

impl MotorDriver {
    pub fn control(&self) -> &dyn MotorControl {
        match self {
            Self::HBridge(d) => d,
            Self::SplitBridge(d) => d,
            Self::SwitchBridge(d) => d,
            Self::Smart(d) => d,
        }
    }

    pub fn control_mut(&mut self) -> &mut dyn MotorControl {
        match self {
            Self::HBridge(d) => d,
            Self::SplitBridge(d) => d,
            Self::SwitchBridge(d) => d,
            Self::Smart(d) => d,
        }
    }

    pub fn kind(&self) -> ControllerType {
        match self {
            Self::HBridge(_) => ControllerType::HBridge,
            Self::SplitBridge(_) => ControllerType::SplitBridge,
            Self::SwitchBridge(_) => ControllerType::SwitchBridge,
            Self::Smart(_) => ControllerType::SmartSerial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_type_codes() {
        assert_eq!(ControllerType::from_code(0), Some(ControllerType::SmartSerial));
        assert_eq!(ControllerType::from_code(4), Some(ControllerType::VariablePwm));
        assert_eq!(ControllerType::from_code(5), None);
    }

    #[test]
    fn pwm_drive_defaults() {
        let d = PwmDrive::default();
        assert_eq!((d.pwm, d.aux_pin, d.prescale, d.resolution), (None, 0, 1, 8));
    }
}
