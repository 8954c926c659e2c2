//! Split bridge: two PWM inputs (A and B) and a shared enable pin per
//! channel.
//!
//! Direction is realised by routing the duty to input A or input B. The
//! inputs occupy adjacent PWM arena slots, A at the lower index; the
//! adjacency is an allocator convention, the physical pins can be anywhere.
//! Several channels may share one enable pin.

use core::fmt::Write as _;

use embedded_hal::digital::PinState;
use log::{error, info};

use super::policy::{self, PowerScaling};
use super::{DriveContext, MotorControl, PwmDrive};
use crate::app::ports::{OutputMode, PinMode};
use crate::channel::{ChannelId, Direction, MotorCommon};
use crate::error::{DriverFault, ResourceError, Result};
use crate::pins::{DRIVER_SCAN, MAX_CHANNELS};
use crate::resources::PinStatus;

pub const DEFAULT_MAX_POWER: i32 = 255;

pub struct SplitBridgeDriver {
    common: MotorCommon,
    /// `pwm` is input A; input B sits at the next arena index.
    drive: [PwmDrive; MAX_CHANNELS],
    /// 0 routes drive to input A, 1 to input B.
    offset: [usize; MAX_CHANNELS],
}

impl Default for SplitBridgeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SplitBridgeDriver {
    pub fn new() -> Self {
        Self {
            common: MotorCommon::new(DEFAULT_MAX_POWER),
            drive: [PwmDrive::default(); MAX_CHANNELS],
            offset: [0; MAX_CHANNELS],
        }
    }

    pub fn drive(&self, ch: ChannelId) -> &PwmDrive {
        &self.drive[ch.index()]
    }

    /// Input currently carrying drive for `ch` (0 = A, 1 = B).
    pub fn active_input(&self, ch: ChannelId) -> usize {
        self.offset[ch.index()]
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_pwm(
        &mut self,
        ctx: &mut DriveContext<'_>,
        ch: ChannelId,
        pin_a: u8,
        pin_b: u8,
        enable_pin: u8,
        dir_default: Direction,
        prescale: u8,
        resolution: u8,
    ) -> Result<()> {
        self.common.include_channel(ch);
        self.release_channel(ctx, ch);

        for pin in [pin_a, pin_b] {
            if ctx.res.pins.status(pin) != PinStatus::Free {
                return Err(ResourceError::PinUnavailable(pin).into());
            }
        }
        if pin_a == pin_b {
            return Err(ResourceError::PinUnavailable(pin_b).into());
        }
        let shared_enable = ctx.res.pins.status(enable_pin) == PinStatus::Assigned;
        super::claim_output(ctx, enable_pin, true)?;

        let idx = match claim_pair(ctx, pin_a, pin_b) {
            Ok(idx) => idx,
            Err(e) => {
                if !shared_enable {
                    super::release_digital_pin(ctx, enable_pin);
                }
                return Err(e);
            }
        };

        let state = self.common.channel_mut(ch);
        state.current_direction = dir_default;
        state.default_direction = dir_default;
        self.offset[ch.index()] = usize::from(dir_default.code());
        self.drive[ch.index()] = PwmDrive {
            pwm: Some(idx),
            aux_pin: enable_pin,
            prescale,
            resolution,
        };
        info!(
            "split: channel {} inputs {}/{} enable {}{}",
            ch,
            pin_a,
            pin_b,
            enable_pin,
            if shared_enable { " (shared)" } else { "" }
        );
        Ok(())
    }

    fn release_channel(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId) {
        let drive = core::mem::take(&mut self.drive[ch.index()]);
        let Some(idx) = drive.pwm else {
            return;
        };
        super::release_pwm(ctx, idx);
        super::release_pwm(ctx, idx + 1);
        let enable_in_use = self
            .drive
            .iter()
            .any(|d| d.pwm.is_some() && d.aux_pin == drive.aux_pin);
        if !enable_in_use {
            super::release_digital_pin(ctx, drive.aux_pin);
        }
    }

    fn write_enable(ctx: &mut DriveContext<'_>, pin: u8, level: PinState) -> bool {
        let Some(enable) = ctx
            .res
            .digital_index_within(pin, DRIVER_SCAN)
            .and_then(|i| ctx.res.digitals.get_mut(i))
        else {
            return false;
        };
        enable.set_mode(ctx.io, PinMode::Output);
        enable.write(ctx.io, level);
        true
    }
}

/// Claim both inputs into the first adjacent pair of free PWM slots.
fn claim_pair(ctx: &mut DriveContext<'_>, pin_a: u8, pin_b: u8) -> Result<usize> {
    let idx = ctx
        .res
        .pwms
        .first_free_pair(DRIVER_SCAN)
        .ok_or(ResourceError::ArenaFull)?;
    super::claim_pwm(ctx, pin_a, idx)?;
    if let Err(e) = super::claim_pwm(ctx, pin_b, idx + 1) {
        super::release_pwm(ctx, idx);
        return Err(e);
    }
    Ok(idx)
}

impl MotorControl for SplitBridgeDriver {
    fn common(&self) -> &MotorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut MotorCommon {
        &mut self.common
    }

    fn command_power(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId, power: i32) -> Result<()> {
        if self.common.shutdown {
            return Ok(());
        }
        let drive = self.drive[ch.index()];
        let Some(base) = drive.pwm else {
            return Err(ResourceError::InvalidChannel(i64::from(ch.number())).into());
        };

        let enabled = Self::write_enable(ctx, drive.aux_pin, PinState::High);

        let state = self.common.channel_mut(ch);
        state.speed = power;
        let steering = policy::steer(state.current_direction, power);
        if steering.flipped {
            self.offset[ch.index()] = policy::input_offset(steering.direction, state.default_direction);
            state.current_direction = steering.direction;
        }
        let min_power = state.min_power;

        if !enabled {
            error!("split: channel {} enable pin {} missing", ch, drive.aux_pin);
            self.emergency_stop(ctx, DriverFault::SplitEnablePin.code());
            return Err(DriverFault::SplitEnablePin.into());
        }

        let duty = policy::shape_duty(
            steering.magnitude,
            min_power,
            self.common.max_power,
            self.common.power_scale,
        );
        self.common.reset_encoders();
        if self.check_ultrasonic_shutdown(ctx) {
            return Err(DriverFault::UltrasonicVeto.into());
        }

        let active = base + self.offset[ch.index()];
        let idle = base + (1 - self.offset[ch.index()]);
        if super::prime_pwm(ctx, idle, drive.prescale, drive.resolution) {
            if let Some(pwm) = ctx.res.pwms.get_mut(idle) {
                pwm.write_duty(ctx.io, 0, OutputMode::Clear);
            }
        }
        if super::prime_pwm(ctx, active, drive.prescale, drive.resolution) {
            if let Some(pwm) = ctx.res.pwms.get_mut(active) {
                pwm.write_duty(ctx.io, super::duty_units(duty), OutputMode::Clear);
            }
        }
        self.common.fault_flag = 0;
        Ok(())
    }

    fn emergency_stop(&mut self, ctx: &mut DriveContext<'_>, status: i32) -> i32 {
        for drive in self.drive {
            let Some(base) = drive.pwm else {
                continue;
            };
            Self::write_enable(ctx, drive.aux_pin, PinState::Low);
            for idx in [base, base + 1] {
                if super::prime_pwm(ctx, idx, drive.prescale, drive.resolution) {
                    if let Some(pwm) = ctx.res.pwms.get_mut(idx) {
                        pwm.off(ctx.io);
                    }
                }
            }
        }
        self.common.fault_flag = DriverFault::DriverStop.code();
        self.common.reset_speeds();
        self.common.reset_encoders();
        status
    }

    fn is_connected(&mut self, _ctx: &mut DriveContext<'_>) -> bool {
        true
    }

    fn query_fault(&mut self, _ctx: &mut DriveContext<'_>) -> i32 {
        self.common.fault_flag
    }

    fn query_status(&mut self, _ctx: &mut DriveContext<'_>) -> i32 {
        self.common.status_flag
    }

    fn describe(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId) -> String {
        let drive = self.drive[ch.index()];
        let a = drive.pwm.and_then(|i| ctx.res.pwms.get(i));
        let b = drive.pwm.and_then(|i| ctx.res.pwms.get(i + 1));
        let (pin_a, mode) = a.map_or((-1, -1), |p| (i32::from(p.pin()), i32::from(p.pin_mode().code())));
        let pin_b = b.map_or(-1, |p| i32::from(p.pin()));
        let mut out = String::from("SB-PWM ");
        if drive.pwm.is_none() {
            out.push_str("CHANNEL UNINITIALIZED ");
        }
        let _ = write!(
            out,
            "PinA:{}, PWM PinB:{}, Mode:{}, Enable Pin:{}, Timer Prescale:{}, Timer Res.:{}\r\nDir Pins:",
            pin_a, pin_b, mode, drive.aux_pin, drive.prescale, drive.resolution
        );
        super::write_pin_listing(ctx.res, &mut out);
        out
    }

    fn release(&mut self, ctx: &mut DriveContext<'_>) {
        for ch in ChannelId::up_to(MAX_CHANNELS as u8) {
            self.release_channel(ctx, ch);
        }
        self.release_encoders(ctx);
    }

    fn power_scaling(&self) -> PowerScaling {
        PowerScaling::Quartered
    }

    fn default_max_power(&self) -> i32 {
        DEFAULT_MAX_POWER
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::adapters::hardware::BoardHardware;
    use crate::adapters::smart_link::SmartUart;
    use crate::pins::timer_for_pin;
    use crate::resources::ResourceRegistry;

    struct Rig {
        res: ResourceRegistry,
        hw: BoardHardware,
        link: SmartUart,
    }

    impl Rig {
        fn new() -> Self {
            Self { res: ResourceRegistry::new(), hw: BoardHardware::new(), link: SmartUart::new() }
        }

        fn ctx(&mut self) -> DriveContext<'_> {
            DriveContext { res: &mut self.res, io: &mut self.hw, link: &mut self.link }
        }
    }

    fn ch(n: i64) -> ChannelId {
        ChannelId::new(n).unwrap()
    }

    #[test]
    fn inputs_take_adjacent_slots() {
        let mut rig = Rig::new();
        rig.res.pwms.insert(1, crate::drivers::pwm::PwmTimerChannel::new(44)).unwrap();
        let mut sb = SplitBridgeDriver::new();
        sb.create_pwm(&mut rig.ctx(), ch(1), 5, 6, 30, Direction::Reverse, 1, 8).unwrap();
        assert_eq!(sb.drive(ch(1)).pwm, Some(2));
        assert_eq!(rig.res.pwms.get(2).map(|p| p.pin()), Some(5));
        assert_eq!(rig.res.pwms.get(3).map(|p| p.pin()), Some(6));
    }

    #[test]
    fn enable_pin_is_shared() {
        let mut rig = Rig::new();
        let mut sb = SplitBridgeDriver::new();
        sb.create_pwm(&mut rig.ctx(), ch(1), 5, 6, 30, Direction::Reverse, 1, 8).unwrap();
        sb.create_pwm(&mut rig.ctx(), ch(2), 7, 8, 30, Direction::Reverse, 1, 8).unwrap();
        assert_eq!(rig.res.digitals.iter().count(), 1);

        sb.release_channel(&mut rig.ctx(), ch(1));
        assert_eq!(rig.res.pins.status(30), PinStatus::Assigned);
        sb.release_channel(&mut rig.ctx(), ch(2));
        assert_eq!(rig.res.pins.status(30), PinStatus::Free);
    }

    #[test]
    fn failed_pair_returns_enable_pin() {
        let mut rig = Rig::new();
        for (i, pin) in [40, 41, 42, 43, 44, 45, 46, 47, 48, 49].into_iter().enumerate().step_by(2) {
            rig.res.pwms.insert(i, crate::drivers::pwm::PwmTimerChannel::new(pin)).unwrap();
        }
        let mut sb = SplitBridgeDriver::new();
        assert!(sb.create_pwm(&mut rig.ctx(), ch(1), 5, 6, 30, Direction::Reverse, 1, 8).is_err());
        assert_eq!(rig.res.pins.status(30), PinStatus::Free);
        assert_eq!(rig.res.pins.status(5), PinStatus::Free);
    }

    #[test]
    fn forward_routes_to_input_b() {
        let mut rig = Rig::new();
        let mut sb = SplitBridgeDriver::new();
        sb.create_pwm(&mut rig.ctx(), ch(1), 5, 6, 30, Direction::Reverse, 1, 8).unwrap();
        assert_eq!(sb.active_input(ch(1)), 0);

        sb.command_power(&mut rig.ctx(), ch(1), 400).unwrap();
        assert_eq!(sb.active_input(ch(1)), 1);
        assert_eq!(rig.hw.level(30), Some(PinState::High));
        assert_eq!(rig.hw.compare(timer_for_pin(6).unwrap()), Some((OutputMode::Clear, 100)));
        assert_eq!(rig.hw.level(5), Some(PinState::Low));

        sb.command_power(&mut rig.ctx(), ch(1), -400).unwrap();
        assert_eq!(sb.active_input(ch(1)), 0);
        assert_eq!(rig.hw.compare(timer_for_pin(5).unwrap()), Some((OutputMode::Clear, 100)));
    }

    #[test]
    fn missing_enable_stops_with_code_4() {
        let mut rig = Rig::new();
        let mut sb = SplitBridgeDriver::new();
        sb.create_pwm(&mut rig.ctx(), ch(1), 5, 6, 30, Direction::Reverse, 1, 8).unwrap();
        rig.res.digitals.clear();
        let err = sb.command_power(&mut rig.ctx(), ch(1), 400).unwrap_err();
        assert_eq!(err.status_code(), 4);
        assert_eq!(sb.query_fault(&mut rig.ctx()), 16);
    }

    #[test]
    fn estop_drops_enable() {
        let mut rig = Rig::new();
        let mut sb = SplitBridgeDriver::new();
        sb.create_pwm(&mut rig.ctx(), ch(1), 5, 6, 30, Direction::Reverse, 1, 8).unwrap();
        sb.command_power(&mut rig.ctx(), ch(1), 400).unwrap();
        assert_eq!(sb.emergency_stop(&mut rig.ctx(), 81), 81);
        assert_eq!(rig.hw.level(30), Some(PinState::Low));
        assert!(!sb.common().is_running());
    }

    #[test]
    fn describe_lists_both_inputs() {
        let mut rig = Rig::new();
        let mut sb = SplitBridgeDriver::new();
        sb.create_pwm(&mut rig.ctx(), ch(1), 5, 6, 30, Direction::Reverse, 1, 8).unwrap();
        let text = sb.describe(&mut rig.ctx(), ch(1));
        assert!(text.starts_with("SB-PWM PinA:5, PWM PinB:6, Mode:1, Enable Pin:30"));
        assert!(text.contains("Dir Pins:0=30,1=0"));
    }
}
