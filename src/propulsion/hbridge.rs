//! H-bridge driver: one PWM pin and one direction pin per channel.
//!
//! A direction change drives the direction pin (mirrored by the channel's
//! default direction) before the new duty is applied. If the direction pin
//! cannot be found among the driver outputs the whole driver stops with
//! cause 2.

use core::fmt::Write as _;

use log::{error, info};

use super::policy::{self, PowerScaling};
use super::{DriveContext, MotorControl, PwmDrive};
use crate::app::ports::{OutputMode, PinMode};
use crate::channel::{ChannelId, Direction, MotorCommon};
use crate::error::{DriverFault, ResourceError, Result};
use crate::pins::{DRIVER_SCAN, MAX_CHANNELS};
use crate::resources::PinStatus;

pub const DEFAULT_MAX_POWER: i32 = 255;

pub struct HBridgeDriver {
    common: MotorCommon,
    drive: [PwmDrive; MAX_CHANNELS],
}

impl Default for HBridgeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl HBridgeDriver {
    pub fn new() -> Self {
        Self {
            common: MotorCommon::new(DEFAULT_MAX_POWER),
            drive: [PwmDrive::default(); MAX_CHANNELS],
        }
    }

    pub fn drive(&self, ch: ChannelId) -> &PwmDrive {
        &self.drive[ch.index()]
    }

    /// Configure `ch` on PWM pin `pin` with direction pin `dir_pin`.
    pub fn create_pwm(
        &mut self,
        ctx: &mut DriveContext<'_>,
        ch: ChannelId,
        pin: u8,
        dir_pin: u8,
        dir_default: Direction,
        prescale: u8,
        resolution: u8,
    ) -> Result<()> {
        self.common.include_channel(ch);
        self.release_channel(ctx, ch);

        if ctx.res.pins.status(pin) != PinStatus::Free {
            return Err(ResourceError::PinUnavailable(pin).into());
        }
        let idx = ctx
            .res
            .pwms
            .first_free(DRIVER_SCAN)
            .ok_or(ResourceError::ArenaFull)?;
        super::claim_output(ctx, dir_pin, false)?;
        if let Err(e) = super::claim_pwm(ctx, pin, idx) {
            super::release_digital_pin(ctx, dir_pin);
            return Err(e);
        }

        let state = self.common.channel_mut(ch);
        state.current_direction = dir_default;
        state.default_direction = dir_default;
        self.drive[ch.index()] = PwmDrive {
            pwm: Some(idx),
            aux_pin: dir_pin,
            prescale,
            resolution,
        };
        info!("hbridge: channel {} pwm pin {} dir pin {}", ch, pin, dir_pin);
        Ok(())
    }

    fn release_channel(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId) {
        let drive = core::mem::take(&mut self.drive[ch.index()]);
        if let Some(idx) = drive.pwm {
            super::release_pwm(ctx, idx);
            super::release_digital_pin(ctx, drive.aux_pin);
        }
    }
}

impl MotorControl for HBridgeDriver {
    fn common(&self) -> &MotorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut MotorCommon {
        &mut self.common
    }

    /// An ultrasonic veto stops the channel and fails with status 8
    /// (`Bad Motor command 8`) instead of acknowledging; the fault stays set.
    fn command_power(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId, power: i32) -> Result<()> {
        if self.common.shutdown {
            return Ok(());
        }
        let drive = self.drive[ch.index()];
        let Some(pwm_idx) = drive.pwm else {
            return Err(ResourceError::InvalidChannel(i64::from(ch.number())).into());
        };

        let state = self.common.channel_mut(ch);
        state.speed = power;
        let steering = policy::steer(state.current_direction, power);
        let default_direction = state.default_direction;
        let min_power = state.min_power;
        if steering.flipped {
            let level = policy::direction_pin_level(steering.direction, default_direction);
            let Some(dir) = ctx
                .res
                .digital_index_within(drive.aux_pin, DRIVER_SCAN)
                .and_then(|i| ctx.res.digitals.get_mut(i))
            else {
                error!("hbridge: channel {} direction pin {} missing", ch, drive.aux_pin);
                self.emergency_stop(ctx, DriverFault::HBridgeDirectionPin.code());
                return Err(DriverFault::HBridgeDirectionPin.into());
            };
            dir.set_mode(ctx.io, PinMode::Output);
            dir.write(ctx.io, level);
            self.common.channel_mut(ch).current_direction = steering.direction;
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
        if super::prime_pwm(ctx, pwm_idx, drive.prescale, drive.resolution) {
            if let Some(pwm) = ctx.res.pwms.get_mut(pwm_idx) {
                pwm.write_duty(ctx.io, super::duty_units(duty), OutputMode::Clear);
            }
        }
        self.common.fault_flag = 0;
        Ok(())
    }

    fn emergency_stop(&mut self, ctx: &mut DriveContext<'_>, status: i32) -> i32 {
        for drive in self.drive {
            if let Some(idx) = drive.pwm {
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
        let pwm = drive.pwm.and_then(|i| ctx.res.pwms.get(i));
        let (pin, mode) = pwm.map_or((-1, -1), |p| (i32::from(p.pin()), i32::from(p.pin_mode().code())));
        let mut out = String::from("HB-PWM ");
        if drive.pwm.is_none() {
            out.push_str("UNINITIALIZED ");
        }
        let _ = write!(
            out,
            "Pin:{}, Mode:{}, Dir Pin:{}, Timer Prescale:{}, Timer Res.:{}\r\nDir Pins:",
            pin, mode, drive.aux_pin, drive.prescale, drive.resolution
        );
        super::write_pin_listing(ctx.res, &mut out);
        out
    }

    fn release(&mut self, ctx: &mut DriveContext<'_>) {
        for idx in 0..MAX_CHANNELS {
            if let Some(ch) = ChannelId::from_index(idx) {
                self.release_channel(ctx, ch);
            }
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
    use embedded_hal::digital::PinState;

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
    fn create_assigns_both_pins() {
        let mut rig = Rig::new();
        let mut hb = HBridgeDriver::new();
        hb.create_pwm(&mut rig.ctx(), ch(1), 5, 6, Direction::Reverse, 1, 8).unwrap();
        assert!(!rig.res.pins.assign(5));
        assert!(!rig.res.pins.assign(6));
        assert_eq!(rig.res.pwms.get(0).map(|p| p.pin()), Some(5));
        assert_eq!(rig.res.digitals.get(0).map(|d| d.pin()), Some(6));
        assert_eq!(hb.common().channel_count(), 1);
    }

    #[test]
    fn reverse_flip_drives_direction_low() {
        let mut rig = Rig::new();
        let mut hb = HBridgeDriver::new();
        hb.create_pwm(&mut rig.ctx(), ch(1), 5, 6, Direction::Reverse, 1, 8).unwrap();
        hb.common_mut().channel_mut(ch(1)).current_direction = Direction::Forward;
        hb.command_power(&mut rig.ctx(), ch(1), -500).unwrap();
        assert_eq!(hb.common().channel(ch(1)).current_direction, Direction::Reverse);
        assert_eq!(rig.hw.level(6), Some(PinState::Low));
        let binding = timer_for_pin(5).unwrap();
        assert_eq!(rig.hw.compare(binding), Some((OutputMode::Clear, 125)));
    }

    #[test]
    fn missing_direction_pin_stops_with_code_2() {
        let mut rig = Rig::new();
        let mut hb = HBridgeDriver::new();
        hb.create_pwm(&mut rig.ctx(), ch(1), 5, 6, Direction::Reverse, 1, 8).unwrap();
        rig.res.digitals.take(0);
        let err = hb.command_power(&mut rig.ctx(), ch(1), 300).unwrap_err();
        assert_eq!(err.status_code(), 2);
        assert_eq!(hb.common().channel(ch(1)).speed, 0);
        assert_eq!(hb.common().fault_flag, 16);
    }

    #[test]
    fn min_and_max_are_quartered() {
        let mut hb = HBridgeDriver::new();
        hb.set_min_power(ch(1), 100);
        hb.set_max_power(800);
        assert_eq!(hb.common().channel(ch(1)).min_power, 25);
        assert_eq!(hb.common().max_power, 200);
    }

    #[test]
    fn describe_uninitialised_channel() {
        let mut rig = Rig::new();
        let mut hb = HBridgeDriver::new();
        let text = hb.describe(&mut rig.ctx(), ch(3));
        assert!(text.starts_with("HB-PWM UNINITIALIZED Pin:-1, Mode:-1, Dir Pin:0"));
        assert!(text.ends_with("9=0"));
    }

    #[test]
    fn release_returns_pins() {
        let mut rig = Rig::new();
        let mut hb = HBridgeDriver::new();
        hb.create_pwm(&mut rig.ctx(), ch(1), 5, 6, Direction::Reverse, 1, 8).unwrap();
        hb.create_encoder(&mut rig.ctx(), ch(1), 2).unwrap();
        hb.release(&mut rig.ctx());
        assert_eq!(rig.res.pins.assigned().count(), 0);
        assert_eq!(rig.hw.hook_count(), 0);
    }
}
