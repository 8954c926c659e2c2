//! Variable PWM driver: one PWM pin and an enable pin per channel.

use core::fmt::Write as _;

use embedded_hal::digital::PinState;
use log::{error, info};

use super::{PwmCommon, PwmControl};
use crate::app::ports::{OutputMode, PinMode};
use crate::channel::ChannelId;
use crate::error::{DriverFault, ResourceError, Result};
use crate::pins::{DRIVER_SCAN, MAX_CHANNELS};
use crate::propulsion::{self, DriveContext, PwmDrive};
use crate::resources::PinStatus;

/// Offset lifting the motor range onto 0..=2000.
const LEVEL_OFFSET: i32 = 1000;

pub struct VariablePwmDriver {
    common: PwmCommon,
    drive: [PwmDrive; MAX_CHANNELS],
}

impl Default for VariablePwmDriver {
    fn default() -> Self {
        Self::new(super::DEFAULT_MAX_LEVEL)
    }
}

impl VariablePwmDriver {
    pub fn new(max_level: i32) -> Self {
        Self {
            common: PwmCommon::new(max_level),
            drive: [PwmDrive::default(); MAX_CHANNELS],
        }
    }

    pub fn drive(&self, ch: ChannelId) -> &PwmDrive {
        &self.drive[ch.index()]
    }

    pub fn create_pwm(
        &mut self,
        ctx: &mut DriveContext<'_>,
        ch: ChannelId,
        pin: u8,
        enable_pin: u8,
        prescale: u8,
        resolution: u8,
    ) -> Result<()> {
        self.common.include_channel(ch);
        self.release_channel(ctx, ch);

        if ctx.res.pins.status(pin) != PinStatus::Free || pin == enable_pin {
            return Err(ResourceError::PinUnavailable(pin).into());
        }
        let shared_enable = ctx.res.pins.status(enable_pin) == PinStatus::Assigned;
        propulsion::claim_output(ctx, enable_pin, true)?;

        let claimed = match ctx.res.pwms.first_free(DRIVER_SCAN) {
            Some(idx) => propulsion::claim_pwm(ctx, pin, idx).map(|()| idx),
            None => Err(ResourceError::ArenaFull.into()),
        };
        let idx = match claimed {
            Ok(idx) => idx,
            Err(e) => {
                if !shared_enable {
                    propulsion::release_digital_pin(ctx, enable_pin);
                }
                return Err(e);
            }
        };

        self.drive[ch.index()] = PwmDrive {
            pwm: Some(idx),
            aux_pin: enable_pin,
            prescale,
            resolution,
        };
        info!("pwm: channel {} pin {} enable {}", ch, pin, enable_pin);
        Ok(())
    }

    fn release_channel(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId) {
        let drive = core::mem::take(&mut self.drive[ch.index()]);
        let Some(idx) = drive.pwm else {
            return;
        };
        propulsion::release_pwm(ctx, idx);
        if !self
            .drive
            .iter()
            .any(|d| d.pwm.is_some() && d.aux_pin == drive.aux_pin)
        {
            propulsion::release_digital_pin(ctx, drive.aux_pin);
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

/// Duty for a stored 0..=2000 level.
fn shape_level(level: i32, min_level: i32, max_level: i32, scale: i32) -> i32 {
    let mut p = level / 8;
    if p != 0 && p < min_level {
        p = min_level;
    }
    if p > max_level {
        p = max_level;
    }
    if scale != 0 {
        p /= scale;
    }
    p
}

impl PwmControl for VariablePwmDriver {
    fn common(&self) -> &PwmCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut PwmCommon {
        &mut self.common
    }

    fn command_level(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId, level: i32) -> Result<()> {
        if self.common.shutdown {
            return Ok(());
        }
        let drive = self.drive[ch.index()];
        let Some(idx) = drive.pwm else {
            return Err(ResourceError::InvalidChannel(i64::from(ch.number())).into());
        };
        let level = level.clamp(-LEVEL_OFFSET, LEVEL_OFFSET) + LEVEL_OFFSET;
        self.common.set_level(ch, level);

        if !Self::write_enable(ctx, drive.aux_pin, PinState::High) {
            error!("pwm: channel {} enable pin {} missing", ch, drive.aux_pin);
            self.emergency_stop(ctx, DriverFault::PwmEnablePin.code());
            return Err(DriverFault::PwmEnablePin.into());
        }

        let duty = shape_level(
            level,
            self.common.min_level(ch),
            self.common.max_level,
            self.common.power_scale,
        );
        if propulsion::prime_pwm(ctx, idx, drive.prescale, drive.resolution) {
            if let Some(pwm) = ctx.res.pwms.get_mut(idx) {
                pwm.write_duty(ctx.io, propulsion::duty_units(duty), OutputMode::Clear);
            }
        }
        self.common.fault_flag = 0;
        Ok(())
    }

    fn emergency_stop(&mut self, ctx: &mut DriveContext<'_>, status: i32) -> i32 {
        for drive in self.drive {
            let Some(idx) = drive.pwm else {
                continue;
            };
            Self::write_enable(ctx, drive.aux_pin, PinState::Low);
            if propulsion::prime_pwm(ctx, idx, drive.prescale, drive.resolution) {
                if let Some(pwm) = ctx.res.pwms.get_mut(idx) {
                    pwm.off(ctx.io);
                }
            }
        }
        self.common.fault_flag = DriverFault::DriverStop.code();
        self.common.reset_levels();
        status
    }

    fn describe(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId) -> String {
        let drive = self.drive[ch.index()];
        let pwm = drive.pwm.and_then(|i| ctx.res.pwms.get(i));
        let (pin, mode) = pwm.map_or((-1, -1), |p| (i32::from(p.pin()), i32::from(p.pin_mode().code())));
        let mut out = String::from("VP-PWM ");
        if drive.pwm.is_none() {
            out.push_str("UNINITIALIZED ");
        }
        let _ = write!(
            out,
            "Pin:{}, Mode:{}, Enable Pin:{}, Timer Prescale:{}, Timer Res.:{}\r\nDir Pins:",
            pin, mode, drive.aux_pin, drive.prescale, drive.resolution
        );
        propulsion::write_pin_listing(ctx.res, &mut out);
        out
    }

    fn release(&mut self, ctx: &mut DriveContext<'_>) {
        for ch in ChannelId::up_to(MAX_CHANNELS as u8) {
            self.release_channel(ctx, ch);
        }
    }
}
