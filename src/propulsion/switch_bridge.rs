//! Switch bridge: two plain digital inputs and a shared enable pin per
//! channel. Power only selects a side; any nonzero command is full-on.

use core::fmt::Write as _;

use embedded_hal::digital::PinState;
use log::{error, info};

use super::policy::{self, PowerScaling};
use super::{DriveContext, MotorControl};
use crate::app::ports::PinMode;
use crate::channel::{ChannelId, Direction, MotorCommon};
use crate::drivers::digital::DigitalPin;
use crate::error::{DriverFault, ResourceError, Result};
use crate::pins::{DRIVER_SCAN, MAX_CHANNELS};
use crate::resources::PinStatus;

pub const DEFAULT_MAX_POWER: i32 = 255;

/// Input A's index in the digital arena (B follows it) and the enable pin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchDrive {
    pub base: Option<usize>,
    pub enable_pin: u8,
}

pub struct SwitchBridgeDriver {
    common: MotorCommon,
    drive: [SwitchDrive; MAX_CHANNELS],
    offset: [usize; MAX_CHANNELS],
}

impl Default for SwitchBridgeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchBridgeDriver {
    pub fn new() -> Self {
        Self {
            common: MotorCommon::new(DEFAULT_MAX_POWER),
            drive: [SwitchDrive::default(); MAX_CHANNELS],
            offset: [0; MAX_CHANNELS],
        }
    }

    pub fn drive(&self, ch: ChannelId) -> &SwitchDrive {
        &self.drive[ch.index()]
    }

    pub fn active_input(&self, ch: ChannelId) -> usize {
        self.offset[ch.index()]
    }

    pub fn create_digital(
        &mut self,
        ctx: &mut DriveContext<'_>,
        ch: ChannelId,
        pin_a: u8,
        pin_b: u8,
        enable_pin: u8,
        dir_default: Direction,
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
        if enable_pin == pin_a || enable_pin == pin_b {
            return Err(ResourceError::PinUnavailable(enable_pin).into());
        }
        let shared_enable = ctx.res.pins.status(enable_pin) == PinStatus::Assigned;
        super::claim_output(ctx, enable_pin, true)?;

        let Some(base) = ctx.res.digitals.first_free_pair(DRIVER_SCAN) else {
            if !shared_enable {
                super::release_digital_pin(ctx, enable_pin);
            }
            return Err(ResourceError::ArenaFull.into());
        };
        for (idx, pin) in [(base, pin_a), (base + 1, pin_b)] {
            if !ctx.res.pins.assign(pin) {
                if idx != base {
                    if let Some(d) = ctx.res.digitals.take(base) {
                        ctx.res.pins.unassign(d.pin());
                    }
                }
                if !shared_enable {
                    super::release_digital_pin(ctx, enable_pin);
                }
                return Err(ResourceError::PinUnavailable(pin).into());
            }
            let mut d = DigitalPin::new(pin);
            d.set_mode(ctx.io, PinMode::Output);
            ctx.res.digitals.insert(idx, d)?;
        }

        let state = self.common.channel_mut(ch);
        state.current_direction = dir_default;
        state.default_direction = dir_default;
        self.offset[ch.index()] = usize::from(dir_default.code());
        self.drive[ch.index()] = SwitchDrive {
            base: Some(base),
            enable_pin,
        };
        info!("switch: channel {} inputs {}/{} enable {}", ch, pin_a, pin_b, enable_pin);
        Ok(())
    }

    fn release_channel(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId) {
        let drive = core::mem::take(&mut self.drive[ch.index()]);
        let Some(base) = drive.base else {
            return;
        };
        for idx in [base, base + 1] {
            if let Some(mut d) = ctx.res.digitals.take(idx) {
                d.write(ctx.io, PinState::Low);
                ctx.res.pins.unassign(d.pin());
            }
        }
        if !self
            .drive
            .iter()
            .any(|d| d.base.is_some() && d.enable_pin == drive.enable_pin)
        {
            super::release_digital_pin(ctx, drive.enable_pin);
        }
    }

    fn write_input(ctx: &mut DriveContext<'_>, idx: usize, level: PinState) {
        if let Some(d) = ctx.res.digitals.get_mut(idx) {
            d.write(ctx.io, level);
        }
    }
}

impl MotorControl for SwitchBridgeDriver {
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
        let Some(base) = drive.base else {
            return Err(ResourceError::InvalidChannel(i64::from(ch.number())).into());
        };

        let enable = ctx
            .res
            .digital_index_within(drive.enable_pin, DRIVER_SCAN)
            .and_then(|i| ctx.res.digitals.get_mut(i));
        let enabled = match enable {
            Some(pin) => {
                pin.set_mode(ctx.io, PinMode::Output);
                pin.write(ctx.io, PinState::High);
                true
            }
            None => false,
        };

        let state = self.common.channel_mut(ch);
        state.speed = power;
        let steering = policy::steer(state.current_direction, power);
        if steering.flipped {
            self.offset[ch.index()] = policy::input_offset(steering.direction, state.default_direction);
            state.current_direction = steering.direction;
        }

        if !enabled {
            error!("switch: channel {} enable pin {} missing", ch, drive.enable_pin);
            self.emergency_stop(ctx, DriverFault::SwitchEnablePin.code());
            return Err(DriverFault::SwitchEnablePin.into());
        }

        self.common.reset_encoders();
        if self.check_ultrasonic_shutdown(ctx) {
            return Err(DriverFault::UltrasonicVeto.into());
        }

        let offset = self.offset[ch.index()];
        Self::write_input(ctx, base + (1 - offset), PinState::Low);
        Self::write_input(ctx, base + offset, PinState::from(steering.magnitude != 0));
        self.common.fault_flag = 0;
        Ok(())
    }

    fn emergency_stop(&mut self, ctx: &mut DriveContext<'_>, status: i32) -> i32 {
        for drive in self.drive {
            if let Some(base) = drive.base {
                Self::write_input(ctx, base, PinState::Low);
                Self::write_input(ctx, base + 1, PinState::Low);
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
        let a = drive.base.and_then(|i| ctx.res.digitals.get(i));
        let b = drive.base.and_then(|i| ctx.res.digitals.get(i + 1));
        let (pin_a, mode) = a.map_or((-1, -1), |d| (i32::from(d.pin()), i32::from(d.mode().code())));
        let pin_b = b.map_or(-1, |d| i32::from(d.pin()));
        let mut out = String::from("SB-Digital ");
        if drive.base.is_none() {
            out.push_str("UNINITIALIZED ");
        }
        let _ = write!(
            out,
            "PinA:{}, Digital PinB:{}, Mode:{}, Enable Pin:{}\r\nDir Pins:",
            pin_a, pin_b, mode, drive.enable_pin
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
    fn enable_first_then_adjacent_pair() {
        let mut rig = Rig::new();
        let mut sw = SwitchBridgeDriver::new();
        sw.create_digital(&mut rig.ctx(), ch(1), 22, 23, 24, Direction::Reverse).unwrap();
        assert_eq!(rig.res.digitals.get(0).map(|d| d.pin()), Some(24));
        assert_eq!(sw.drive(ch(1)).base, Some(1));
        assert_eq!(rig.res.digitals.get(2).map(|d| d.pin()), Some(23));
    }

    #[test]
    fn enable_pin_cannot_double_as_an_input() {
        let mut rig = Rig::new();
        let mut sw = SwitchBridgeDriver::new();
        assert!(sw.create_digital(&mut rig.ctx(), ch(1), 22, 23, 22, Direction::Reverse).is_err());
        assert!(sw.create_digital(&mut rig.ctx(), ch(1), 22, 23, 23, Direction::Reverse).is_err());
        assert_eq!(rig.res.pins.assigned().count(), 0);
        assert_eq!(rig.res.digitals.iter().count(), 0);
        assert_eq!(sw.drive(ch(1)).base, None);
    }

    #[test]
    fn selected_side_is_full_on() {
        let mut rig = Rig::new();
        let mut sw = SwitchBridgeDriver::new();
        sw.create_digital(&mut rig.ctx(), ch(1), 22, 23, 24, Direction::Reverse).unwrap();

        sw.command_power(&mut rig.ctx(), ch(1), 1).unwrap();
        assert_eq!(rig.hw.level(23), Some(PinState::High));
        assert_eq!(rig.hw.level(22), Some(PinState::Low));

        sw.command_power(&mut rig.ctx(), ch(1), -900).unwrap();
        assert_eq!(rig.hw.level(22), Some(PinState::High));
        assert_eq!(rig.hw.level(23), Some(PinState::Low));

        sw.command_power(&mut rig.ctx(), ch(1), 0).unwrap();
        assert_eq!(rig.hw.level(22), Some(PinState::Low));
    }

    #[test]
    fn missing_enable_stops_with_code_6() {
        let mut rig = Rig::new();
        let mut sw = SwitchBridgeDriver::new();
        sw.create_digital(&mut rig.ctx(), ch(1), 22, 23, 24, Direction::Reverse).unwrap();
        rig.res.digitals.take(0);
        let err = sw.command_power(&mut rig.ctx(), ch(1), 500).unwrap_err();
        assert_eq!(err.status_code(), 6);
    }

    #[test]
    fn describe_and_release() {
        let mut rig = Rig::new();
        let mut sw = SwitchBridgeDriver::new();
        sw.create_digital(&mut rig.ctx(), ch(2), 22, 23, 24, Direction::Forward).unwrap();
        let text = sw.describe(&mut rig.ctx(), ch(2));
        assert!(text.starts_with("SB-Digital PinA:22, Digital PinB:23, Mode:1, Enable Pin:24"));
        assert!(sw.describe(&mut rig.ctx(), ch(1)).starts_with("SB-Digital UNINITIALIZED PinA:-1"));
        sw.release(&mut rig.ctx());
        assert_eq!(rig.res.pins.assigned().count(), 0);
    }
}
