//! M-code handlers.
//!
//! Slot-addressed codes take `Z` (default 0); a trailing `X` flag or value
//! redirects most of them from the motor slot to the PWM-only slot of the
//! same index. Pin codes claim from the shared pool and keep the arena
//! entry until the matching remove code.

use core::fmt::Write as _;

use embedded_hal::digital::PinState;
use log::{info, warn};

use super::dispatcher::{Controller, channel_arg, slot_index, slot_mut};
use super::line::CommandLine;
use super::response::{self, Block};
use super::{VERSION, firmware, header};
use crate::app::ports::{
    ConfigPort, ConsolePort, HardwarePort, OutputMode, PinMode, SerialLink, reset_cause,
};
use crate::channel::{ChannelId, Direction};
use crate::config::{ControllerConfig, load_or_default};
use crate::drivers::analog::AnalogPin;
use crate::drivers::digital::{DigitalPin, level_code};
use crate::drivers::pwm::PwmTimerChannel;
use crate::drivers::ultrasonic::Ultrasonic;
use crate::error::{DriverFault, ProtocolError, ResourceError, Result};
use crate::pins::PS_ON_PIN;
use crate::propulsion::{
    ControllerType, HBridgeDriver, MotorControl, MotorDriver, SmartSerialDriver, SplitBridgeDriver,
    SwitchBridgeDriver,
};
use crate::pwm_control::{PwmControl, VariablePwmDriver};
use crate::resources::{Arena, PinResourcePool, PinStatus};

/// Most readings `M802` takes in one request.
pub const MAX_DATASET: usize = 1024;

const RESET_CAUSES: [(u8, &str); 5] = [
    (reset_cause::POWER_UP, "PowerUp"),
    (reset_cause::EXTERNAL, "External Reset"),
    (reset_cause::BROWN_OUT, "Brown out Reset"),
    (reset_cause::WATCHDOG, "Watchdog Reset"),
    (reset_cause::SOFTWARE, "Software Reset"),
];

/// Claim `pin` and push a fresh entry, or find the entry already holding
/// it. Returns the arena index and whether the entry is new.
fn claim_entry<T, const N: usize>(
    pins: &mut PinResourcePool,
    arena: &mut Arena<T, N>,
    pin: u8,
    make: impl FnOnce() -> T,
    holds: impl FnMut(&T) -> bool,
) -> Result<(usize, bool)> {
    if pins.assign(pin) {
        return match arena.push(N, make()) {
            Ok(idx) => Ok((idx, true)),
            Err(e) => {
                pins.unassign(pin);
                Err(e.into())
            }
        };
    }
    arena
        .position(holds)
        .map(|idx| (idx, false))
        .ok_or_else(|| ResourceError::PinUnavailable(pin).into())
}

/// `X` prescale and `R` resolution for channel creation.
fn timer_args(line: &CommandLine) -> Result<(u8, u8)> {
    let prescale = line.optional_as::<u8>('X')?.unwrap_or(1);
    let resolution = line.optional_as::<u8>('R')?.unwrap_or(8);
    Ok((prescale, resolution))
}

/// Optional `W` encoder pin; 0 means none.
fn encoder_arg(line: &CommandLine) -> Result<Option<u8>> {
    Ok(line.optional_as::<u8>('W')?.filter(|&pin| pin != 0))
}

fn input_mode(pullup: bool) -> PinMode {
    if pullup {
        PinMode::InputPullup
    } else {
        PinMode::Input
    }
}

/// Hand a pin back to the pool. Pins that are free or reserved are refused.
fn release_assigned(pins: &mut PinResourcePool, pin: u8) -> Result<()> {
    if pins.status(pin) != PinStatus::Assigned {
        return Err(ResourceError::PinUnavailable(pin).into());
    }
    pins.unassign(pin);
    Ok(())
}

impl<H, L, C, P> Controller<H, L, C, P>
where
    H: HardwarePort,
    L: SerialLink,
    C: ConsolePort,
    P: ConfigPort,
{
    pub(super) fn mcode(&mut self, code: i64, line: &CommandLine) -> Result<()> {
        match code {
            0 | 1 => {
                self.realtime = code == 1;
                info!("realtime output {}", if self.realtime { "on" } else { "off" });
            }
            2 => self.m2_channel_options(line)?,
            3 => self.m3_hbridge_channel(line)?,
            4 => self.m4_split_channel(line)?,
            5 => self.m5_switch_channel(line)?,
            6 => self.m6_power_scale(line)?,
            7 | 8 => self.m7_m8_override(code == 7, line)?,
            9 => self.m9_pwm_channel(line)?,
            10 => return self.m10_allocate(line),
            11 => self.m11_duration(line)?,
            12 => self.m12_min_power(line)?,
            13 => self.m13_max_power(line)?,
            33 => self.m33_link_sensor(line)?,
            35 => {
                let res = &mut self.board.res;
                for d in res.digitals.clear() {
                    res.pins.unassign(d.pin());
                }
            }
            36 => {
                let res = &mut self.board.res;
                for a in res.analogs.clear() {
                    res.pins.unassign(a.pin());
                }
            }
            37 => {
                let res = &mut self.board.res;
                for mut p in res.pwms.clear() {
                    p.off(&mut self.board.io);
                    res.pins.unassign(p.pin());
                }
            }
            38 => self.m38_remove_pwm(line)?,
            39 => self.m39_remove_analog(line)?,
            40 => self.m40_remove_digital(line)?,
            41 => self.m41_m42_output(line, PinState::High)?,
            42 => self.m41_m42_output(line, PinState::Low)?,
            44 => return self.m44_read_digital(line),
            45 => self.m45_pwm_write(line)?,
            46 => return self.m46_read_analog(line),
            47 => return self.m47_battery(line),
            80 => self.power_supply(PinState::High),
            81 => self.m81_power_off(line)?,
            110 => {}
            115 => {
                let mut block = Block::open(&mut self.console, firmware::NAME);
                block
                    .text(firmware::URL)
                    .text(firmware::PROTOCOL_VERSION)
                    .text(firmware::MACHINE_TYPE)
                    .text(firmware::UUID);
                block.close();
                return Ok(());
            }
            300 => return self.m300_range(line),
            301 => self.m301_add_sensor(line)?,
            302 => self.m302_remove_sensor(line)?,
            303 => self.m303_scan_analog(),
            304 => self.m304_watch_analog(line)?,
            305 => self.m305_scan_digital(),
            306 => self.m306_watch_digital(line)?,
            445 => self.m445_pwm_off(line)?,
            500 => {
                self.config.realtime_output = self.realtime;
                self.store.save(&self.config)?;
            }
            501 => {
                self.config = load_or_default(&self.store);
                self.realtime = self.config.realtime_output;
            }
            502 => {
                self.config = ControllerConfig::default();
                self.realtime = self.config.realtime_output;
            }
            503 => {
                let mut block = Block::open(&mut self.console, header::EEPROM);
                for value in self.config.report_lines() {
                    block.item(value);
                }
                block.close();
                return Ok(());
            }
            700 => return self.m700_status(),
            701..=704 => return self.m701_m704_pin_report(code),
            705 => return self.m705_control_settings(),
            706 => {
                let mut pins = String::new();
                for pin in self.board.res.pins.assigned() {
                    let _ = write!(pins, "{pin},");
                }
                let mut block = Block::open(&mut self.console, header::ASSIGNED_PINS);
                block.text(pins);
                block.close();
                return Ok(());
            }
            798 => return self.m798_controller_status(line),
            799 => self.m799_reset(line)?,
            802 => return self.m802_dataset(line),
            999 => {
                self.resume();
                self.watchdog.restart();
            }
            _ => return Err(ProtocolError::UnknownMCode.into()),
        }
        response::simple(&mut self.console, format_args!("M{code}"));
        Ok(())
    }

    // ── Channel creation ──────────────────────────────────────

    /// `M2 [Z] C [W<encoder>] [E<default dir>]` on any motor slot.
    fn m2_channel_options(&mut self, line: &CommandLine) -> Result<()> {
        let z = slot_index(line)?;
        let ch = channel_arg(line)?;
        let encoder = encoder_arg(line)?;
        let default_dir = line.int('E').map(Direction::from_flag);
        let ctl = slot_mut(&mut self.motors, z)?.control_mut();
        if let Some(pin) = encoder {
            ctl.create_encoder(&mut self.board.ctx(), ch, pin)?;
        }
        if let Some(dir) = default_dir {
            ctl.set_default_direction(ch, dir);
        }
        Ok(())
    }

    /// `M3 [Z] P C D<dir pin> E<default dir> [W] [X] [R]`
    fn m3_hbridge_channel(&mut self, line: &CommandLine) -> Result<()> {
        let z = slot_index(line)?;
        let pin = line.require_as::<u8>('P')?;
        let ch = channel_arg(line)?;
        let dir_pin = line.require_as::<u8>('D')?;
        let dir = Direction::from_flag(line.require('E')?);
        let encoder = encoder_arg(line)?;
        let (prescale, resolution) = timer_args(line)?;

        let MotorDriver::HBridge(drv) = slot_mut(&mut self.motors, z)? else {
            return Err(ResourceError::WrongDriverType.into());
        };
        let mut ctx = self.board.ctx();
        drv.create_pwm(&mut ctx, ch, pin, dir_pin, dir, prescale, resolution)?;
        if let Some(w) = encoder {
            drv.create_encoder(&mut ctx, ch, w)?;
        }
        Ok(())
    }

    /// `M4 [Z] P Q C D<enable> E [W] [X] [R]`
    fn m4_split_channel(&mut self, line: &CommandLine) -> Result<()> {
        let z = slot_index(line)?;
        let pin_a = line.require_as::<u8>('P')?;
        let pin_b = line.require_as::<u8>('Q')?;
        let ch = channel_arg(line)?;
        let enable = line.require_as::<u8>('D')?;
        let dir = Direction::from_flag(line.require('E')?);
        let encoder = encoder_arg(line)?;
        let (prescale, resolution) = timer_args(line)?;

        let MotorDriver::SplitBridge(drv) = slot_mut(&mut self.motors, z)? else {
            return Err(ResourceError::WrongDriverType.into());
        };
        let mut ctx = self.board.ctx();
        drv.create_pwm(&mut ctx, ch, pin_a, pin_b, enable, dir, prescale, resolution)?;
        if let Some(w) = encoder {
            drv.create_encoder(&mut ctx, ch, w)?;
        }
        Ok(())
    }

    /// `M5 [Z] P Q C D<enable> E [W]`
    fn m5_switch_channel(&mut self, line: &CommandLine) -> Result<()> {
        let z = slot_index(line)?;
        let pin_a = line.require_as::<u8>('P')?;
        let pin_b = line.require_as::<u8>('Q')?;
        let ch = channel_arg(line)?;
        let enable = line.require_as::<u8>('D')?;
        let dir = Direction::from_flag(line.require('E')?);
        let encoder = encoder_arg(line)?;

        let MotorDriver::SwitchBridge(drv) = slot_mut(&mut self.motors, z)? else {
            return Err(ResourceError::WrongDriverType.into());
        };
        let mut ctx = self.board.ctx();
        drv.create_digital(&mut ctx, ch, pin_a, pin_b, enable, dir)?;
        if let Some(w) = encoder {
            drv.create_encoder(&mut ctx, ch, w)?;
        }
        Ok(())
    }

    /// `M9 [Z] P C D<enable> [X] [R]` on a PWM-only slot.
    fn m9_pwm_channel(&mut self, line: &CommandLine) -> Result<()> {
        let z = slot_index(line)?;
        let pin = line.require_as::<u8>('P')?;
        let ch = channel_arg(line)?;
        let enable = line.require_as::<u8>('D')?;
        let (prescale, resolution) = timer_args(line)?;
        let drv = slot_mut(&mut self.pwms, z)?;
        drv.create_pwm(&mut self.board.ctx(), ch, pin, enable, prescale, resolution)
    }

    /// `M10 Z T<type>`: replace whatever the slot held, returning its pins.
    fn m10_allocate(&mut self, line: &CommandLine) -> Result<()> {
        if !line.has('Z') {
            return Err(ProtocolError::MissingParameter('Z').into());
        }
        let z = slot_index(line)?;
        let code = line.require('T')?;
        let Some(kind) = ControllerType::from_code(code) else {
            warn!("slot {}: bad controller type {}", z, code);
            response::simple(&mut self.console, format_args!("BAD CONTROLLER TYPE:{code}"));
            return Ok(());
        };

        let mut ctx = self.board.ctx();
        if kind == ControllerType::VariablePwm {
            if let Some(mut old) = self.pwms[z].take() {
                old.release(&mut ctx);
            }
            self.pwms[z] = Some(VariablePwmDriver::new(i32::from(self.config.max_pwm_level)));
        } else {
            if let Some(mut old) = self.motors[z].take() {
                old.control_mut().release(&mut ctx);
            }
            let drv = match kind {
                ControllerType::SmartSerial => {
                    let mut smart = SmartSerialDriver::new();
                    smart.attach(&mut ctx, self.config.smart_baud);
                    MotorDriver::Smart(smart)
                }
                ControllerType::SplitBridge => MotorDriver::SplitBridge(SplitBridgeDriver::new()),
                ControllerType::SwitchBridge => MotorDriver::SwitchBridge(SwitchBridgeDriver::new()),
                _ => MotorDriver::HBridge(HBridgeDriver::new()),
            };
            self.motors[z] = Some(drv);
            self.last_fault[z] = 0;
        }
        info!("slot {}: allocated {:?}", z, kind);
        self.ack("M10");
        Ok(())
    }

    // ── Slot tuning ───────────────────────────────────────────

    /// `M6 [Z] S<scale>` motor, or `M6 [Z] X<scale>` PWM.
    fn m6_power_scale(&mut self, line: &CommandLine) -> Result<()> {
        let z = slot_index(line)?;
        if let Some(scale) = line.int32('S') {
            slot_mut(&mut self.motors, z)?.control_mut().set_power_scale(scale);
        } else if let Some(scale) = line.int32('X') {
            slot_mut(&mut self.pwms, z)?.set_power_scale(scale);
        } else {
            return Err(ProtocolError::MissingParameter('S').into());
        }
        Ok(())
    }

    /// `M7` latches the slot stopped, `M8` releases it.
    fn m7_m8_override(&mut self, stop: bool, line: &CommandLine) -> Result<()> {
        let z = slot_index(line)?;
        let mut ctx = self.board.ctx();
        if line.has('X') {
            let drv = slot_mut(&mut self.pwms, z)?;
            if stop {
                drv.set_shutdown(&mut ctx);
            } else {
                drv.set_run(&mut ctx);
            }
        } else {
            let ctl = slot_mut(&mut self.motors, z)?.control_mut();
            if stop {
                ctl.set_shutdown(&mut ctx);
            } else {
                ctl.set_run(&mut ctx);
            }
        }
        Ok(())
    }

    /// `M11 [Z] C D<limit>` motor, or `M11 [Z] C X<limit>` PWM.
    fn m11_duration(&mut self, line: &CommandLine) -> Result<()> {
        let z = slot_index(line)?;
        let ch = channel_arg(line)?;
        if let Some(limit) = line.optional_as::<u32>('X')? {
            slot_mut(&mut self.pwms, z)?.set_duration(ch, limit);
        } else {
            let limit = line.require_as::<u32>('D')?;
            slot_mut(&mut self.motors, z)?.control_mut().set_duration(ch, limit);
        }
        Ok(())
    }

    /// `M12 [Z] C P<min>` motor, or `M12 [Z] C X<min>` PWM.
    fn m12_min_power(&mut self, line: &CommandLine) -> Result<()> {
        let z = slot_index(line)?;
        let ch = channel_arg(line)?;
        if let Some(level) = line.int32('X') {
            slot_mut(&mut self.pwms, z)?.set_min_level(ch, level);
        } else {
            let power = line.int32('P').ok_or(ProtocolError::MissingParameter('P'))?;
            slot_mut(&mut self.motors, z)?.control_mut().set_min_power(ch, power);
        }
        Ok(())
    }

    /// `M13 [Z] P<max>` motor, or `M13 [Z] X<max>` PWM.
    fn m13_max_power(&mut self, line: &CommandLine) -> Result<()> {
        let z = slot_index(line)?;
        if let Some(power) = line.int32('P') {
            slot_mut(&mut self.motors, z)?.control_mut().set_max_power(power);
        } else if let Some(level) = line.int32('X') {
            slot_mut(&mut self.pwms, z)?.set_max_level(level);
        } else {
            return Err(ProtocolError::MissingParameter('P').into());
        }
        Ok(())
    }

    /// `M33 [Z] P<sensor pin> D<cm> [E<facing>] [C]`; the sensor must be
    /// registered with `M301` first.
    fn m33_link_sensor(&mut self, line: &CommandLine) -> Result<()> {
        let z = slot_index(line)?;
        let pin = line.require_as::<u8>('P')?;
        let distance = line.require_as::<u32>('D')?;
        let facing = Direction::from_flag(line.int('E').unwrap_or(1));
        let ch = match line.int('C') {
            Some(n) => Some(ChannelId::new(n)?),
            None => None,
        };
        let ctl = slot_mut(&mut self.motors, z)?.control_mut();
        ctl.link_distance_sensor(&self.board.res, pin, distance, facing, ch)?;
        Ok(())
    }

    // ── Persistent pins ───────────────────────────────────────

    fn m38_remove_pwm(&mut self, line: &CommandLine) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        let res = &mut self.board.res;
        release_assigned(&mut res.pins, pin)?;
        while let Some(idx) = res.pwms.position(|p| p.pin() == pin) {
            res.pwms.take(idx);
        }
        Ok(())
    }

    fn m39_remove_analog(&mut self, line: &CommandLine) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        let res = &mut self.board.res;
        release_assigned(&mut res.pins, pin)?;
        if let Some(idx) = res.analog_index(pin) {
            res.analogs.take(idx);
        }
        Ok(())
    }

    fn m40_remove_digital(&mut self, line: &CommandLine) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        let res = &mut self.board.res;
        release_assigned(&mut res.pins, pin)?;
        if let Some(idx) = res.digital_index(pin) {
            res.digitals.take(idx);
        }
        Ok(())
    }

    /// `M41 P` / `M42 P`: persistent output driven HIGH / LOW.
    fn m41_m42_output(&mut self, line: &CommandLine, level: PinState) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        let res = &mut self.board.res;
        let (idx, _) = claim_entry(
            &mut res.pins,
            &mut res.digitals,
            pin,
            || DigitalPin::new(pin),
            |d| d.pin() == pin,
        )?;
        if let Some(d) = res.digitals.get_mut(idx) {
            d.set_mode(&mut self.board.io, PinMode::Output);
            d.write(&mut self.board.io, level);
        }
        Ok(())
    }

    /// `M44 P [U]`: one-shot digital read, the pin is returned afterwards.
    fn m44_read_digital(&mut self, line: &CommandLine) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        let res = &mut self.board.res;
        if !res.pins.assign(pin) {
            return Err(ResourceError::PinUnavailable(pin).into());
        }
        let mut d = DigitalPin::new(pin);
        if line.has('U') {
            d.set_mode(&mut self.board.io, PinMode::InputPullup);
        }
        let state = d.read(&mut self.board.io);
        res.pins.unassign(pin);

        let mut block = Block::open(&mut self.console, header::DIGITAL_PIN);
        block.item(pin).item(level_code(state));
        block.close();
        Ok(())
    }

    /// `M45 P S<0..255> [T<mode>] [R<bits>] [X<prescale>]`: persistent PWM
    /// output. A pin already in the PWM arena only gets a new duty and mode.
    fn m45_pwm_write(&mut self, line: &CommandLine) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        let duty = u16::try_from(line.require('S')?)
            .ok()
            .filter(|&d| d <= 255)
            .unwrap_or(0);
        let res = &mut self.board.res;
        let (idx, fresh) = claim_entry(
            &mut res.pins,
            &mut res.pwms,
            pin,
            || PwmTimerChannel::new(pin),
            |p| p.pin() == pin,
        )?;
        let Some(pwm) = res.pwms.get_mut(idx) else {
            return Err(ResourceError::SlotEmpty.into());
        };
        let io: &mut dyn HardwarePort = &mut self.board.io;
        if fresh {
            let mode = line
                .int('T')
                .map_or(OutputMode::Clear, |t| OutputMode::from_code(t).unwrap_or(OutputMode::Stop));
            let resolution = line
                .int('R')
                .map_or(8, |r| u8::try_from(r).ok().filter(|r| (8..=10).contains(r)).unwrap_or(8));
            let prescale = line
                .int('X')
                .map_or(1, |x| u8::try_from(x).ok().filter(|&x| x <= 7).unwrap_or(0));
            pwm.init(io);
            pwm.set_prescale(io, prescale);
            pwm.set_resolution(io, resolution);
            pwm.write_duty(io, duty, mode);
        } else {
            let mode = line
                .int('T')
                .map_or(OutputMode::Clear, |t| OutputMode::from_code(t).unwrap_or(OutputMode::Clear));
            pwm.write_duty(io, duty, mode);
        }
        Ok(())
    }

    /// Two reads of a freshly claimed analog pin; the first settles the mux.
    fn sample_analog(&mut self, pin: u8) -> Result<u16> {
        let res = &mut self.board.res;
        if !res.pins.assign(pin) {
            return Err(ResourceError::PinUnavailable(pin).into());
        }
        let a = AnalogPin::new(pin);
        a.read(&mut self.board.io);
        let value = a.read(&mut self.board.io);
        res.pins.unassign(pin);
        Ok(value)
    }

    /// `M46 P`: one-shot analog read.
    fn m46_read_analog(&mut self, line: &CommandLine) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        let value = self.sample_analog(pin)?;
        let mut block = Block::open(&mut self.console, header::ANALOG_PIN);
        block.item(pin).item(value);
        block.close();
        Ok(())
    }

    /// `M47 P [T<threshold>]`: publish a `battery` block when the reading
    /// is below the threshold, otherwise acknowledge.
    fn m47_battery(&mut self, line: &CommandLine) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        let threshold = match line.int('T') {
            Some(t) => t,
            None => i64::from(self.config.battery_threshold),
        };
        let value = self.sample_analog(pin)?;
        if i64::from(value) < threshold {
            warn!("battery low: {} < {}", value, threshold);
            let mut block = Block::open(&mut self.console, header::BATTERY);
            block.item(value);
            block.close();
        } else {
            self.ack("M47");
        }
        Ok(())
    }

    /// `M445 P`: stop a persistent PWM output and return its pin.
    fn m445_pwm_off(&mut self, line: &CommandLine) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        let res = &mut self.board.res;
        res.pins.unassign(pin);
        if let Some(idx) = res.pwm_index(pin) {
            if let Some(mut pwm) = res.pwms.take(idx) {
                pwm.write_duty(&mut self.board.io, 0, OutputMode::Stop);
            }
        }
        Ok(())
    }

    // ── Power ─────────────────────────────────────────────────

    fn power_supply(&mut self, level: PinState) {
        if let Ok(pin) = u8::try_from(PS_ON_PIN) {
            self.board.io.pin_mode(pin, PinMode::Output);
            self.board.io.digital_write(pin, level);
        }
    }

    /// `M81 [Z<slot|-1>] [X]`: emergency stop 81 on the chosen slot, or on
    /// every connected slot when `Z` is -1 or absent, then cut the supply and
    /// wait a second.
    fn m81_power_off(&mut self, line: &CommandLine) -> Result<()> {
        let code = DriverFault::PowerOff.code();
        let pwm = line.has('X');
        let every = line.int('Z').is_none_or(|z| z == -1);
        let target = if every { None } else { Some(slot_index(line)?) };
        let mut ctx = self.board.ctx();
        if pwm {
            for (z, slot) in self.pwms.iter_mut().enumerate() {
                let Some(drv) = slot.as_mut().filter(|d| d.is_connected()) else {
                    continue;
                };
                if target.is_none_or(|t| t == z) {
                    drv.emergency_stop(&mut ctx, code);
                }
            }
        } else {
            for (z, slot) in self.motors.iter_mut().enumerate() {
                let Some(drv) = slot.as_mut() else {
                    continue;
                };
                let ctl = drv.control_mut();
                if target.is_none_or(|t| t == z) && ctl.is_connected(&mut ctx) {
                    ctl.emergency_stop(&mut ctx, code);
                }
            }
        }
        self.power_supply(PinState::Low);
        self.board.io.delay_ms(1000);
        Ok(())
    }

    // ── Ultrasonic sensors ────────────────────────────────────

    /// `M300 P`: one ping on an unregistered pin.
    fn m300_range(&mut self, line: &CommandLine) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        if pin == 0 {
            return Err(ProtocolError::BadParameter('P').into());
        }
        let range = Ultrasonic::new(pin).range(&mut self.board.io);
        let mut block = Block::open(&mut self.console, header::ULTRASONIC);
        block.item(pin).item(range);
        block.close();
        Ok(())
    }

    fn m301_add_sensor(&mut self, line: &CommandLine) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        let res = &mut self.board.res;
        if !res.pins.assign(pin) {
            return Err(ResourceError::PinUnavailable(pin).into());
        }
        if let Err(e) = res.sonics.push(res.sonics.capacity(), Ultrasonic::new(pin)) {
            res.pins.unassign(pin);
            return Err(e.into());
        }
        Ok(())
    }

    fn m302_remove_sensor(&mut self, line: &CommandLine) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        let res = &mut self.board.res;
        res.pins.unassign(pin);
        if let Some(idx) = res.sonic_index(pin) {
            res.sonics.take(idx);
        }
        Ok(())
    }

    // ── Watch lists ───────────────────────────────────────────

    /// Publish every watched analog input whose reading is outside its
    /// exclusion band.
    fn m303_scan_analog(&mut self) {
        for (_, a) in self.board.res.analogs.iter() {
            if a.mode() == PinMode::Output {
                continue;
            }
            a.read(&mut self.board.io);
            let value = a.read(&mut self.board.io);
            if a.is_excluded(value) {
                continue;
            }
            let mut block = Block::open(&mut self.console, header::ANALOG_PIN);
            block.item(a.pin()).item(value);
            block.close();
        }
    }

    /// `M304 P [L<low>] [H<high>] [U]`
    fn m304_watch_analog(&mut self, line: &CommandLine) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        let low = line.optional_as::<u16>('L')?.unwrap_or(0);
        let high = line.optional_as::<u16>('H')?.unwrap_or(0);
        let res = &mut self.board.res;
        let (idx, fresh) = claim_entry(
            &mut res.pins,
            &mut res.analogs,
            pin,
            || AnalogPin::new(pin),
            |a| a.pin() == pin,
        )?;
        if let Some(a) = res.analogs.get_mut(idx) {
            if fresh {
                a.set_mode(&mut self.board.io, input_mode(line.has('U')));
            }
            a.set_exclusion(low, high);
        }
        Ok(())
    }

    /// Publish every watched digital input currently at its target level.
    fn m305_scan_digital(&mut self) {
        for (_, d) in self.board.res.digitals.iter() {
            if d.mode() == PinMode::Output {
                continue;
            }
            if let Some(state) = d.on_target(&mut self.board.io) {
                let mut block = Block::open(&mut self.console, header::DIGITAL_PIN);
                block.item(d.pin()).item(level_code(state));
                block.close();
            }
        }
    }

    /// `M306 P [T<0|1>] [U]`
    fn m306_watch_digital(&mut self, line: &CommandLine) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        let target = PinState::from(line.int('T').unwrap_or(0) != 0);
        let res = &mut self.board.res;
        let (idx, fresh) = claim_entry(
            &mut res.pins,
            &mut res.digitals,
            pin,
            || DigitalPin::new(pin),
            |d| d.pin() == pin,
        )?;
        if let Some(d) = res.digitals.get_mut(idx) {
            if fresh {
                d.set_mode(&mut self.board.io, input_mode(line.has('U')));
            }
            d.set_target(target);
        }
        Ok(())
    }

    // ── Reports ───────────────────────────────────────────────

    fn m700_status(&mut self) -> Result<()> {
        let cause = self.board.io.reset_cause();
        let free = self.board.io.free_memory();
        let mut block = Block::open(&mut self.console, header::STATUS);
        for (bit, label) in RESET_CAUSES {
            if cause & bit != 0 {
                block.text(label);
            }
        }
        block.text(format_args!("{VERSION} Free Memory: {free}"));
        block.close();
        Ok(())
    }

    /// `M701` digital, `M702` analog, `M703` ultrasonic, `M704` PWM pins.
    fn m701_m704_pin_report(&mut self, code: i64) -> Result<()> {
        let res = &self.board.res;
        let out: &mut dyn ConsolePort = &mut self.console;
        match code {
            701 => {
                let mut block = Block::open(out, header::DIGITAL_PIN_SETTING);
                for (_, d) in res.digitals.iter() {
                    block.text(format_args!("{} {}", d.pin(), d.mode().label()));
                }
                block.close();
            }
            702 => {
                let mut block = Block::open(out, header::ANALOG_PIN_SETTING);
                for (_, a) in res.analogs.iter() {
                    block.text(format_args!("{} {}", a.pin(), a.mode().label()));
                }
                block.close();
            }
            703 => {
                let mut block = Block::open(out, header::ULTRASONIC_PIN_SETTING);
                for (_, s) in res.sonics.iter() {
                    block.text(format_args!("Pin:{}", s.pin()));
                }
                block.close();
            }
            _ => {
                let mut block = Block::open(out, header::PWM_PIN_SETTING);
                for (_, p) in res.pwms.iter() {
                    let unit = p.binding().map_or(-1, |b| i16::from(b.unit.index()));
                    block.text(format_args!(
                        "Pin:{} Timer channel:{} {}",
                        p.pin(),
                        unit,
                        p.pin_mode().label()
                    ));
                }
                block.close();
            }
        }
        Ok(())
    }

    /// Per-channel settings of every allocated motor slot, then every PWM
    /// slot.
    fn m705_control_settings(&mut self) -> Result<()> {
        let res = &self.board.res;
        let mut block = Block::open(&mut self.console, header::MOTOR_CONTROL_SETTING);
        for drv in self.motors.iter().flatten() {
            let common = drv.control().common();
            for ch in ChannelId::up_to(common.channel_count()) {
                let s = common.channel(ch);
                block.text(format_args!(
                    "Motor channel:{} Min Power:{} Speed:{} Curr. Dir:{} Default. Dir:{}",
                    ch,
                    s.min_power,
                    s.speed,
                    s.current_direction.code(),
                    s.default_direction.code()
                ));
                match &s.encoder {
                    Some(e) => block.text(format_args!(
                        " Encoder Pin:{} Count:{} Duration:{}",
                        e.pin,
                        common.encoder_count(ch),
                        s.duration_limit
                    )),
                    None => block.text(" Encoder Pin:None."),
                };
            }
            let linked = common.total_ultrasonics();
            if linked == 0 {
                block.text("Ultrasonic pins:None.");
                continue;
            }
            block.text(format_args!("Ultrasonic pins:{linked}"));
            for (_, s) in common.channels() {
                if let Some(link) = &s.ultrasonic {
                    let pin = res.sonics.get(link.sensor).map_or(0, Ultrasonic::pin);
                    block.text(format_args!(
                        "Pin:{} Facing:{} Shutdown cm:{}",
                        pin,
                        link.facing.code(),
                        link.min_distance
                    ));
                }
            }
        }
        block.close();

        let mut block = Block::open(&mut self.console, header::PWM_CONTROL_SETTING);
        for drv in self.pwms.iter().flatten() {
            let common = drv.common();
            for ch in ChannelId::up_to(common.channel_count()) {
                block.text(format_args!(
                    "PWM channel:{} Min Level:{} Duration:{}",
                    ch,
                    common.min_level(ch),
                    common.duration(ch)
                ));
            }
        }
        block.close();
        Ok(())
    }

    /// `M798 [Z] [X]`: driver description of each channel.
    fn m798_controller_status(&mut self, line: &CommandLine) -> Result<()> {
        let z = slot_index(line)?;
        let mut ctx = self.board.ctx();
        let mut block = Block::open(&mut self.console, header::CONTROLLER_STATUS);
        if line.has('X') {
            if let Some(drv) = self.pwms[z].as_mut() {
                for ch in ChannelId::up_to(drv.common().channel_count()) {
                    block.text(format_args!("PWM Channel:{ch}"));
                    block.text(drv.describe(&mut ctx, ch));
                }
            }
        } else if let Some(drv) = self.motors[z].as_mut() {
            let ctl = drv.control_mut();
            if ctl.is_connected(&mut ctx) {
                for ch in ChannelId::up_to(ctl.common().channel_count()) {
                    block.text(format_args!("Motor Channel:{ch}"));
                    block.text(ctl.describe(&mut ctx, ch));
                }
            }
        }
        block.close();
        Ok(())
    }

    /// `M799 Z [X]` resets one slot with 799; without `Z` every slot of the
    /// chosen kind gets -1.
    fn m799_reset(&mut self, line: &CommandLine) -> Result<()> {
        let pwm = line.has('X');
        if !line.has('Z') {
            let code = DriverFault::ResetAll.code();
            if pwm {
                self.estop_pwms(code);
            } else {
                self.estop_motors(code);
            }
            return Ok(());
        }
        let z = slot_index(line)?;
        let code = DriverFault::Reset.code();
        let mut ctx = self.board.ctx();
        if pwm {
            slot_mut(&mut self.pwms, z)?.emergency_stop(&mut ctx, code);
        } else {
            slot_mut(&mut self.motors, z)?.control_mut().emergency_stop(&mut ctx, code);
        }
        Ok(())
    }

    /// `M802 P S<count> [M<us>] [X]`: burst of analog reads. Item 1 is the
    /// pin, items 2.. the readings after the first.
    fn m802_dataset(&mut self, line: &CommandLine) -> Result<()> {
        let pin = line.require_as::<u8>('P')?;
        let count = line
            .int('S')
            .map_or(0, |n| usize::try_from(n).unwrap_or(0))
            .min(MAX_DATASET);
        let micros = line.optional_as::<u32>('M')?.unwrap_or(0);

        let io: &mut dyn HardwarePort = &mut self.board.io;
        let mut a = AnalogPin::new(pin);
        a.set_mode(io, input_mode(line.has('X')));
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(a.read(io));
            io.delay_us(micros);
        }

        let mut block = Block::open(&mut self.console, header::ANALOG_PIN);
        if count > 0 {
            block.item(pin);
        }
        for value in values.iter().skip(1) {
            block.item(value);
        }
        block.close();
        Ok(())
    }
}
