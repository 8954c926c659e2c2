//! Smart closed-loop motor controller on a serial link.
//!
//! The controller speaks a short ASCII grammar: `!` commands, `?` queries,
//! `^`/`%` configuration. Every byte is written, flushed and its hardware
//! echo read back and discarded. A response runs until `\r`; the reader
//! polls 10 times at 10 ms intervals, so one exchange never blocks the
//! main loop for much more than 100 ms.
//!
//! Commands succeed when the reply starts with `+`. Queries answer
//! `KEY=value`, parsed with a fixed per-query key.

use core::fmt::Write as _;

use heapless::Vec;
use log::{debug, warn};

use super::policy::PowerScaling;
use super::{DriveContext, MotorControl};
use crate::channel::{ChannelId, Direction, MotorCommon};
use crate::error::{Result, SerialError};

pub const DEFAULT_MAX_POWER: i32 = 1000;
pub const CHANNELS: u8 = 2;

const QUERY_CHAR: u8 = 0x05;
const ACK_CHAR: u8 = 0x06;
const TERMINATOR: u8 = b'\r';

const RESPONSE_SIZE: usize = 64;
/// Longest command accepted, terminator included.
const MAX_COMMAND: usize = 19;

const POLLS: u32 = 10;
const POLL_INTERVAL_MS: u32 = 10;
const ECHO_DELAY_MS: u32 = 1;

pub type Response = Vec<u8, RESPONSE_SIZE>;

pub struct SmartSerialDriver {
    common: MotorCommon,
}

impl Default for SmartSerialDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SmartSerialDriver {
    pub fn new() -> Self {
        let mut common = MotorCommon::new(DEFAULT_MAX_POWER);
        common.set_channel_count(CHANNELS);
        Self { common }
    }

    /// Bring the link up at `baud` (normally [`crate::pins::SMART_BAUD`]).
    pub fn attach(&mut self, ctx: &mut DriveContext<'_>, baud: u32) {
        ctx.link.set_baud(baud);
        debug!("smart: link at {} baud", baud);
    }

    // ── Wire exchange ─────────────────────────────────────────

    fn write_echoed(ctx: &mut DriveContext<'_>, bytes: &[u8]) -> core::result::Result<(), SerialError> {
        if !ctx.link.is_present() {
            return Err(SerialError::Error);
        }
        for &b in bytes {
            ctx.link.write_byte(b);
            ctx.link.flush();
            ctx.io.delay_ms(ECHO_DELAY_MS);
            let _ = ctx.link.read_byte();
        }
        Ok(())
    }

    fn read_response(ctx: &mut DriveContext<'_>) -> core::result::Result<Response, SerialError> {
        let mut buf = Response::new();
        for _ in 0..POLLS {
            while let Some(byte) = ctx.link.read_byte() {
                buf.push(byte).map_err(|_| SerialError::BufferOver)?;
                if byte == TERMINATOR {
                    return Ok(buf);
                }
            }
            ctx.io.delay_ms(POLL_INTERVAL_MS);
        }
        Err(SerialError::Timeout)
    }

    /// Send a command and require a `+` acknowledgement.
    pub fn send_command(ctx: &mut DriveContext<'_>, command: &str) -> core::result::Result<(), SerialError> {
        if command.is_empty() || command.len() > MAX_COMMAND {
            return Err(SerialError::BadCommand);
        }
        Self::write_echoed(ctx, command.as_bytes())?;
        let reply = Self::read_response(ctx)?;
        debug!("smart: {:?} -> {:?}", command.trim_end(), core::str::from_utf8(&reply).unwrap_or("?"));
        match reply.first() {
            Some(b'+') => Ok(()),
            Some(_) => Err(SerialError::BadCommand),
            None => Err(SerialError::BadResponse),
        }
    }

    pub fn send_query(ctx: &mut DriveContext<'_>, query: &str) -> core::result::Result<Response, SerialError> {
        Self::write_echoed(ctx, query.as_bytes())?;
        Self::read_response(ctx)
    }

    fn query_value(
        ctx: &mut DriveContext<'_>,
        query: &str,
        key: &'static str,
        min_len: usize,
    ) -> core::result::Result<i32, SerialError> {
        let reply = Self::send_query(ctx, query)?;
        if reply.len() < min_len {
            return Err(SerialError::BadResponse);
        }
        parse_fields(&reply, key)
            .and_then(|mut f| f.next())
            .ok_or(SerialError::BadResponse)
    }

    fn query_channel(ctx: &mut DriveContext<'_>, cmd: &'static str, ch: u8) -> core::result::Result<i32, SerialError> {
        let mut query = heapless::String::<MAX_COMMAND>::new();
        write!(query, "?{} {}\r", cmd, ch).map_err(|_| SerialError::BadCommand)?;
        Self::query_value(ctx, &query, cmd, 3)
    }

    fn command_fmt(ctx: &mut DriveContext<'_>, args: core::fmt::Arguments<'_>) -> core::result::Result<(), SerialError> {
        let mut command = heapless::String::<32>::new();
        command.write_fmt(args).map_err(|_| SerialError::BadCommand)?;
        Self::send_command(ctx, &command)
    }

    // ── Queries ───────────────────────────────────────────────

    /// `?FF`: controller fault bits OR'd with the sticky driver fault.
    pub fn query_fault_flag(&self, ctx: &mut DriveContext<'_>) -> core::result::Result<i32, SerialError> {
        Self::query_value(ctx, "?FF\r", "FF", 4).map(|f| f | self.common.fault_flag)
    }

    /// `?FS`: controller status bits.
    pub fn query_status_flag(ctx: &mut DriveContext<'_>) -> core::result::Result<i32, SerialError> {
        Self::query_value(ctx, "?FS\r", "FS", 4)
    }

    /// `?FID`: raw firmware identification line.
    pub fn query_firmware(ctx: &mut DriveContext<'_>) -> core::result::Result<Response, SerialError> {
        Self::send_query(ctx, "?FID\r")
    }

    /// `?BA`: battery amps summed over both channels.
    pub fn query_battery_amps(ctx: &mut DriveContext<'_>) -> core::result::Result<i32, SerialError> {
        let reply = Self::send_query(ctx, "?BA\r")?;
        if reply.len() < 4 {
            return Err(SerialError::BadResponse);
        }
        let mut fields = parse_fields(&reply, "BA").ok_or(SerialError::BadResponse)?;
        match (fields.next(), fields.next()) {
            (Some(a), Some(b)) => Ok(a + b),
            _ => Err(SerialError::BadResponse),
        }
    }

    pub fn query_channel_amps(ctx: &mut DriveContext<'_>, ch: u8) -> core::result::Result<i32, SerialError> {
        Self::query_channel(ctx, "BA", ch)
    }

    /// `?V 2`: main battery voltage (x10).
    pub fn query_battery_voltage(ctx: &mut DriveContext<'_>) -> core::result::Result<i32, SerialError> {
        Self::query_value(ctx, "?V 2\r", "V", 4)
    }

    /// `?V 1`: motor supply voltage (x10).
    pub fn query_motor_voltage(ctx: &mut DriveContext<'_>) -> core::result::Result<i32, SerialError> {
        Self::query_value(ctx, "?V 1\r", "V", 4)
    }

    pub fn query_motor_power(ctx: &mut DriveContext<'_>, ch: u8) -> core::result::Result<i32, SerialError> {
        Self::query_channel(ctx, "M", ch)
    }

    /// `?S`: encoder speed in RPM.
    pub fn query_encoder_speed(ctx: &mut DriveContext<'_>, ch: u8) -> core::result::Result<i32, SerialError> {
        Self::query_channel(ctx, "S", ch)
    }

    pub fn query_encoder_relative_speed(ctx: &mut DriveContext<'_>, ch: u8) -> core::result::Result<i32, SerialError> {
        Self::query_channel(ctx, "SR", ch)
    }

    /// `?C`: absolute hall transition count.
    pub fn query_brushless_counter(ctx: &mut DriveContext<'_>, ch: u8) -> core::result::Result<i32, SerialError> {
        Self::query_channel(ctx, "C", ch)
    }

    pub fn query_brushless_counter_relative(ctx: &mut DriveContext<'_>, ch: u8) -> core::result::Result<i32, SerialError> {
        Self::query_channel(ctx, "CR", ch)
    }

    pub fn query_brushless_speed(ctx: &mut DriveContext<'_>, ch: u8) -> core::result::Result<i32, SerialError> {
        Self::query_channel(ctx, "BS", ch)
    }

    pub fn query_brushless_speed_relative(ctx: &mut DriveContext<'_>, ch: u8) -> core::result::Result<i32, SerialError> {
        Self::query_channel(ctx, "BSR", ch)
    }

    /// `?TM`: controller clock in seconds.
    pub fn query_time(ctx: &mut DriveContext<'_>) -> core::result::Result<i32, SerialError> {
        Self::query_value(ctx, "?TM\r", "TM", 3)
    }

    // ── Configuration commands ────────────────────────────────

    pub fn command_reset(ctx: &mut DriveContext<'_>) -> core::result::Result<(), SerialError> {
        Self::send_command(ctx, "%RESET 321654987\r")
    }

    /// Disable closed-loop brushless feedback.
    pub fn command_brushless_counter(ctx: &mut DriveContext<'_>) -> core::result::Result<(), SerialError> {
        Self::send_command(ctx, "^BLFB 0\r")
    }

    pub fn set_encoder_ppr(ctx: &mut DriveContext<'_>, ch: u8, ppr: u16) -> core::result::Result<(), SerialError> {
        Self::command_fmt(ctx, format_args!("^EPPR {:02} {}\r", ch, ppr))
    }

    pub fn set_amp_limit(ctx: &mut DriveContext<'_>, ch: u8, amps: u16) -> core::result::Result<(), SerialError> {
        Self::command_fmt(ctx, format_args!("^ALIM {} {}\r", ch, amps))
    }

    pub fn load_configuration(ctx: &mut DriveContext<'_>) -> core::result::Result<(), SerialError> {
        Self::send_command(ctx, "%EELD\r")
    }

    pub fn save_configuration(ctx: &mut DriveContext<'_>) -> core::result::Result<(), SerialError> {
        Self::send_command(ctx, "%EESAV\r")
    }
}

/// Signed integers after `KEY=`, separated by `:`. `None` on a key
/// mismatch or when the first field does not parse.
fn parse_fields<'a>(reply: &'a [u8], key: &'static str) -> Option<impl Iterator<Item = i32> + 'a> {
    let text = core::str::from_utf8(reply).ok()?;
    let body = text.strip_prefix(key)?.strip_prefix('=')?;
    let body = body.trim_end_matches(['\r', '\n']);
    body.split(':').next()?.trim().parse::<i32>().ok()?;
    Some(body.split(':').map_while(|f| f.trim().parse::<i32>().ok()))
}

/// Controller command value for a signed request: clamp to the controller
/// range, mirror, lift to the minimum, cap, scale.
fn shape_command(power: i32, default: Direction, min_power: i32, max_power: i32, scale: i32) -> i32 {
    let power = power.clamp(-DEFAULT_MAX_POWER, DEFAULT_MAX_POWER);
    let mut p = if default.is_forward() { -power } else { power };
    if p != 0 && p.abs() < min_power {
        p = min_power * p.signum();
    }
    if p.abs() > max_power {
        p = max_power * p.signum();
    }
    if scale != 0 {
        p /= scale;
    }
    p
}

impl MotorControl for SmartSerialDriver {
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
        if ch.number() > self.common.channel_count() {
            return Err(SerialError::BadCommand.into());
        }
        let state = self.common.channel_mut(ch);
        state.speed = power;
        state.current_direction = if power < 0 { Direction::Reverse } else { Direction::Forward };
        let (default, min_power) = (state.default_direction, state.min_power);
        self.common.reset_encoders();
        if self.check_ultrasonic_shutdown(ctx) {
            return Ok(());
        }
        let p = shape_command(power, default, min_power, self.common.max_power, self.common.power_scale);
        self.common.fault_flag = 0;
        Self::command_fmt(ctx, format_args!("!G {:02} {}\r", ch.number(), p))?;
        Ok(())
    }

    fn emergency_stop(&mut self, ctx: &mut DriveContext<'_>, status: i32) -> i32 {
        for ch in ChannelId::up_to(self.common.channel_count()) {
            if let Err(e) = Self::command_fmt(ctx, format_args!("!G {:02} 0\r", ch.number())) {
                warn!("smart: stop channel {} failed: {}", ch, e);
            }
        }
        self.common.fault_flag = crate::error::DriverFault::DriverStop.code();
        self.common.reset_speeds();
        self.common.reset_encoders();
        status
    }

    fn is_connected(&mut self, ctx: &mut DriveContext<'_>) -> bool {
        if !ctx.link.is_present() {
            return false;
        }
        ctx.link.write_byte(QUERY_CHAR);
        ctx.link.flush();
        for _ in 0..POLLS {
            while let Some(byte) = ctx.link.read_byte() {
                if byte == ACK_CHAR {
                    return true;
                }
            }
            ctx.io.delay_ms(POLL_INTERVAL_MS);
        }
        false
    }

    fn query_fault(&mut self, ctx: &mut DriveContext<'_>) -> i32 {
        self.query_fault_flag(ctx).unwrap_or_else(SerialError::code)
    }

    fn query_status(&mut self, ctx: &mut DriveContext<'_>) -> i32 {
        Self::query_status_flag(ctx).unwrap_or_else(SerialError::code)
    }

    fn describe(&mut self, ctx: &mut DriveContext<'_>, ch: ChannelId) -> String {
        if !self.is_connected(ctx) {
            return format!("Controller channel {} is not connected.", ch);
        }
        let volts = Self::query_battery_voltage(ctx).unwrap_or_else(SerialError::code);
        let amps = Self::query_battery_amps(ctx).unwrap_or_else(SerialError::code);
        let fault = self.query_fault(ctx);
        let status = self.query_status(ctx);
        format!("Voltage:{} Amps:{} Fault:{} Status:{}", volts, amps, fault, status)
    }

    fn release(&mut self, ctx: &mut DriveContext<'_>) {
        self.release_encoders(ctx);
    }

    fn power_scaling(&self) -> PowerScaling {
        PowerScaling::Raw
    }

    fn default_max_power(&self) -> i32 {
        DEFAULT_MAX_POWER
    }
}
