//! Command dispatcher: owns the slot tables and routes each accepted line.
//!
//! Ten motor slots and ten PWM-only slots are addressed by `Z`. Drivers
//! reach the pins and arenas through a [`DriveContext`] assembled from the
//! [`Board`] on every call, so the dispatcher stays the single owner of
//! all hardware state.

use log::{debug, error, info, warn};

use super::line::{CommandLine, LineAssembler, LineVerdict, check_line};
use super::response::{self, Block};
use super::header;
use crate::app::ports::{ConfigPort, ConsolePort, HardwarePort, SerialLink};
use crate::channel::ChannelId;
use crate::config::{ControllerConfig, load_or_default};
use crate::drivers::watchdog::Watchdog;
use crate::error::{DriverFault, Error, ProtocolError, ResourceError, Result};
use crate::pins::MAX_SLOTS;
use crate::propulsion::{DriveContext, MotorDriver};
use crate::pwm_control::{PwmControl, VariablePwmDriver};
use crate::resources::ResourceRegistry;
use crate::safety::fault_messages;

/// Board I/O plus the resource registry the drivers draw from.
pub struct Board<H, L> {
    pub res: ResourceRegistry,
    pub io: H,
    pub link: L,
}

impl<H: HardwarePort, L: SerialLink> Board<H, L> {
    pub fn new(io: H, link: L) -> Self {
        Self {
            res: ResourceRegistry::new(),
            io,
            link,
        }
    }

    pub fn ctx(&mut self) -> DriveContext<'_> {
        DriveContext {
            res: &mut self.res,
            io: &mut self.io,
            link: &mut self.link,
        }
    }
}

pub struct Controller<H, L, C, P> {
    pub(super) board: Board<H, L>,
    pub(super) console: C,
    pub(super) store: P,
    pub(super) config: ControllerConfig,
    pub(super) motors: [Option<MotorDriver>; MAX_SLOTS],
    pub(super) pwms: [Option<VariablePwmDriver>; MAX_SLOTS],
    pub(super) watchdog: Watchdog,
    pub(super) realtime: bool,
    assembler: LineAssembler,
    pub(super) last_n: i64,
    stopped_last_n: i64,
    pub(super) stopped: bool,
    /// Fault value last published per motor slot.
    pub(super) last_fault: [i32; MAX_SLOTS],
}

/// `Z` slot index, 0 when absent.
pub(super) fn slot_index(line: &CommandLine) -> Result<usize> {
    let z = line.int('Z').unwrap_or(0);
    usize::try_from(z)
        .ok()
        .filter(|&z| z < MAX_SLOTS)
        .ok_or_else(|| ProtocolError::BadParameter('Z').into())
}

/// Required `C` channel, 1..=10.
pub(super) fn channel_arg(line: &CommandLine) -> Result<ChannelId> {
    Ok(ChannelId::new(line.require('C')?)?)
}

/// Slot entry at `z`, or `SlotEmpty`.
pub(super) fn slot_mut<T>(slots: &mut [Option<T>; MAX_SLOTS], z: usize) -> Result<&mut T> {
    slots
        .get_mut(z)
        .and_then(Option::as_mut)
        .ok_or_else(|| ResourceError::SlotEmpty.into())
}

impl<H, L, C, P> Controller<H, L, C, P>
where
    H: HardwarePort,
    L: SerialLink,
    C: ConsolePort,
    P: ConfigPort,
{
    pub fn new(io: H, link: L, console: C, store: P) -> Self {
        let config = load_or_default(&store);
        info!(
            "controller: ready (realtime {}, watchdog {} ms)",
            config.realtime_output, config.watchdog_timeout_ms
        );
        Self {
            board: Board::new(io, link),
            console,
            store,
            realtime: config.realtime_output,
            config,
            motors: Default::default(),
            pwms: Default::default(),
            watchdog: Watchdog::new(),
            assembler: LineAssembler::new(),
            last_n: 0,
            stopped_last_n: 0,
            stopped: false,
            last_fault: [0; MAX_SLOTS],
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn board(&self) -> &Board<H, L> {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board<H, L> {
        &mut self.board
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn motor(&self, z: usize) -> Option<&MotorDriver> {
        self.motors.get(z).and_then(Option::as_ref)
    }

    pub fn pwm(&self, z: usize) -> Option<&VariablePwmDriver> {
        self.pwms.get(z).and_then(Option::as_ref)
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn last_line(&self) -> i64 {
        self.last_n
    }

    pub fn realtime_output(&self) -> bool {
        self.realtime
    }

    // ── Main loop ─────────────────────────────────────────────

    /// One loop iteration: drain console bytes until a line completes,
    /// execute it, then run the inactivity pass.
    pub fn poll(&mut self) {
        while let Some(byte) = self.console.read_byte() {
            if let Some(line) = self.assembler.feed(byte) {
                self.process_line(&line);
                break;
            }
        }
        self.manage_inactivity();
    }

    /// Execute one complete line followed by the inactivity pass.
    pub fn run_line(&mut self, text: &str) {
        let line = CommandLine::parse(text);
        if !line.is_empty() {
            self.process_line(&line);
        }
        self.manage_inactivity();
    }

    pub fn process_line(&mut self, line: &CommandLine) {
        debug!("cmd: {}", line);
        match check_line(line, &mut self.last_n) {
            Ok(LineVerdict::Execute) => self.dispatch(line),
            Ok(LineVerdict::Comment) => {}
            Err(e) => self.report(None, line, e.into()),
        }
    }

    fn dispatch(&mut self, line: &CommandLine) {
        let (label, result) = if let Some(code) = line.int('G') {
            let result = if self.stopped && (0..=5).contains(&code) {
                Err(ProtocolError::Stopped.into())
            } else {
                self.gcode(code, line)
            };
            (Some(('G', code)), result)
        } else if let Some(code) = line.int('M') {
            (Some(('M', code)), self.mcode(code, line))
        } else {
            (None, Err(ProtocolError::UnknownCommand.into()))
        };
        if let Err(e) = result {
            self.report(label, line, e);
        }
        self.console.flush();
    }

    fn report(&mut self, label: Option<(char, i64)>, line: &CommandLine, err: Error) {
        let out: &mut dyn ConsolePort = &mut self.console;
        match err {
            Error::Protocol(
                e @ (ProtocolError::LineSequence
                | ProtocolError::ChecksumMismatch
                | ProtocolError::MissingChecksum
                | ProtocolError::ChecksumWithoutLine),
            ) => {
                warn!("line rejected: {} (last {})", e, self.last_n);
                response::simple(out, format_args!("{}{}", e.message(), self.last_n));
                if e.requests_resend() {
                    response::resend(out, self.last_n.wrapping_add(1));
                }
            }
            Error::Protocol(
                e @ (ProtocolError::UnknownCommand | ProtocolError::UnknownGCode | ProtocolError::UnknownMCode),
            ) => {
                warn!("{}: {}", e, line);
                response::simple(out, format_args!("{}{}", e.message(), line));
            }
            Error::Protocol(ProtocolError::Stopped) => {
                response::simple(out, ProtocolError::Stopped.message());
            }
            e => {
                warn!("command {} failed: {}", line, e);
                match label {
                    Some((letter, code)) => response::simple(out, format_args!("Error:{letter}{code} {e}")),
                    None => response::simple(out, format_args!("Error:{e}")),
                }
            }
        }
        out.flush();
    }

    /// `<code/>` acknowledgement.
    pub(super) fn ack(&mut self, code: &str) {
        response::simple(&mut self.console, code);
    }

    // ── Safety ────────────────────────────────────────────────

    /// Latch Stopped, remember the line number and stop every motor slot.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.stopped_last_n = self.last_n;
        error!("controller: stopped at line {}", self.last_n);
        self.estop_motors(DriverFault::ControllerStopped.code());
    }

    /// Clear the Stopped latch and resume sequencing where it left off.
    pub fn resume(&mut self) {
        if self.stopped {
            warn!("controller: stop latch cleared, resuming after line {}", self.stopped_last_n);
        }
        self.stopped = false;
        self.last_n = self.stopped_last_n;
    }

    /// Emergency stop every motor slot and latch Stopped.
    pub fn kill(&mut self) {
        error!("controller: kill");
        self.estop_motors(DriverFault::Kill.code());
        self.stopped = true;
        self.stopped_last_n = self.last_n;
    }

    pub(super) fn estop_motors(&mut self, status: i32) {
        let mut ctx = self.board.ctx();
        for drv in self.motors.iter_mut().flatten() {
            drv.control_mut().emergency_stop(&mut ctx, status);
        }
    }

    pub(super) fn estop_pwms(&mut self, status: i32) {
        let mut ctx = self.board.ctx();
        for drv in self.pwms.iter_mut().flatten() {
            drv.emergency_stop(&mut ctx, status);
        }
    }

    /// Interlock checks and fault publication for every connected motor
    /// slot, then range telemetry when realtime output is on.
    pub fn manage_inactivity(&mut self) {
        for z in 0..MAX_SLOTS {
            let Some(drv) = self.motors[z].as_mut() else {
                continue;
            };
            let mut ctx = self.board.ctx();
            let ctl = drv.control_mut();
            if !ctl.is_connected(&mut ctx) {
                continue;
            }
            ctl.check_encoder_shutdown(&mut ctx);
            ctl.check_ultrasonic_shutdown(&mut ctx);
            let fault = ctl.query_fault(&mut ctx);
            if fault != self.last_fault[z] {
                self.last_fault[z] = fault;
                warn!("slot {}: fault {:#x}", z, fault);
                let mut block = Block::open(&mut self.console, header::MOTOR_FAULT);
                for msg in fault_messages(fault) {
                    block.item(msg);
                }
                block.close();
            }
        }
        if self.realtime {
            self.publish_ranges();
        }
    }

    fn publish_ranges(&mut self) {
        for idx in 0..self.board.res.sonics.capacity() {
            let Some(sensor) = self.board.res.sonics.get(idx).copied() else {
                continue;
            };
            let range = sensor.range(&mut self.board.io);
            let changed = self
                .board
                .res
                .sonics
                .get_mut(idx)
                .is_some_and(|s| s.publish(range));
            if changed {
                let mut block = Block::open(&mut self.console, header::ULTRASONIC);
                block.item(sensor.pin()).item(range);
                block.close();
            }
        }
    }

    /// Dwell for `ms`, running the inactivity pass every millisecond.
    pub(super) fn dwell(&mut self, ms: u32) {
        for _ in 0..ms {
            self.manage_inactivity();
            self.board.io.delay_ms(1);
        }
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use crate::protocol::rig::{rig, send, signed, take};

    #[test]
    fn unknown_input_echoes_line() {
        let mut c = rig();
        assert_eq!(
            send(&mut c, &["hello", "G42 Z0", "M4242"]),
            "<Neither G nor M code found hello/>\r\n<Unknown G code G42 Z0/>\r\n<Unknown M code M4242/>\r\n"
        );
    }

    #[test]
    fn bad_sequence_requests_resend() {
        let mut c = rig();
        c.run_line(&signed("N1 M80"));
        assert_eq!(take(&mut c), "<M80/>\r\n");
        c.run_line(&signed("N3 M80"));
        assert_eq!(
            take(&mut c),
            "<Line Number is not Last Line Number+1, Last Line: 1/>\r\nResend: \r\n2\r\n"
        );
    }

    #[test]
    fn resend_after_largest_line_number_wraps() {
        let mut c = rig();
        c.run_line(&signed("N9223372036854775807 M110"));
        assert_eq!(c.last_line(), i64::MAX);
        take(&mut c);
        c.run_line(&signed("N5 M80"));
        assert_eq!(
            take(&mut c),
            "<Line Number is not Last Line Number+1, Last Line: 9223372036854775807/>\r\nResend: \r\n-9223372036854775808\r\n"
        );
        assert_eq!(c.last_line(), i64::MAX);
    }

    #[test]
    fn checksum_without_number_has_no_resend() {
        let mut c = rig();
        c.run_line("M80*5");
        assert_eq!(take(&mut c), "<No Line Number with checksum, Last Line: 0/>\r\n");
    }

    #[test]
    fn stopped_rejects_motion_until_m999() {
        let mut c = rig();
        c.run_line(&signed("N1 M80"));
        c.stop();
        assert!(c.is_stopped());
        take(&mut c);
        c.run_line("G5 Z0 C1 P100");
        assert_eq!(take(&mut c), "<Controller stopped due to errors/>\r\n");
        c.run_line("M999");
        assert_eq!(take(&mut c), "<M999/>\r\n");
        assert!(!c.is_stopped());
        assert_eq!(c.last_line(), 1);
    }

    #[test]
    fn missing_parameter_is_reported() {
        let mut c = rig();
        c.run_line("M44");
        assert_eq!(take(&mut c), "<Error:M44 protocol: missing parameter P/>\r\n");
    }

    #[test]
    fn comment_lines_are_silent() {
        let mut c = rig();
        c.run_line("M80 ; power");
        assert_eq!(take(&mut c), "");
    }
}
