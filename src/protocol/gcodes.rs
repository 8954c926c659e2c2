//! G-code handlers: dwell, power commands and the watchdog.

use log::{debug, warn};

use super::dispatcher::{Controller, channel_arg, slot_index, slot_mut};
use super::line::CommandLine;
use super::response;
use crate::app::ports::{ConfigPort, ConsolePort, HardwarePort, SerialLink};
use crate::error::{ProtocolError, Result};
use crate::pwm_control::PwmControl;

impl<H, L, C, P> Controller<H, L, C, P>
where
    H: HardwarePort,
    L: SerialLink,
    C: ConsolePort,
    P: ConfigPort,
{
    pub(super) fn gcode(&mut self, code: i64, line: &CommandLine) -> Result<()> {
        match code {
            4 => self.g4_dwell(line),
            5 => self.g5_power(line),
            99 => self.g99_watchdog_start(line),
            100 => {
                self.watchdog.feed();
                self.ack("G100");
                Ok(())
            }
            _ => Err(ProtocolError::UnknownGCode.into()),
        }
    }

    /// `G4 P<ms>` or `G4 S<s>`; S wins when both are given.
    fn g4_dwell(&mut self, line: &CommandLine) -> Result<()> {
        let mut ms = line.value('P').unwrap_or(0.0);
        if let Some(s) = line.value('S') {
            ms = s * 1000.0;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ms = ms.clamp(0.0, f64::from(u32::MAX)) as u32;
        debug!("dwell {} ms", ms);
        self.dwell(ms);
        self.ack("G4");
        Ok(())
    }

    /// `G5 [Z] C P<power>` for a motor slot, `G5 [Z] C X<level>` for a PWM slot.
    ///
    /// A driver refusal is answered with its status code, the channel and
    /// the requested value rather than the generic error line.
    fn g5_power(&mut self, line: &CommandLine) -> Result<()> {
        let z = slot_index(line)?;
        let ch = channel_arg(line)?;
        if let Some(power) = line.int32('P') {
            let drv = slot_mut(&mut self.motors, z)?;
            self.last_fault[z] = 0;
            let mut ctx = self.board.ctx();
            match drv.control_mut().command_power(&mut ctx, ch, power) {
                Ok(()) => self.ack("G5"),
                Err(e) => {
                    warn!("slot {} channel {}: power {} refused ({})", z, ch, power, e);
                    response::simple(
                        &mut self.console,
                        format_args!("Bad Motor command {} {} {}", e.status_code(), ch, power),
                    );
                }
            }
            return Ok(());
        }
        let Some(level) = line.int32('X') else {
            return Err(ProtocolError::MissingParameter('P').into());
        };
        let drv = slot_mut(&mut self.pwms, z)?;
        let mut ctx = self.board.ctx();
        match drv.command_level(&mut ctx, ch, level) {
            Ok(()) => self.ack("G5"),
            Err(e) => {
                warn!("pwm slot {} channel {}: level {} refused ({})", z, ch, level, e);
                response::simple(
                    &mut self.console,
                    format_args!("Bad PWM Driver command {} {} {}", e.status_code(), ch, level),
                );
            }
        }
        Ok(())
    }

    /// `G99 [T<ms>]`: acknowledge first, then arm, so a short timeout
    /// cannot fire before the host hears back.
    fn g99_watchdog_start(&mut self, line: &CommandLine) -> Result<()> {
        let timeout = match line.optional_as::<u32>('T')? {
            Some(ms) => ms,
            None => self.config.watchdog_timeout_ms,
        };
        self.ack("G99");
        self.console.flush();
        self.watchdog.start(timeout);
        Ok(())
    }
}
