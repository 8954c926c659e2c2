//! Unified error types for the RoboCore controller.
//!
//! A single `Error` enum that every subsystem converts into, so the command
//! dispatcher can turn any failure into one protocol response line. All
//! variants are `Copy` and carry no heap data, which keeps them usable from
//! the interrupt-adjacent paths (counter service, commutation) as well.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level controller error
// ---------------------------------------------------------------------------

/// Every fallible operation in the controller funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A command line was rejected before dispatch.
    Protocol(ProtocolError),
    /// A driver forced an emergency stop while executing a command.
    Driver(DriverFault),
    /// The smart controller serial exchange failed.
    Serial(SerialError),
    /// A pin, arena slot, or channel could not be resolved.
    Resource(ResourceError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl Error {
    /// Integer status printed in `Bad Motor command` style responses.
    ///
    /// Driver faults report their emergency-stop cause code and serial
    /// failures the controller status code, matching what an operator sees
    /// on the wire.
    pub const fn status_code(self) -> i32 {
        match self {
            Self::Driver(fault) => fault.code(),
            Self::Serial(e) => e.code(),
            Self::Protocol(_) | Self::Resource(_) | Self::Config(_) => -1,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Driver(e) => write!(f, "driver: {e}"),
            Self::Serial(e) => write!(f, "serial: {e}"),
            Self::Resource(e) => write!(f, "resource: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

/// Line-level failures detected before a command reaches its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// `N<seq>` is not the last accepted line number plus one.
    LineSequence,
    /// The transmitted CRC-16 does not match the recomputed one.
    ChecksumMismatch,
    /// A numbered line arrived without a `*<checksum>` suffix.
    MissingChecksum,
    /// A `*<checksum>` suffix arrived on a line without `N<seq>`.
    ChecksumWithoutLine,
    /// Neither a G nor an M code was found.
    UnknownCommand,
    /// The G code is not in the dispatch table.
    UnknownGCode,
    /// The M code is not in the dispatch table.
    UnknownMCode,
    /// Motion code refused while the Stopped latch is set.
    Stopped,
    /// A required parameter letter is absent.
    MissingParameter(char),
    /// A parameter is present but outside its accepted range.
    BadParameter(char),
}

impl ProtocolError {
    /// Sequencing and checksum failures ask the host to resend the next line.
    pub const fn requests_resend(self) -> bool {
        matches!(
            self,
            Self::LineSequence | Self::ChecksumMismatch | Self::MissingChecksum
        )
    }

    /// Wire text that opens the error response.
    pub const fn message(self) -> &'static str {
        match self {
            Self::LineSequence => "Line Number is not Last Line Number+1, Last Line: ",
            Self::ChecksumMismatch => "checksum mismatch, Last Line: ",
            Self::MissingChecksum => "No Checksum with line number, Last Line: ",
            Self::ChecksumWithoutLine => "No Line Number with checksum, Last Line: ",
            Self::UnknownCommand => "Neither G nor M code found ",
            Self::UnknownGCode => "Unknown G code ",
            Self::UnknownMCode => "Unknown M code ",
            Self::Stopped => "Controller stopped due to errors",
            Self::MissingParameter(_) => "missing parameter ",
            Self::BadParameter(_) => "bad parameter ",
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingParameter(letter) | Self::BadParameter(letter) => {
                write!(f, "{}{letter}", self.message())
            }
            _ => f.write_str(self.message().trim_end_matches([' ', ':'])),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Driver faults
// ---------------------------------------------------------------------------

/// Emergency-stop cause codes.
///
/// `commandEmergencyStop` threads the raw integer back to the caller; this
/// enum names each code so logs and matches stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverFault {
    /// Override released (`M8`).
    Resume,
    /// Override engaged (`M7`).
    Shutdown,
    /// H-bridge direction pin could not be resolved.
    HBridgeDirectionPin,
    /// Split-bridge enable pin could not be resolved.
    SplitEnablePin,
    /// Switch-bridge enable pin could not be resolved.
    SwitchEnablePin,
    /// PWM-only driver enable pin could not be resolved.
    PwmEnablePin,
    /// Linked ultrasonic sensor reported an obstacle in the travel direction.
    UltrasonicVeto,
    /// Encoder pulse budget exhausted since the last power command.
    EncoderStall,
    /// Generic driver-level stop; also the sticky fault value.
    DriverStop,
    /// Power-off request (`M81`).
    PowerOff,
    /// Single slot reset (`M799 Z`).
    Reset,
    /// All-slot reset (`M799` without a slot).
    ResetAll,
    /// Kill request.
    Kill,
    /// Controller entered the Stopped latch.
    ControllerStopped,
}

impl DriverFault {
    /// Raw cause code as returned by the emergency stop.
    pub const fn code(self) -> i32 {
        match self {
            Self::Resume => 0,
            Self::Shutdown => 1,
            Self::HBridgeDirectionPin => 2,
            Self::SplitEnablePin => 4,
            Self::SwitchEnablePin => 6,
            Self::PwmEnablePin => 7,
            Self::UltrasonicVeto => 8,
            Self::EncoderStall => 10,
            Self::DriverStop => 16,
            Self::PowerOff => 81,
            Self::Reset => 799,
            Self::ResetAll => -1,
            Self::Kill => -2,
            Self::ControllerStopped => -3,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Resume,
            1 => Self::Shutdown,
            2 => Self::HBridgeDirectionPin,
            4 => Self::SplitEnablePin,
            6 => Self::SwitchEnablePin,
            7 => Self::PwmEnablePin,
            8 => Self::UltrasonicVeto,
            10 => Self::EncoderStall,
            16 => Self::DriverStop,
            81 => Self::PowerOff,
            799 => Self::Reset,
            -1 => Self::ResetAll,
            -2 => Self::Kill,
            -3 => Self::ControllerStopped,
            _ => return None,
        })
    }
}

impl fmt::Display for DriverFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Resume => "resume",
            Self::Shutdown => "shutdown override",
            Self::HBridgeDirectionPin => "H-bridge direction pin missing",
            Self::SplitEnablePin => "split-bridge enable pin missing",
            Self::SwitchEnablePin => "switch-bridge enable pin missing",
            Self::PwmEnablePin => "PWM enable pin missing",
            Self::UltrasonicVeto => "ultrasonic proximity veto",
            Self::EncoderStall => "encoder stall",
            Self::DriverStop => "driver stop",
            Self::PowerOff => "power off",
            Self::Reset => "reset",
            Self::ResetAll => "reset all",
            Self::Kill => "kill",
            Self::ControllerStopped => "controller stopped",
        };
        write!(f, "{text} ({})", self.code())
    }
}

impl From<DriverFault> for Error {
    fn from(e: DriverFault) -> Self {
        Self::Driver(e)
    }
}

// ---------------------------------------------------------------------------
// Smart controller serial errors
// ---------------------------------------------------------------------------

/// Negative status codes of the smart controller exchange. `0` is success
/// and never represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialError {
    Timeout,
    Error,
    BadCommand,
    BadResponse,
    BufferOver,
}

impl SerialError {
    pub const fn code(self) -> i32 {
        match self {
            Self::Timeout => -1,
            Self::Error => -2,
            Self::BadCommand => -3,
            Self::BadResponse => -4,
            Self::BufferOver => -5,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => Self::Timeout,
            -2 => Self::Error,
            -3 => Self::BadCommand,
            -4 => Self::BadResponse,
            -5 => Self::BufferOver,
            _ => return None,
        })
    }
}

impl fmt::Display for SerialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "response timeout"),
            Self::Error => write!(f, "link unavailable"),
            Self::BadCommand => write!(f, "bad command"),
            Self::BadResponse => write!(f, "bad response"),
            Self::BufferOver => write!(f, "response buffer overflow"),
        }
    }
}

impl From<SerialError> for Error {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

// ---------------------------------------------------------------------------
// Resource errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    /// Pin is reserved, already assigned, or out of range.
    PinUnavailable(u8),
    /// No free slot left in the arena scanned.
    ArenaFull,
    /// Channel number outside 1..=10.
    InvalidChannel(i64),
    /// Slot index outside 0..10 or holding no driver.
    SlotEmpty,
    /// The slot holds a driver of a different topology.
    WrongDriverType,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PinUnavailable(pin) => write!(f, "pin {pin} unavailable"),
            Self::ArenaFull => write!(f, "no free slot"),
            Self::InvalidChannel(ch) => write!(f, "invalid channel {ch}"),
            Self::SlotEmpty => write!(f, "slot empty"),
            Self::WrongDriverType => write!(f, "wrong driver type for slot"),
        }
    }
}

impl From<ResourceError> for Error {
    fn from(e: ResourceError) -> Self {
        Self::Resource(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

impl From<crate::app::ports::ConfigError> for Error {
    fn from(e: crate::app::ports::ConfigError) -> Self {
        use crate::app::ports::ConfigError;
        Self::Config(match e {
            ConfigError::NotFound => "not found",
            ConfigError::Corrupted => "corrupted",
            ConfigError::ValidationFailed(field) => field,
            ConfigError::StorageFull => "storage full",
            ConfigError::IoError => "I/O error",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_fault_codes_round_trip() {
        for code in [0, 1, 2, 4, 6, 7, 8, 10, 16, 81, 799, -1, -2, -3] {
            let fault = DriverFault::from_code(code).unwrap();
            assert_eq!(fault.code(), code);
        }
        assert_eq!(DriverFault::from_code(3), None);
    }

    #[test]
    fn serial_codes_are_negative() {
        assert_eq!(SerialError::from_code(-1), Some(SerialError::Timeout));
        assert_eq!(SerialError::BufferOver.code(), -5);
        assert_eq!(SerialError::from_code(0), None);
    }

    #[test]
    fn resend_only_for_sequence_and_checksum() {
        assert!(ProtocolError::LineSequence.requests_resend());
        assert!(ProtocolError::ChecksumMismatch.requests_resend());
        assert!(ProtocolError::MissingChecksum.requests_resend());
        assert!(!ProtocolError::ChecksumWithoutLine.requests_resend());
        assert!(!ProtocolError::UnknownMCode.requests_resend());
        assert!(!ProtocolError::MissingParameter('P').requests_resend());
    }

    #[test]
    fn parameter_errors_name_the_letter() {
        assert_eq!(ProtocolError::MissingParameter('C').to_string(), "missing parameter C");
        assert_eq!(
            Error::from(ProtocolError::BadParameter('Z')).to_string(),
            "protocol: bad parameter Z"
        );
    }

    #[test]
    fn config_errors_keep_the_reason() {
        let e = Error::from(crate::app::ports::ConfigError::ValidationFailed("max_pwm_level must be 1-2000"));
        assert_eq!(e.to_string(), "config: max_pwm_level must be 1-2000");
        assert_eq!(e.status_code(), -1);
    }

    #[test]
    fn status_code_threads_fault_and_serial_codes() {
        assert_eq!(Error::from(DriverFault::UltrasonicVeto).status_code(), 8);
        assert_eq!(Error::from(SerialError::Timeout).status_code(), -1);
    }
}
