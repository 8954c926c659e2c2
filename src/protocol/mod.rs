//! Line-oriented G/M-code command protocol.
//!
//! ```text
//!   console bytes ─▶ LineAssembler ─▶ check_line ─▶ Controller::dispatch
//!                                        │                 │
//!                                  error + Resend     G/M handlers
//!                                                          │
//!                                             ack / numbered block reply
//! ```
//!
//! Every accepted line is answered with exactly one acknowledgement, error
//! or block response. Sequencing and checksum failures additionally ask the
//! host to resend the next expected line.

pub mod crc;
pub mod dispatcher;
mod gcodes;
pub mod line;
mod mcodes;
pub mod response;
#[cfg(all(test, not(target_os = "espidf")))]
mod rig;

pub use dispatcher::{Board, Controller};
pub use line::{CommandLine, LineAssembler, LineVerdict};

/// Firmware version printed by `M700`.
pub const VERSION: &str = "1.3.0";

/// Longest accepted command line, terminator included.
pub const MAX_CMD_SIZE: usize = 256;

/// Response headers.
pub mod header {
    pub const ULTRASONIC: &str = "ultrasonic";
    pub const MOTOR_FAULT: &str = "motorfault";
    pub const BATTERY: &str = "battery";
    pub const DIGITAL_PIN: &str = "digitalpin";
    pub const ANALOG_PIN: &str = "analogpin";
    pub const DIGITAL_PIN_SETTING: &str = "digitalpinsetting";
    pub const ANALOG_PIN_SETTING: &str = "analogpinsetting";
    pub const ULTRASONIC_PIN_SETTING: &str = "ultrasonicpinsetting";
    pub const PWM_PIN_SETTING: &str = "pwmpinsetting";
    pub const MOTOR_CONTROL_SETTING: &str = "motorcontrolsetting";
    pub const PWM_CONTROL_SETTING: &str = "pwmcontrolsetting";
    pub const ASSIGNED_PINS: &str = "assignedpins";
    pub const CONTROLLER_STATUS: &str = "controllerstatus";
    pub const EEPROM: &str = "eeprom";
    pub const STATUS: &str = "status";
}

/// `M115` identification lines.
pub mod firmware {
    pub const NAME: &str = "FIRMWARE_NAME:Marlinspike RoboCore";
    pub const URL: &str = "FIRMWARE_URL:http://www.neocoretechs.com";
    pub const PROTOCOL_VERSION: &str = "PROTOCOL_VERSION:1.1";
    pub const MACHINE_TYPE: &str = "MACHINE_TYPE:RoboCore";
    pub const UUID: &str = "UUID:08d85ec1-651a-4a2f-a1a7-4afb154bcc81";
}
