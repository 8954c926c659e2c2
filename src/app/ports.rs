//! Port traits: the boundary between the controller core and the board.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Dispatcher / drivers (domain)
//! ```
//!
//! Board adapters (GPIO + timers, the smart-controller UART, the command
//! console, flash storage, gate drivers) implement these traits. The driver
//! and protocol layers consume them through `&mut dyn` or generics, so the
//! core never touches registers directly and runs unchanged on the host
//! against the simulation and mock adapters.
//!
//! ## Contract notes
//!
//! - **HardwarePort** calls are synchronous and never block beyond the
//!   timeout a caller passes in (`pulse_in`).
//! - **SerialLink** is half-duplex: every written byte comes back as an echo
//!   that the caller must consume.
//! - **ConfigPort** implementations MUST validate before persisting.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::PinState;

use crate::config::ControllerConfig;
use crate::drivers::counter::InterruptHook;

// ───────────────────────────────────────────────────────────────
// Pin and timer vocabulary
// ───────────────────────────────────────────────────────────────

/// Electrical mode of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinMode {
    #[default]
    Input,
    Output,
    InputPullup,
}

impl PinMode {
    /// Numeric code used in diagnostic reports.
    pub const fn code(self) -> u8 {
        match self {
            Self::Input => 0,
            Self::Output => 1,
            Self::InputPullup => 2,
        }
    }

    /// Report label (`INPUT`, `OUTPUT`, `INPUT_PULLUP`).
    pub const fn label(self) -> &'static str {
        match self {
            Self::Input => "INPUT",
            Self::Output => "OUTPUT",
            Self::InputPullup => "INPUT_PULLUP",
        }
    }
}

/// Compare unit of a hardware timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareUnit {
    A,
    B,
    C,
}

impl CompareUnit {
    pub const fn index(self) -> u8 {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
        }
    }
}

/// The timer and compare unit a PWM-capable pin is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerBinding {
    pub timer: u8,
    pub unit: CompareUnit,
}

impl TimerBinding {
    pub const fn new(timer: u8, unit: CompareUnit) -> Self {
        Self { timer, unit }
    }
}

/// Compare output mode of a timer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Output disconnected from the compare unit.
    #[default]
    Stop,
    /// Toggle on compare match.
    Toggle,
    /// Clear on compare match.
    Clear,
    /// Set on compare match.
    Set,
}

impl OutputMode {
    /// Decode the protocol's `T<0..3>` value; out-of-range is `None`.
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Stop),
            1 => Some(Self::Toggle),
            2 => Some(Self::Clear),
            3 => Some(Self::Set),
            _ => None,
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            Self::Stop => 0,
            Self::Toggle => 1,
            Self::Clear => 2,
            Self::Set => 3,
        }
    }
}

/// Interrupt sources a hook can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterruptSource {
    /// Any edge on a GPIO pin.
    PinChange(u8),
    /// Compare match of the given timer unit.
    CompareMatch(TimerBinding),
    /// Overflow of the given timer.
    Overflow(u8),
}

/// Reset-cause bits reported by [`HardwarePort::reset_cause`].
pub mod reset_cause {
    pub const POWER_UP: u8 = 0b0000_0001;
    pub const EXTERNAL: u8 = 0b0000_0010;
    pub const BROWN_OUT: u8 = 0b0000_0100;
    pub const WATCHDOG: u8 = 0b0000_1000;
    pub const SOFTWARE: u8 = 0b0010_0000;
}

// ───────────────────────────────────────────────────────────────
// Hardware port (GPIO, ADC, timers, interrupts)
// ───────────────────────────────────────────────────────────────

/// Board I/O used by every driver. Delays come from the `DelayNs`
/// supertrait so tests can run them instantly.
pub trait HardwarePort: DelayNs {
    fn pin_mode(&mut self, pin: u8, mode: PinMode);

    fn digital_write(&mut self, pin: u8, state: PinState);

    fn digital_read(&mut self, pin: u8) -> PinState;

    /// Raw ADC reading (10-bit scale).
    fn analog_read(&mut self, pin: u8) -> u16;

    /// Timer routing for `pin`, `None` when the pin cannot do hardware PWM.
    fn timer_for(&self, pin: u8) -> Option<TimerBinding>;

    /// Program clock prescale and waveform generation mode of a timer.
    fn timer_configure(&mut self, binding: TimerBinding, prescale: u8, wave_mode: u8);

    /// Load a compare value and output mode into a timer unit.
    fn timer_write(&mut self, binding: TimerBinding, mode: OutputMode, duty: u16);

    /// Measure the length of the next pulse at `level`, in microseconds.
    /// Returns 0 on timeout.
    fn pulse_in(&mut self, pin: u8, level: PinState, timeout_us: u32) -> u32;

    fn attach_interrupt(&mut self, source: InterruptSource, hook: InterruptHook);

    fn detach_interrupt(&mut self, source: InterruptSource);

    /// Reset-cause bits (see [`reset_cause`]); reading clears them.
    fn reset_cause(&mut self) -> u8;

    /// Free heap in bytes.
    fn free_memory(&self) -> u32;
}

// ───────────────────────────────────────────────────────────────
// Smart controller link
// ───────────────────────────────────────────────────────────────

/// Byte-level UART to the external closed-loop motor controller.
pub trait SerialLink {
    fn set_baud(&mut self, baud: u32);

    fn write_byte(&mut self, byte: u8);

    /// Block until the transmit buffer is drained.
    fn flush(&mut self);

    /// Next received byte, if any is buffered.
    fn read_byte(&mut self) -> Option<u8>;

    /// Whether the link exists on this board.
    fn is_present(&self) -> bool {
        true
    }
}

// ───────────────────────────────────────────────────────────────
// Command console
// ───────────────────────────────────────────────────────────────

/// The host-facing command stream.
pub trait ConsolePort {
    fn read_byte(&mut self) -> Option<u8>;

    fn write_str(&mut self, s: &str);

    fn flush(&mut self) {}
}

// ───────────────────────────────────────────────────────────────
// Gate drive (brushless commutation)
// ───────────────────────────────────────────────────────────────

/// One leg of a three-phase bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    U,
    V,
    W,
}

/// Six gate outputs plus the three hall inputs of a BLDC stage.
pub trait GateDrive: DelayNs {
    /// Current 3-bit hall pattern.
    fn read_hall(&mut self) -> u8;

    /// Release every gate.
    fn stop_all(&mut self);

    fn set_low_side(&mut self, leg: Leg);

    /// Drive the high side of `leg` at `duty`.
    fn set_high_side(&mut self, leg: Leg, duty: u8);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists controller configuration.
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Load configuration. A missing or stale blob is
    /// [`ConfigError::NotFound`]; callers fall back to defaults.
    fn load(&self) -> Result<ControllerConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&mut self, config: &ControllerConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (domain ↔ NVS / EEPROM)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value blob storage.
///
/// Write operations MUST be atomic per key. The ESP-IDF NVS API guarantees
/// this natively; the in-memory backends achieve it trivially.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage, or its version tag is stale.
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl From<StorageError> for ConfigError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => Self::NotFound,
            StorageError::Full => Self::StorageFull,
            StorageError::IoError => Self::IoError,
        }
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
