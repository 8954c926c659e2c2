//! Six-step commutation for a sensored brushless motor.
//!
//! Each valid hall transition releases every gate, waits out the dead
//! time, asserts the low sides of the new pattern, lets the bootstrap
//! capacitors charge, asserts the high sides at the commanded duty, then
//! releases everything again after the discharge window. Readings outside
//! `001..=110` and repeats of the last accepted reading are dropped; two
//! hall lines can change for one commutation edge.
//!
//! Pattern bits:
//!
//! ```text
//!   bit   5    4    3    2    1    0
//!         WL   VL   UL   WH   VH   UH
//! ```

use core::cell::RefCell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::PinState;

use crate::app::ports::{GateDrive, HardwarePort, InterruptSource, Leg, OutputMode, PinMode};
use crate::drivers::counter::InterruptHook;

pub const WL: u8 = 0b10_0000;
pub const VL: u8 = 0b01_0000;
pub const UL: u8 = 0b00_1000;
pub const WH: u8 = 0b00_0100;
pub const VH: u8 = 0b00_0010;
pub const UH: u8 = 0b00_0001;

const VALID_LOW: u8 = 0b001;
const VALID_HIGH: u8 = 0b110;

const DEAD_TIME_US: u32 = 1;
const BOOTSTRAP_US: u32 = 1;
const DISCHARGE_US: u32 = 20;

const LEGS: [(Leg, u8, u8); 3] = [(Leg::U, UH, UL), (Leg::V, VH, VL), (Leg::W, WH, WL)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// Entry `index` turns on both sides of one leg.
    ShootThrough { index: usize },
    /// Entry `index` uses bits above the six gate outputs.
    UnknownBits { index: usize },
}

impl core::fmt::Display for TableError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ShootThrough { index } => write!(f, "pattern {index} shorts a leg"),
            Self::UnknownBits { index } => write!(f, "pattern {index} has unknown bits"),
        }
    }
}

/// Whether `pattern` drives the high and low side of the same leg.
pub const fn shoots_through(pattern: u8) -> bool {
    (pattern & UH != 0 && pattern & UL != 0)
        || (pattern & VH != 0 && pattern & VL != 0)
        || (pattern & WH != 0 && pattern & WL != 0)
}

/// Drive patterns indexed by hall value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommutationTable([u8; 8]);

impl CommutationTable {
    pub fn new(patterns: [u8; 8]) -> Result<Self, TableError> {
        for (index, &p) in patterns.iter().enumerate() {
            if p & !0b11_1111 != 0 {
                return Err(TableError::UnknownBits { index });
            }
            if shoots_through(p) {
                return Err(TableError::ShootThrough { index });
            }
        }
        Ok(Self(patterns))
    }

    pub const fn pattern(&self, hall: u8) -> u8 {
        self.0[(hall & 0b111) as usize]
    }

    /// Standard 120° sequence, clockwise.
    pub const fn clockwise() -> Self {
        Self([0, UH | WL, VH | UL, VH | WL, WH | VL, UH | VL, WH | UL, 0])
    }

    /// Standard 120° sequence, counter-clockwise.
    pub const fn counter_clockwise() -> Self {
        Self([0, WH | UL, UH | VL, WH | VL, VH | WL, VH | UL, UH | WL, 0])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Clockwise,
    CounterClockwise,
}

#[derive(Debug, Clone)]
pub struct HallCommutation {
    cw: CommutationTable,
    ccw: CommutationTable,
    rotation: Rotation,
    duty: u8,
    last_hall: u8,
    count: u32,
}

impl Default for HallCommutation {
    fn default() -> Self {
        Self::new(CommutationTable::clockwise(), CommutationTable::counter_clockwise())
    }
}

impl HallCommutation {
    pub fn new(cw: CommutationTable, ccw: CommutationTable) -> Self {
        Self {
            cw,
            ccw,
            rotation: Rotation::Clockwise,
            duty: 0,
            last_hall: 0,
            count: 0,
        }
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.rotation = rotation;
    }

    pub fn set_duty(&mut self, duty: u8) {
        self.duty = duty;
    }

    /// Valid transitions seen so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn take_count(&mut self) -> u32 {
        core::mem::take(&mut self.count)
    }

    /// Service one hall interrupt. Returns the applied pattern, or `None`
    /// when the reading was rejected.
    pub fn service<G: GateDrive + ?Sized>(&mut self, gate: &mut G) -> Option<u8> {
        let hall = gate.read_hall();
        if !(VALID_LOW..=VALID_HIGH).contains(&hall) || hall == self.last_hall {
            return None;
        }
        self.last_hall = hall;
        self.count = self.count.wrapping_add(1);
        let pattern = match self.rotation {
            Rotation::Clockwise => self.cw.pattern(hall),
            Rotation::CounterClockwise => self.ccw.pattern(hall),
        };

        gate.stop_all();
        gate.delay_us(DEAD_TIME_US);
        for (leg, _, low) in LEGS {
            if pattern & low != 0 {
                gate.set_low_side(leg);
            }
        }
        gate.delay_us(BOOTSTRAP_US);
        for (leg, high, _) in LEGS {
            if pattern & high != 0 {
                gate.set_high_side(leg, self.duty);
            }
        }
        gate.delay_us(DISCHARGE_US);
        gate.stop_all();
        Some(pattern)
    }
}

/// Commutation state shared between the main loop and the pin-change
/// trampoline.
pub struct SharedCommutation {
    inner: Mutex<CriticalSectionRawMutex, RefCell<HallCommutation>>,
}

impl SharedCommutation {
    pub const fn new(state: HallCommutation) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(state)),
        }
    }

    pub fn service<G: GateDrive + ?Sized>(&self, gate: &mut G) -> Option<u8> {
        self.inner.lock(|s| s.borrow_mut().service(gate))
    }

    pub fn set_duty(&self, duty: u8) {
        self.inner.lock(|s| s.borrow_mut().set_duty(duty));
    }

    pub fn set_rotation(&self, rotation: Rotation) {
        self.inner.lock(|s| s.borrow_mut().set_rotation(rotation));
    }

    pub fn take_count(&self) -> u32 {
        self.inner.lock(|s| s.borrow_mut().take_count())
    }
}

/// A commutation state bound to the pins of its stage. Carried by the
/// pin-change hook of each hall line.
pub struct HallStage {
    state: SharedCommutation,
    pins: StagePins,
}

impl core::fmt::Debug for HallStage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HallStage").field("pins", &self.pins).finish_non_exhaustive()
    }
}

impl HallStage {
    pub fn new(state: HallCommutation, pins: StagePins) -> Self {
        Self {
            state: SharedCommutation::new(state),
            pins,
        }
    }

    pub fn pins(&self) -> StagePins {
        self.pins
    }

    pub fn commutation(&self) -> &SharedCommutation {
        &self.state
    }

    /// One hall line changed. Pin modes were set by [`attach`].
    pub fn service(&self, io: &mut dyn HardwarePort) -> Option<u8> {
        let mut gate = PinGateDrive { io, pins: self.pins };
        self.state.service(&mut gate)
    }
}

/// Configure the stage pins, park every gate, and hook the pin-change
/// interrupt of each hall line.
pub fn attach(io: &mut dyn HardwarePort, stage: &Arc<HallStage>) {
    PinGateDrive::new(io, stage.pins).stop_all();
    for &pin in &stage.pins.hall {
        io.attach_interrupt(InterruptSource::PinChange(pin), InterruptHook::Hall(Arc::clone(stage)));
    }
    log::info!("hall: stage attached on hall pins {:?}", stage.pins.hall);
}

/// Unhook the hall lines and leave every gate off.
pub fn detach(io: &mut dyn HardwarePort, pins: StagePins) {
    for &pin in &pins.hall {
        io.detach_interrupt(InterruptSource::PinChange(pin));
    }
    PinGateDrive { io, pins }.stop_all();
}

// ── Gate drive on board pins ──────────────────────────────────

/// Pin assignment of a three-phase stage: hall inputs U/V/W (bits 0..2),
/// low-side outputs and PWM high-side outputs, each ordered U, V, W.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePins {
    pub hall: [u8; 3],
    pub low: [u8; 3],
    pub high: [u8; 3],
}

/// [`GateDrive`] over the board's GPIO and PWM timers.
pub struct PinGateDrive<'a> {
    io: &'a mut dyn HardwarePort,
    pins: StagePins,
}

impl<'a> PinGateDrive<'a> {
    pub fn new(io: &'a mut dyn HardwarePort, pins: StagePins) -> Self {
        for &p in &pins.hall {
            io.pin_mode(p, PinMode::Input);
        }
        for &p in pins.low.iter().chain(&pins.high) {
            io.pin_mode(p, PinMode::Output);
        }
        Self { io, pins }
    }

    const fn leg_index(leg: Leg) -> usize {
        match leg {
            Leg::U => 0,
            Leg::V => 1,
            Leg::W => 2,
        }
    }
}

impl DelayNs for PinGateDrive<'_> {
    fn delay_ns(&mut self, ns: u32) {
        self.io.delay_ns(ns);
    }
}

impl GateDrive for PinGateDrive<'_> {
    fn read_hall(&mut self) -> u8 {
        self.pins
            .hall
            .iter()
            .enumerate()
            .fold(0, |acc, (bit, &pin)| match self.io.digital_read(pin) {
                PinState::High => acc | (1 << bit),
                PinState::Low => acc,
            })
    }

    fn stop_all(&mut self) {
        for &pin in &self.pins.high {
            if let Some(binding) = self.io.timer_for(pin) {
                self.io.timer_write(binding, OutputMode::Stop, 0);
            }
            self.io.digital_write(pin, PinState::Low);
        }
        for &pin in &self.pins.low {
            self.io.digital_write(pin, PinState::Low);
        }
    }

    fn set_low_side(&mut self, leg: Leg) {
        self.io.digital_write(self.pins.low[Self::leg_index(leg)], PinState::High);
    }

    fn set_high_side(&mut self, leg: Leg, duty: u8) {
        let pin = self.pins.high[Self::leg_index(leg)];
        match self.io.timer_for(pin) {
            Some(binding) => self.io.timer_write(binding, OutputMode::Clear, u16::from(duty)),
            None => self.io.digital_write(pin, PinState::from(duty >= 128)),
        }
    }
}
