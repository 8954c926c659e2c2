//! Pin ownership and the index-addressed resource arenas.
//!
//! [`ResourceRegistry`] is the single context every driver and command
//! handler borrows: it owns the [`PinResourcePool`] plus one arena per
//! persistent resource kind. Arenas are fixed-size slot arrays addressed by
//! index; drivers remember indices, never references, so a slot can be
//! released without invalidating anything but the index itself.

use core::array;

use log::debug;

use crate::drivers::analog::AnalogPin;
use crate::drivers::digital::DigitalPin;
use crate::drivers::pwm::PwmTimerChannel;
use crate::drivers::ultrasonic::Ultrasonic;
use crate::error::ResourceError;
use crate::pins::{self, ANALOG_SLOTS, DIGITAL_SLOTS, MAX_PINS, PWM_SLOTS, SONIC_SLOTS};

// ── Pin pool ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinStatus {
    Free,
    Reserved,
    Assigned,
}

/// Exclusive assignment of physical pins.
#[derive(Debug, Clone)]
pub struct PinResourcePool {
    status: [PinStatus; MAX_PINS],
}

impl Default for PinResourcePool {
    fn default() -> Self {
        Self::new()
    }
}

impl PinResourcePool {
    /// Build the pool with the board's sensitive pins reserved.
    pub fn new() -> Self {
        let mut status = [PinStatus::Free; MAX_PINS];
        for &pin in &pins::SENSITIVE_PINS {
            if let Ok(idx) = usize::try_from(pin) {
                if idx < MAX_PINS {
                    status[idx] = PinStatus::Reserved;
                }
            }
        }
        Self { status }
    }

    /// Claim `pin`. `false` if it is out of range, reserved or taken.
    pub fn assign(&mut self, pin: u8) -> bool {
        match self.status.get_mut(usize::from(pin)) {
            Some(slot @ PinStatus::Free) => {
                *slot = PinStatus::Assigned;
                debug!("pins: {} assigned", pin);
                true
            }
            _ => false,
        }
    }

    /// Release `pin`. Reserved pins stay reserved.
    pub fn unassign(&mut self, pin: u8) -> bool {
        match self.status.get_mut(usize::from(pin)) {
            Some(slot) => {
                if *slot == PinStatus::Assigned {
                    *slot = PinStatus::Free;
                    debug!("pins: {} released", pin);
                }
                true
            }
            None => false,
        }
    }

    /// Status of `pin`; out-of-range pins read as reserved.
    pub fn status(&self, pin: u8) -> PinStatus {
        self.status
            .get(usize::from(pin))
            .copied()
            .unwrap_or(PinStatus::Reserved)
    }

    /// Assigned pins in ascending order.
    pub fn assigned(&self) -> impl Iterator<Item = u8> + '_ {
        self.status
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == PinStatus::Assigned)
            .map(|(pin, _)| pin as u8)
    }
}

// ── Arena ─────────────────────────────────────────────────────

/// Fixed-capacity slot array addressed by index.
#[derive(Debug, Clone)]
pub struct Arena<T, const N: usize> {
    slots: [Option<T>; N],
}

impl<T, const N: usize> Default for Arena<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Arena<T, N> {
    pub fn new() -> Self {
        Self {
            slots: array::from_fn(|_| None),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// First empty slot among the leading `limit` entries.
    pub fn first_free(&self, limit: usize) -> Option<usize> {
        self.slots.iter().take(limit.min(N)).position(Option::is_none)
    }

    /// First index `i` with `i` and `i + 1` both empty, `i + 1 < limit`.
    pub fn first_free_pair(&self, limit: usize) -> Option<usize> {
        let limit = limit.min(N);
        (0..limit.saturating_sub(1)).find(|&i| self.slots[i].is_none() && self.slots[i + 1].is_none())
    }

    /// Store `value` at `idx`, returning the previous occupant.
    pub fn insert(&mut self, idx: usize, value: T) -> Result<Option<T>, ResourceError> {
        let slot = self.slots.get_mut(idx).ok_or(ResourceError::ArenaFull)?;
        Ok(slot.replace(value))
    }

    /// Store `value` in the first free slot among the leading `limit`.
    pub fn push(&mut self, limit: usize, value: T) -> Result<usize, ResourceError> {
        let idx = self.first_free(limit).ok_or(ResourceError::ArenaFull)?;
        self.slots[idx] = Some(value);
        Ok(idx)
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    pub fn take(&mut self, idx: usize) -> Option<T> {
        self.slots.get_mut(idx).and_then(Option::take)
    }

    /// Occupied slots with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|v| (i, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|v| (i, v)))
    }

    /// Index of the first occupied slot matching `pred`.
    pub fn position(&self, mut pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(&mut pred))
    }

    /// Empty every slot, returning the evicted values.
    pub fn clear(&mut self) -> Vec<T> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}

// ── Registry ──────────────────────────────────────────────────

/// Everything a driver may allocate, passed explicitly as context.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    pub pins: PinResourcePool,
    pub pwms: Arena<PwmTimerChannel, PWM_SLOTS>,
    pub digitals: Arena<DigitalPin, DIGITAL_SLOTS>,
    pub analogs: Arena<AnalogPin, ANALOG_SLOTS>,
    pub sonics: Arena<Ultrasonic, SONIC_SLOTS>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pwm_index(&self, pin: u8) -> Option<usize> {
        self.pwms.position(|p| p.pin() == pin)
    }

    pub fn digital_index(&self, pin: u8) -> Option<usize> {
        self.digitals.position(|d| d.pin() == pin)
    }

    /// Digital entry for `pin` among the leading `limit` slots.
    pub fn digital_index_within(&self, pin: u8, limit: usize) -> Option<usize> {
        self.digital_index(pin).filter(|&i| i < limit)
    }

    pub fn analog_index(&self, pin: u8) -> Option<usize> {
        self.analogs.position(|a| a.pin() == pin)
    }

    pub fn sonic_index(&self, pin: u8) -> Option<usize> {
        self.sonics.position(|s| s.pin() == pin)
    }
}
