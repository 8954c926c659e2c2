//! Saturating pulse counter serviced from interrupt context.
//!
//! Wheel encoders and timer compare-match events feed a [`PulseCounter`].
//! The counter stops at its configured maximum so the stall check sees a
//! stable "budget exhausted" value no matter how many more edges arrive.
//!
//! The read-modify-write in [`PulseCounter::service`] runs inside
//! `critical_section::with`, which masks interrupts on the target and takes
//! a global lock on the host, so a main-loop reset can never interleave
//! with an increment.

use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::app::ports::HardwarePort;
use crate::hall::HallStage;

#[derive(Debug)]
pub struct PulseCounter {
    count: AtomicU32,
    max: AtomicU32,
}

impl PulseCounter {
    pub fn new(max: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            max: AtomicU32::new(max),
        }
    }

    /// One interrupt event. Increments unless the maximum was reached.
    pub fn service(&self) {
        critical_section::with(|_| {
            let count = self.count.load(Ordering::Relaxed);
            if count < self.max.load(Ordering::Relaxed) {
                self.count.store(count + 1, Ordering::Relaxed);
            }
        });
    }

    pub fn count(&self) -> u32 {
        critical_section::with(|_| self.count.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        critical_section::with(|_| self.count.store(0, Ordering::Relaxed));
    }

    pub fn max(&self) -> u32 {
        self.max.load(Ordering::Relaxed)
    }

    pub fn set_max(&self, max: u32) {
        critical_section::with(|_| self.max.store(max, Ordering::Relaxed));
    }
}

/// What an interrupt trampoline runs when its source fires.
#[derive(Debug, Clone)]
pub enum InterruptHook {
    Counter(Arc<PulseCounter>),
    /// Commutation of a brushless stage on a hall line change.
    Hall(Arc<HallStage>),
}

impl InterruptHook {
    /// Entry point for the ISR trampoline. `io` is only touched by hall
    /// hooks, which drive the gates.
    pub fn fire(&self, io: &mut dyn HardwarePort) {
        match self {
            Self::Counter(counter) => counter.service(),
            Self::Hall(stage) => {
                stage.service(io);
            }
        }
    }
}
