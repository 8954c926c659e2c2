//! Board adapter: GPIO, ADC, LEDC timers and interrupt hooks.
//!
//! [`BoardHardware`] is the only module that touches pins. On the ESP32 it
//! drives GPIO/ADC/LEDC through the raw helpers in `drivers::hw_init`;
//! elsewhere it is a simulation that keeps pin levels, timer registers and
//! attached hooks in memory so drivers and the dispatcher can be exercised
//! on the host. Tests inject inputs (`set_input`, `set_analog`, `set_pulse`)
//! and fire interrupt sources by hand.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::PinState;

use crate::app::ports::{HardwarePort, InterruptSource, OutputMode, PinMode, TimerBinding};
use crate::drivers::counter::InterruptHook;
use crate::pins;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use core::cell::RefCell;

#[cfg(target_os = "espidf")]
use crate::app::ports::reset_cause;
#[cfg(target_os = "espidf")]
use crate::drivers::hw_init;
#[cfg(target_os = "espidf")]
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
#[cfg(target_os = "espidf")]
use embassy_sync::blocking_mutex::Mutex;
#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::warn;

/// LEDC channels available on the S3.
#[cfg(target_os = "espidf")]
const LEDC_CHANNELS: usize = 8;
/// LEDC timers available on the S3.
#[cfg(target_os = "espidf")]
const LEDC_TIMERS: u8 = 4;

/// LEDC channel `i` carries the i-th binding written. Shared with the
/// trampoline's port so hall hooks reach the same channels.
#[cfg(target_os = "espidf")]
static LEDC: Mutex<CriticalSectionRawMutex, RefCell<heapless::Vec<TimerBinding, LEDC_CHANNELS>>> =
    Mutex::new(RefCell::new(heapless::Vec::new()));

#[cfg(target_os = "espidf")]
struct AttachedHook {
    source: InterruptSource,
    hook: *mut InterruptHook,
    timer: esp_timer_handle_t,
}

pub struct BoardHardware {
    #[cfg(target_os = "espidf")]
    timer_config: [(u8, u8); 6],
    #[cfg(target_os = "espidf")]
    hooks: Vec<AttachedHook>,
    #[cfg(target_os = "espidf")]
    reset_cause: Option<u8>,

    #[cfg(not(target_os = "espidf"))]
    sim: SimState,
}

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct SimState {
    modes: HashMap<u8, PinMode>,
    levels: HashMap<u8, PinState>,
    analog: HashMap<u8, u16>,
    pulses: HashMap<u8, u32>,
    timers: HashMap<u8, (u8, u8)>,
    compare: HashMap<TimerBinding, (OutputMode, u16)>,
    hooks: Vec<(InterruptSource, InterruptHook)>,
    reset_cause: u8,
    elapsed_ns: u64,
}

impl Default for BoardHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardHardware {
    pub fn new() -> Self {
        #[cfg(target_os = "espidf")]
        {
            Self {
                timer_config: [(1, 0b0101); 6],
                hooks: Vec::new(),
                reset_cause: None,
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            log::info!("BoardHardware: simulation backend");
            Self {
                sim: SimState {
                    reset_cause: crate::app::ports::reset_cause::POWER_UP,
                    ..SimState::default()
                },
            }
        }
    }
}

// ── Simulation controls ───────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl BoardHardware {
    /// Drive an input pin from outside.
    pub fn set_input(&mut self, pin: u8, state: PinState) {
        self.sim.levels.insert(pin, state);
    }

    pub fn set_analog(&mut self, pin: u8, value: u16) {
        self.sim.analog.insert(pin, value);
    }

    /// Echo width `pulse_in` reports for `pin`, in microseconds.
    pub fn set_pulse(&mut self, pin: u8, micros: u32) {
        self.sim.pulses.insert(pin, micros);
    }

    pub fn set_reset_cause(&mut self, bits: u8) {
        self.sim.reset_cause = bits;
    }

    /// Run every hook attached to `source`. Returns whether one was attached.
    pub fn fire(&mut self, source: InterruptSource) -> bool {
        let hooks: Vec<InterruptHook> = self
            .sim
            .hooks
            .iter()
            .filter(|(src, _)| *src == source)
            .map(|(_, hook)| hook.clone())
            .collect();
        for hook in &hooks {
            hook.fire(self);
        }
        !hooks.is_empty()
    }

    pub fn level(&self, pin: u8) -> Option<PinState> {
        self.sim.levels.get(&pin).copied()
    }

    pub fn mode(&self, pin: u8) -> Option<PinMode> {
        self.sim.modes.get(&pin).copied()
    }

    pub fn compare(&self, binding: TimerBinding) -> Option<(OutputMode, u16)> {
        self.sim.compare.get(&binding).copied()
    }

    /// `(prescale, wave_mode)` last programmed on `timer`.
    pub fn timer_setup(&self, timer: u8) -> Option<(u8, u8)> {
        self.sim.timers.get(&timer).copied()
    }

    pub fn hook_count(&self) -> usize {
        self.sim.hooks.len()
    }

    /// Total time spent in delays, in microseconds.
    pub fn elapsed_us(&self) -> u64 {
        self.sim.elapsed_ns / 1000
    }
}

// ── ESP32 internals ───────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe extern "C" fn hook_trampoline(arg: *mut core::ffi::c_void) {
    // SAFETY: arg is the Box<InterruptHook> leaked in attach_interrupt and
    // only freed after the ISR/timer was removed.
    let hook = unsafe { &*(arg as *const InterruptHook) };
    // Hooks own no hardware; a fresh port reaches the same GPIO and the
    // shared LEDC table, and holds no hooks of its own to drop.
    let mut io = BoardHardware::new();
    hook.fire(&mut io);
}

#[cfg(target_os = "espidf")]
impl BoardHardware {
    fn ledc_channel(binding: TimerBinding) -> Option<u32> {
        let pin = pins::PWM_TIMER_MAP
            .iter()
            .find(|(_, b)| *b == binding)
            .map(|(p, _)| *p)?;
        // (channel, newly bound)
        let slot = LEDC.lock(|table| {
            let mut table = table.borrow_mut();
            if let Some(idx) = table.iter().position(|b| *b == binding) {
                return Ok((idx as u32, false));
            }
            let channel = table.len() as u32;
            table.push(binding).map(|()| (channel, true))
        });
        let channel = match slot {
            Ok((channel, false)) => return Some(channel),
            Ok((channel, true)) => channel,
            Err(_) => {
                warn!("hardware: no LEDC channel left for pin {}", pin);
                return None;
            }
        };
        let timer = u32::from(binding.timer % LEDC_TIMERS);
        if let Err(e) = hw_init::ledc_bind(channel, timer, pin) {
            warn!("hardware: {}", e);
        }
        Some(channel)
    }

    /// Periodic esp_timer standing in for a compare/overflow interrupt.
    fn start_cycle_timer(&self, timer: u8, hook: *mut InterruptHook) -> esp_timer_handle_t {
        let (prescale, wave) = self.timer_config[usize::from(timer).min(5)];
        let freq = hw_init::pwm_frequency_hz(prescale, hw_init::bits_for_wave_mode(wave)).max(1);
        let period_us = u64::from((1_000_000 / freq).max(50));
        let args = esp_timer_create_args_t {
            callback: Some(hook_trampoline),
            arg: hook.cast(),
            dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
            name: c"pwmcount".as_ptr(),
            skip_unhandled_events: true,
        };
        let mut handle: esp_timer_handle_t = core::ptr::null_mut();
        // SAFETY: args outlives the call; hook stays alive until detach.
        unsafe {
            if esp_timer_create(&args, &mut handle) != ESP_OK {
                warn!("hardware: cycle timer create failed");
                return core::ptr::null_mut();
            }
            esp_timer_start_periodic(handle, period_us);
        }
        handle
    }
}

// ── DelayNs ───────────────────────────────────────────────────

impl DelayNs for BoardHardware {
    fn delay_ns(&mut self, ns: u32) {
        #[cfg(target_os = "espidf")]
        esp_idf_hal::delay::Ets::delay_us(ns.div_ceil(1000));

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.elapsed_ns += u64::from(ns);
        }
    }

    fn delay_ms(&mut self, ms: u32) {
        #[cfg(target_os = "espidf")]
        esp_idf_hal::delay::FreeRtos::delay_ms(ms);

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.elapsed_ns += u64::from(ms) * 1_000_000;
        }
    }
}

// ── HardwarePort ──────────────────────────────────────────────

impl HardwarePort for BoardHardware {
    fn pin_mode(&mut self, pin: u8, mode: PinMode) {
        #[cfg(target_os = "espidf")]
        if let Err(e) = hw_init::gpio_configure(pin, mode) {
            warn!("hardware: pin {} mode {:?}: {}", pin, mode, e);
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.modes.insert(pin, mode);
            if mode == PinMode::InputPullup {
                self.sim.levels.entry(pin).or_insert(PinState::High);
            }
        }
    }

    fn digital_write(&mut self, pin: u8, state: PinState) {
        #[cfg(target_os = "espidf")]
        hw_init::gpio_write(pin, state == PinState::High);

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.levels.insert(pin, state);
        }
    }

    fn digital_read(&mut self, pin: u8) -> PinState {
        #[cfg(target_os = "espidf")]
        {
            PinState::from(hw_init::gpio_read(pin))
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.levels.get(&pin).copied().unwrap_or(PinState::Low)
        }
    }

    fn analog_read(&mut self, pin: u8) -> u16 {
        #[cfg(target_os = "espidf")]
        {
            hw_init::adc_read(pin)
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.analog.get(&pin).copied().unwrap_or(0)
        }
    }

    fn timer_for(&self, pin: u8) -> Option<TimerBinding> {
        pins::timer_for_pin(pin)
    }

    fn timer_configure(&mut self, binding: TimerBinding, prescale: u8, wave_mode: u8) {
        #[cfg(target_os = "espidf")]
        {
            self.timer_config[usize::from(binding.timer).min(5)] = (prescale, wave_mode);
            let timer = u32::from(binding.timer % LEDC_TIMERS);
            if let Err(e) = hw_init::ledc_timer(timer, prescale, hw_init::bits_for_wave_mode(wave_mode)) {
                warn!("hardware: timer {}: {}", binding.timer, e);
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.timers.insert(binding.timer, (prescale, wave_mode));
        }
    }

    fn timer_write(&mut self, binding: TimerBinding, mode: OutputMode, duty: u16) {
        #[cfg(target_os = "espidf")]
        {
            let Some(channel) = Self::ledc_channel(binding) else {
                return;
            };
            // LEDC has no toggle/set-on-match variants; any connected mode
            // drives the duty, Stop parks the channel LOW.
            match mode {
                OutputMode::Stop => hw_init::ledc_off(channel),
                _ => hw_init::ledc_set(channel, u32::from(duty)),
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.compare.insert(binding, (mode, duty));
        }
    }

    fn pulse_in(&mut self, pin: u8, level: PinState, timeout_us: u32) -> u32 {
        #[cfg(target_os = "espidf")]
        {
            let target = level == PinState::High;
            let deadline = hw_init::micros() + i64::from(timeout_us);
            while hw_init::gpio_read(pin) == target {
                if hw_init::micros() > deadline {
                    return 0;
                }
            }
            while hw_init::gpio_read(pin) != target {
                if hw_init::micros() > deadline {
                    return 0;
                }
            }
            let start = hw_init::micros();
            while hw_init::gpio_read(pin) == target {
                if hw_init::micros() > deadline {
                    return 0;
                }
            }
            (hw_init::micros() - start) as u32
        }

        #[cfg(not(target_os = "espidf"))]
        {
            let _ = level;
            let width = self.sim.pulses.get(&pin).copied().unwrap_or(0);
            if width > timeout_us { 0 } else { width }
        }
    }

    fn attach_interrupt(&mut self, source: InterruptSource, hook: InterruptHook) {
        self.detach_interrupt(source);

        #[cfg(target_os = "espidf")]
        {
            let raw = Box::into_raw(Box::new(hook));
            let timer = match source {
                InterruptSource::PinChange(pin) => {
                    // SAFETY: raw stays valid until detach_interrupt frees it.
                    unsafe { hw_init::isr_add(pin, hook_trampoline, raw.cast()) };
                    core::ptr::null_mut()
                }
                InterruptSource::CompareMatch(binding) => self.start_cycle_timer(binding.timer, raw),
                InterruptSource::Overflow(timer) => self.start_cycle_timer(timer, raw),
            };
            self.hooks.push(AttachedHook { source, hook: raw, timer });
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.hooks.push((source, hook));
        }
    }

    fn detach_interrupt(&mut self, source: InterruptSource) {
        #[cfg(target_os = "espidf")]
        {
            let mut i = 0;
            while i < self.hooks.len() {
                if self.hooks[i].source != source {
                    i += 1;
                    continue;
                }
                let attached = self.hooks.swap_remove(i);
                match attached.source {
                    InterruptSource::PinChange(pin) => hw_init::isr_remove(pin),
                    _ if !attached.timer.is_null() => unsafe {
                        esp_timer_stop(attached.timer);
                        esp_timer_delete(attached.timer);
                    },
                    _ => {}
                }
                // SAFETY: the ISR or timer no longer references the hook.
                drop(unsafe { Box::from_raw(attached.hook) });
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.hooks.retain(|(src, _)| *src != source);
        }
    }

    fn reset_cause(&mut self) -> u8 {
        #[cfg(target_os = "espidf")]
        {
            if let Some(bits) = self.reset_cause.take() {
                return bits;
            }
            // SAFETY: esp_reset_reason is a plain register read.
            let reason = unsafe { esp_reset_reason() };
            #[allow(non_upper_case_globals)]
            match reason {
                esp_reset_reason_t_ESP_RST_POWERON => reset_cause::POWER_UP,
                esp_reset_reason_t_ESP_RST_EXT => reset_cause::EXTERNAL,
                esp_reset_reason_t_ESP_RST_BROWNOUT => reset_cause::BROWN_OUT,
                esp_reset_reason_t_ESP_RST_INT_WDT
                | esp_reset_reason_t_ESP_RST_TASK_WDT
                | esp_reset_reason_t_ESP_RST_WDT => reset_cause::WATCHDOG,
                esp_reset_reason_t_ESP_RST_SW | esp_reset_reason_t_ESP_RST_PANIC => reset_cause::SOFTWARE,
                _ => 0,
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            core::mem::take(&mut self.sim.reset_cause)
        }
    }

    fn free_memory(&self) -> u32 {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: heap statistics read.
            unsafe { esp_get_free_heap_size() }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            64 * 1024
        }
    }
}

#[cfg(target_os = "espidf")]
impl Drop for BoardHardware {
    fn drop(&mut self) {
        let sources: Vec<InterruptSource> = self.hooks.iter().map(|h| h.source).collect();
        for source in sources {
            self.detach_interrupt(source);
        }
    }
}
