//! Mock adapters for integration tests.
//!
//! `MockHardware` records every pin and timer call so tests can assert on
//! the full command history without touching real registers.
//! `MockSerialLink` plays a smart motor controller on the other end of the
//! half-duplex wire, `MockStorage` keeps every blob write, and
//! `CaptureConsole` collects the response stream.

use std::collections::{HashMap, VecDeque};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::PinState;
use robocore::app::ports::{
    ConsolePort, HardwarePort, InterruptSource, OutputMode, PinMode, SerialLink, StorageError,
    StoragePort, TimerBinding,
};
use robocore::config::ConfigStore;
use robocore::drivers::counter::InterruptHook;
use robocore::pins::timer_for_pin;
use robocore::protocol::Controller;

// ── Hardware call record ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum HwCall {
    Mode { pin: u8, mode: PinMode },
    Write { pin: u8, state: PinState },
    TimerConfig { binding: TimerBinding, prescale: u8, wave_mode: u8 },
    TimerWrite { binding: TimerBinding, mode: OutputMode, duty: u16 },
    Attach(InterruptSource),
    Detach(InterruptSource),
}

// ── MockHardware ──────────────────────────────────────────────

pub struct MockHardware {
    pub calls: Vec<HwCall>,
    pub inputs: HashMap<u8, PinState>,
    pub analog: HashMap<u8, u16>,
    pub pulses: HashMap<u8, u32>,
    pub hooks: HashMap<InterruptSource, InterruptHook>,
    pub elapsed_ns: u64,
}

#[allow(dead_code)]
impl MockHardware {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            inputs: HashMap::new(),
            analog: HashMap::new(),
            pulses: HashMap::new(),
            hooks: HashMap::new(),
            elapsed_ns: 0,
        }
    }

    /// Last level written to `pin`.
    pub fn last_write(&self, pin: u8) -> Option<PinState> {
        self.calls.iter().rev().find_map(|c| match c {
            HwCall::Write { pin: p, state } if *p == pin => Some(*state),
            _ => None,
        })
    }

    /// Last compare write on the timer `pin` is wired to.
    pub fn last_duty(&self, pin: u8) -> Option<(OutputMode, u16)> {
        let binding = timer_for_pin(pin)?;
        self.calls.iter().rev().find_map(|c| match c {
            HwCall::TimerWrite { binding: b, mode, duty } if *b == binding => Some((*mode, *duty)),
            _ => None,
        })
    }

    /// Fire the hook on `source` `times` times. Returns whether one was attached.
    pub fn fire(&mut self, source: InterruptSource, times: u32) -> bool {
        let Some(hook) = self.hooks.get(&source).cloned() else {
            return false;
        };
        for _ in 0..times {
            hook.fire(self);
        }
        true
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayNs for MockHardware {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns += u64::from(ns);
    }
}

impl HardwarePort for MockHardware {
    fn pin_mode(&mut self, pin: u8, mode: PinMode) {
        self.calls.push(HwCall::Mode { pin, mode });
    }

    fn digital_write(&mut self, pin: u8, state: PinState) {
        self.calls.push(HwCall::Write { pin, state });
    }

    fn digital_read(&mut self, pin: u8) -> PinState {
        self.inputs
            .get(&pin)
            .copied()
            .or_else(|| self.last_write(pin))
            .unwrap_or(PinState::Low)
    }

    fn analog_read(&mut self, pin: u8) -> u16 {
        self.analog.get(&pin).copied().unwrap_or(0)
    }

    fn timer_for(&self, pin: u8) -> Option<TimerBinding> {
        timer_for_pin(pin)
    }

    fn timer_configure(&mut self, binding: TimerBinding, prescale: u8, wave_mode: u8) {
        self.calls.push(HwCall::TimerConfig { binding, prescale, wave_mode });
    }

    fn timer_write(&mut self, binding: TimerBinding, mode: OutputMode, duty: u16) {
        self.calls.push(HwCall::TimerWrite { binding, mode, duty });
    }

    fn pulse_in(&mut self, pin: u8, _level: PinState, timeout_us: u32) -> u32 {
        let width = self.pulses.get(&pin).copied().unwrap_or(0);
        if width > timeout_us { 0 } else { width }
    }

    fn attach_interrupt(&mut self, source: InterruptSource, hook: InterruptHook) {
        self.calls.push(HwCall::Attach(source));
        self.hooks.insert(source, hook);
    }

    fn detach_interrupt(&mut self, source: InterruptSource) {
        self.calls.push(HwCall::Detach(source));
        self.hooks.remove(&source);
    }

    fn reset_cause(&mut self) -> u8 {
        0
    }

    fn free_memory(&self) -> u32 {
        32_768
    }
}

// ── MockSerialLink ────────────────────────────────────────────

const ENQ: u8 = 0x05;
const ACK: u8 = 0x06;

/// Smart controller stand-in: echoes every byte, ACKs the probe, answers
/// `!`/`%`/`^` commands with `+`, `?FF` with the scripted fault and any
/// other query from `replies`.
pub struct MockSerialLink {
    pub sent: Vec<String>,
    pub replies: HashMap<String, String>,
    pub connected: bool,
    pub fault: i32,
    pub baud: u32,
    line: Vec<u8>,
    rx: VecDeque<u8>,
}

#[allow(dead_code)]
impl MockSerialLink {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            replies: HashMap::new(),
            connected: true,
            fault: 0,
            baud: 0,
            line: Vec::new(),
            rx: VecDeque::new(),
        }
    }

    pub fn reply(&mut self, query: &str, answer: &str) {
        self.replies.insert(query.to_string(), answer.to_string());
    }

    /// Motion commands sent so far (`!G ...`).
    pub fn motion(&self) -> Vec<&str> {
        self.sent
            .iter()
            .filter(|c| c.starts_with("!G"))
            .map(String::as_str)
            .collect()
    }

    fn answer(&self, command: &str) -> String {
        if command.starts_with(['!', '%', '^']) {
            return "+".to_string();
        }
        if command == "?FF" {
            return format!("FF={}", self.fault);
        }
        self.replies.get(command).cloned().unwrap_or_else(|| "-".to_string())
    }
}

impl Default for MockSerialLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLink for MockSerialLink {
    fn set_baud(&mut self, baud: u32) {
        self.baud = baud;
    }

    fn write_byte(&mut self, byte: u8) {
        self.rx.push_back(byte);
        if !self.connected {
            return;
        }
        if byte == ENQ {
            self.rx.push_back(ACK);
            return;
        }
        if byte != b'\r' {
            self.line.push(byte);
            return;
        }
        let command = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        let answer = self.answer(&command);
        self.sent.push(command);
        self.rx.extend(answer.bytes());
        self.rx.push_back(b'\r');
    }

    fn flush(&mut self) {}

    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }
}

// ── MockStorage ───────────────────────────────────────────────

pub struct MockStorage {
    pub data: HashMap<String, Vec<u8>>,
    /// Every write in order, as `(key, bytes)`.
    pub writes: Vec<(String, Vec<u8>)>,
}

#[allow(dead_code)]
impl MockStorage {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            writes: Vec::new(),
        }
    }
}

impl Default for MockStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StoragePort for MockStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let value = self
            .data
            .get(&format!("{namespace}/{key}"))
            .ok_or(StorageError::NotFound)?;
        if value.len() > buf.len() {
            return Err(StorageError::IoError);
        }
        buf[..value.len()].copy_from_slice(value);
        Ok(value.len())
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let k = format!("{namespace}/{key}");
        self.writes.push((k.clone(), data.to_vec()));
        self.data.insert(k, data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.data.remove(&format!("{namespace}/{key}"));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.data.contains_key(&format!("{namespace}/{key}"))
    }
}

// ── CaptureConsole ────────────────────────────────────────────

pub struct CaptureConsole {
    pub input: VecDeque<u8>,
    pub output: String,
}

#[allow(dead_code)]
impl CaptureConsole {
    pub fn new() -> Self {
        Self {
            input: VecDeque::new(),
            output: String::new(),
        }
    }

    pub fn feed(&mut self, text: &str) {
        self.input.extend(text.bytes());
    }

    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

impl Default for CaptureConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsolePort for CaptureConsole {
    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    fn write_str(&mut self, s: &str) {
        self.output.push_str(s);
    }
}

// ── Controller rig ────────────────────────────────────────────

pub type Rig = Controller<MockHardware, MockSerialLink, CaptureConsole, ConfigStore<MockStorage>>;

pub fn rig() -> Rig {
    Controller::new(
        MockHardware::new(),
        MockSerialLink::new(),
        CaptureConsole::new(),
        ConfigStore::new(MockStorage::new()),
    )
}

/// Run each line through the controller and return the response stream.
#[allow(dead_code)]
pub fn exec(c: &mut Rig, lines: &[&str]) -> String {
    for line in lines {
        c.run_line(line);
    }
    c.console_mut().take()
}

/// Frame `body` with the CRC-16 checksum of everything before `*`.
#[allow(dead_code)]
pub fn signed(body: &str) -> String {
    format!("{}*{}", body, robocore::protocol::crc::crc16(body.as_bytes()))
}
