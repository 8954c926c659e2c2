//! Command console on UART0.
//!
//! The host talks to the controller over the USB-serial bridge. On the
//! ESP32 the console is an `esp-idf-hal` [`UartDriver`]; the simulation
//! backend takes input from a byte queue and collects everything written.

use crate::app::ports::ConsolePort;

#[cfg(not(target_os = "espidf"))]
use std::collections::VecDeque;

#[cfg(target_os = "espidf")]
use esp_idf_hal::{delay::NON_BLOCK, uart::UartDriver};

pub struct SerialConsole {
    #[cfg(target_os = "espidf")]
    uart: UartDriver<'static>,

    #[cfg(not(target_os = "espidf"))]
    input: VecDeque<u8>,
    #[cfg(not(target_os = "espidf"))]
    output: String,
}

#[cfg(target_os = "espidf")]
impl SerialConsole {
    pub fn new(uart: UartDriver<'static>) -> Self {
        Self { uart }
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for SerialConsole {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
impl SerialConsole {
    pub fn new() -> Self {
        Self {
            input: VecDeque::new(),
            output: String::new(),
        }
    }

    /// Queue raw bytes as if typed by the host.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    /// Take everything written so far.
    pub fn take_output(&mut self) -> String {
        core::mem::take(&mut self.output)
    }
}

impl ConsolePort for SerialConsole {
    fn read_byte(&mut self) -> Option<u8> {
        #[cfg(target_os = "espidf")]
        {
            let mut buf = [0u8; 1];
            match self.uart.read(&mut buf, NON_BLOCK) {
                Ok(1) => Some(buf[0]),
                _ => None,
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.input.pop_front()
        }
    }

    fn write_str(&mut self, s: &str) {
        #[cfg(target_os = "espidf")]
        {
            let mut bytes = s.as_bytes();
            while !bytes.is_empty() {
                match self.uart.write(bytes) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => bytes = &bytes[n..],
                }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        self.output.push_str(s);
    }

    fn flush(&mut self) {
        #[cfg(target_os = "espidf")]
        let _ = self.uart.wait_tx_done(esp_idf_hal::delay::BLOCK);
    }
}
