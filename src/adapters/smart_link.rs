//! UART link to the smart motor controller.
//!
//! On the ESP32 this wraps an `esp-idf-hal` [`UartDriver`] (UART1). The
//! simulation backend models the half-duplex wire: every written byte is
//! echoed back, and a scripted reply is released whenever a command
//! terminator (`\r`) or the ACK probe (0x05) goes out.

use crate::app::ports::SerialLink;

#[cfg(not(target_os = "espidf"))]
use std::collections::VecDeque;

#[cfg(target_os = "espidf")]
use esp_idf_hal::{delay::NON_BLOCK, uart::UartDriver, units::Hertz};

#[cfg(not(target_os = "espidf"))]
const ENQ: u8 = 0x05;

pub struct SmartUart {
    #[cfg(target_os = "espidf")]
    uart: UartDriver<'static>,

    #[cfg(not(target_os = "espidf"))]
    sim: SimWire,
}

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct SimWire {
    baud: u32,
    present: bool,
    echo: bool,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    replies: VecDeque<Vec<u8>>,
}

#[cfg(target_os = "espidf")]
impl SmartUart {
    pub fn new(uart: UartDriver<'static>) -> Self {
        Self { uart }
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for SmartUart {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
impl SmartUart {
    pub fn new() -> Self {
        Self {
            sim: SimWire {
                present: true,
                echo: true,
                ..SimWire::default()
            },
        }
    }

    /// A board without the link wired.
    pub fn absent() -> Self {
        let mut link = Self::new();
        link.sim.present = false;
        link
    }

    /// Queue the bytes released after the next terminator or probe.
    pub fn queue_reply(&mut self, reply: &[u8]) {
        self.sim.replies.push_back(reply.to_vec());
    }

    /// Every byte written so far.
    pub fn sent(&self) -> &[u8] {
        &self.sim.tx
    }

    pub fn clear_sent(&mut self) {
        self.sim.tx.clear();
    }

    pub fn set_echo(&mut self, echo: bool) {
        self.sim.echo = echo;
    }

    pub fn baud(&self) -> u32 {
        self.sim.baud
    }
}

impl SerialLink for SmartUart {
    fn set_baud(&mut self, baud: u32) {
        #[cfg(target_os = "espidf")]
        if let Err(e) = self.uart.change_baudrate(Hertz(baud)) {
            log::warn!("smart link: baud change failed: {}", e);
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.baud = baud;
        }
    }

    fn write_byte(&mut self, byte: u8) {
        #[cfg(target_os = "espidf")]
        if let Err(e) = self.uart.write(&[byte]) {
            log::warn!("smart link: write failed: {}", e);
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.tx.push(byte);
            if self.sim.echo {
                self.sim.rx.push_back(byte);
            }
            if byte == b'\r' || byte == ENQ {
                if let Some(reply) = self.sim.replies.pop_front() {
                    self.sim.rx.extend(reply);
                }
            }
        }
    }

    fn flush(&mut self) {
        #[cfg(target_os = "espidf")]
        if let Err(e) = self.uart.wait_tx_done(esp_idf_hal::delay::BLOCK) {
            log::warn!("smart link: flush failed: {}", e);
        }
    }

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
            self.sim.rx.pop_front()
        }
    }

    fn is_present(&self) -> bool {
        #[cfg(target_os = "espidf")]
        {
            true
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.present
        }
    }
}
