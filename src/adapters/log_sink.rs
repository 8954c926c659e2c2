//! Log-mirroring console adapter.
//!
//! Wraps any [`ConsolePort`] and copies every complete response line to the
//! `log` facade at debug level, so a device log captured over JTAG or
//! USB-CDC shows the protocol conversation next to the driver messages.

use log::debug;

use crate::app::ports::ConsolePort;

pub struct LoggedConsole<C: ConsolePort> {
    inner: C,
    pending: String,
}

impl<C: ConsolePort> LoggedConsole<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            pending: String::new(),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }
}

impl<C: ConsolePort> ConsolePort for LoggedConsole<C> {
    fn read_byte(&mut self) -> Option<u8> {
        self.inner.read_byte()
    }

    fn write_str(&mut self, s: &str) {
        self.inner.write_str(s);
        self.pending.push_str(s);
        while let Some(end) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=end).collect();
            debug!("TX | {}", line.trim_end());
        }
    }

    fn flush(&mut self) {
        self.inner.flush();
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::adapters::console::SerialConsole;

    #[test]
    fn forwards_writes_and_reads() {
        let mut inner = SerialConsole::new();
        inner.feed(b"M1\n");
        let mut console = LoggedConsole::new(inner);
        assert_eq!(console.read_byte(), Some(b'M'));
        console.write_str("<M1/>\r");
        console.write_str("\n");
        assert_eq!(console.inner().output(), "<M1/>\r\n");
        assert!(console.pending.is_empty());
    }
}
