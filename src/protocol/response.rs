//! Response framing.
//!
//! ```text
//!   <text/>            acknowledgement or error
//!   <header>           block begin
//!   1 value            numbered item
//!   <header/>          block end
//! ```

use core::fmt::{self, Write as _};

use crate::app::ports::ConsolePort;

pub const BEGIN: &str = "<";
pub const DELIMIT: &str = ">";
pub const TERMINATE: &str = "/>";
pub const EOL: &str = "\r\n";

/// Wrapper giving a console `core::fmt::Write`.
struct Sink<'a>(&'a mut dyn ConsolePort);

impl fmt::Write for Sink<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

/// `<text/>` on its own line.
pub fn simple(out: &mut dyn ConsolePort, text: impl fmt::Display) {
    let _ = write!(Sink(out), "{BEGIN}{text}{TERMINATE}{EOL}");
}

/// `Resend: ` then the expected line number.
pub fn resend(out: &mut dyn ConsolePort, next: i64) {
    let _ = write!(Sink(out), "Resend: {EOL}{next}{EOL}");
}

/// Raw line with no framing.
pub fn line(out: &mut dyn ConsolePort, text: impl fmt::Display) {
    let _ = write!(Sink(out), "{text}{EOL}");
}

/// Multi-line response between `<header>` and `<header/>`.
pub struct Block<'a> {
    out: &'a mut dyn ConsolePort,
    header: &'static str,
    seq: u32,
}

impl<'a> Block<'a> {
    pub fn open(out: &'a mut dyn ConsolePort, header: &'static str) -> Self {
        let _ = write!(Sink(&mut *out), "{BEGIN}{header}{DELIMIT}{EOL}");
        Self { out, header, seq: 0 }
    }

    /// Next numbered item, starting at 1.
    pub fn item(&mut self, value: impl fmt::Display) -> &mut Self {
        self.seq += 1;
        let _ = write!(Sink(&mut *self.out), "{} {value}{EOL}", self.seq);
        self
    }

    /// Unnumbered text line inside the block.
    pub fn text(&mut self, value: impl fmt::Display) -> &mut Self {
        line(&mut *self.out, value);
        self
    }

    pub fn close(self) {
        let _ = write!(Sink(&mut *self.out), "{BEGIN}{}{TERMINATE}{EOL}", self.header);
        self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture(std::string::String);

    impl ConsolePort for Capture {
        fn read_byte(&mut self) -> Option<u8> {
            None
        }
        fn write_str(&mut self, s: &str) {
            self.0.push_str(s);
        }
    }

    #[test]
    fn ack_and_resend() {
        let mut c = Capture::default();
        simple(&mut c, "G5");
        resend(&mut c, 6);
        assert_eq!(c.0, "<G5/>\r\nResend: \r\n6\r\n");
    }

    #[test]
    fn numbered_block() {
        let mut c = Capture::default();
        let mut b = Block::open(&mut c, "digitalpin");
        b.item(5).item(1);
        b.close();
        assert_eq!(c.0, "<digitalpin>\r\n1 5\r\n2 1\r\n<digitalpin/>\r\n");
    }
}
