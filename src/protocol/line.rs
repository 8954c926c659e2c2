//! Command line assembly, parameter lookup and sequence checking.
//!
//! Bytes accumulate until `\n`, `\r` or a full buffer. Parameters are
//! single letters followed by a number; lookup takes the first occurrence
//! of the letter anywhere in the line and parses the longest numeric
//! prefix after it, so `P-12.5x` reads as -12.5 and a bare `P` as 0.

use core::fmt;

use heapless::String;

use super::MAX_CMD_SIZE;
use super::crc::crc16;
use crate::error::ProtocolError;

// ── Assembler ─────────────────────────────────────────────────

/// Streaming line assembler fed one console byte at a time.
pub struct LineAssembler {
    buf: String<MAX_CMD_SIZE>,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self { buf: String::new() }
    }

    /// Feed one byte. Returns a line once a terminator arrives or the
    /// buffer holds `MAX_CMD_SIZE - 1` bytes; the byte that completes an
    /// overlong line is dropped. Empty lines yield nothing.
    pub fn feed(&mut self, byte: u8) -> Option<CommandLine> {
        let full = self.buf.len() >= MAX_CMD_SIZE - 1;
        if byte == b'\n' || byte == b'\r' || full {
            if self.buf.is_empty() {
                return None;
            }
            let text = core::mem::take(&mut self.buf);
            return Some(CommandLine { text });
        }
        // Non-ASCII bytes would widen in UTF-8 and break the byte budget.
        let ch = if byte.is_ascii() { char::from(byte) } else { '?' };
        let _ = self.buf.push(ch);
        None
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

// ── Parsed line ───────────────────────────────────────────────

/// One complete command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    text: String<MAX_CMD_SIZE>,
}

impl CommandLine {
    /// Build a line from text, truncated to the assembler's limit.
    pub fn parse(text: &str) -> Self {
        let mut assembler = LineAssembler::new();
        for &b in text.as_bytes() {
            if let Some(line) = assembler.feed(b) {
                return line;
            }
        }
        Self { text: assembler.buf }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn contains(&self, pat: &str) -> bool {
        self.text.contains(pat)
    }

    /// Whether `letter` occurs anywhere in the line.
    pub fn has(&self, letter: char) -> bool {
        self.text.contains(letter)
    }

    /// Numeric value after the first `letter`.
    pub fn value(&self, letter: char) -> Option<f64> {
        let at = self.text.find(letter)?;
        Some(parse_number(&self.text[at + letter.len_utf8()..]))
    }

    /// Truncated integer value after the first `letter`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn int(&self, letter: char) -> Option<i64> {
        self.value(letter).map(|v| v as i64)
    }

    /// Integer value narrowed to `T`; `None` when absent or out of range.
    pub fn narrow<T: TryFrom<i64>>(&self, letter: char) -> Option<T> {
        self.int(letter).and_then(|v| T::try_from(v).ok())
    }

    /// Integer value saturated into `i32`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn int32(&self, letter: char) -> Option<i32> {
        self.int(letter)
            .map(|v| v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
    }

    pub fn require(&self, letter: char) -> Result<i64, ProtocolError> {
        self.int(letter).ok_or(ProtocolError::MissingParameter(letter))
    }

    /// Required value narrowed to `T`.
    pub fn require_as<T: TryFrom<i64>>(&self, letter: char) -> Result<T, ProtocolError> {
        T::try_from(self.require(letter)?).map_err(|_| ProtocolError::BadParameter(letter))
    }

    /// Optional value narrowed to `T`; present but out of range is an error.
    pub fn optional_as<T: TryFrom<i64>>(&self, letter: char) -> Result<Option<T>, ProtocolError> {
        self.int(letter)
            .map(|v| T::try_from(v).map_err(|_| ProtocolError::BadParameter(letter)))
            .transpose()
    }

    /// Text covered by the checksum: everything before `*`.
    fn checksum_prefix(&self) -> Option<(&str, &str)> {
        let at = self.text.find('*')?;
        Some((&self.text[..at], &self.text[at + 1..]))
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Longest decimal prefix of `s` (leading whitespace skipped), 0.0 when
/// there is none.
pub fn parse_number(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut digits = end - int_start;
    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return 0.0;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    s[..end].parse().unwrap_or(0.0)
}

// ── Sequence and checksum ─────────────────────────────────────

/// Outcome of a line that passed sequencing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineVerdict {
    Execute,
    /// The line carries a `;` comment and is dropped silently.
    Comment,
}

/// Validate `N<seq>` and `*<crc>` against the last accepted line number,
/// advancing it on success.
pub fn check_line(line: &CommandLine, last_n: &mut i64) -> Result<LineVerdict, ProtocolError> {
    if let Some(n) = line.int('N') {
        if n != last_n.wrapping_add(1) && !line.contains("M110") {
            return Err(ProtocolError::LineSequence);
        }
        let Some((prefix, sent)) = line.checksum_prefix() else {
            return Err(ProtocolError::MissingChecksum);
        };
        #[allow(clippy::cast_possible_truncation)]
        let sent = parse_number(sent) as i64;
        if sent != i64::from(crc16(prefix.as_bytes())) {
            return Err(ProtocolError::ChecksumMismatch);
        }
        *last_n = n;
    } else if line.has('*') {
        return Err(ProtocolError::ChecksumWithoutLine);
    }
    if line.has(';') {
        return Ok(LineVerdict::Comment);
    }
    Ok(LineVerdict::Execute)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(body: &str) -> std::string::String {
        format!("{}*{}", body, crc16(body.as_bytes()))
    }

    #[test]
    fn assembles_on_either_terminator() {
        let mut a = LineAssembler::new();
        let got: std::vec::Vec<_> = b"G5 C1\r\nM115\n"
            .iter()
            .filter_map(|&b| a.feed(b))
            .map(|l| l.to_string())
            .collect();
        assert_eq!(got, ["G5 C1", "M115"]);
        assert_eq!(a.pending(), 0);
    }

    #[test]
    fn overlong_line_is_cut_and_byte_dropped() {
        let mut a = LineAssembler::new();
        let mut out = None;
        for _ in 0..MAX_CMD_SIZE {
            if let Some(l) = a.feed(b'X') {
                out = Some(l);
            }
        }
        assert_eq!(out.map(|l| l.as_str().len()), Some(MAX_CMD_SIZE - 1));
        assert_eq!(a.pending(), 0);
    }

    #[test]
    fn parameter_lookup() {
        let l = CommandLine::parse("G5 Z1 C2 P-500.7");
        assert_eq!(l.int('G'), Some(5));
        assert_eq!(l.int('P'), Some(-500));
        assert_eq!(l.value('P'), Some(-500.7));
        assert_eq!(l.int('X'), None);
        assert_eq!(l.narrow::<u8>('P'), None);
        assert_eq!(CommandLine::parse("M44 P").int('P'), Some(0));
    }

    #[test]
    fn number_prefixes() {
        assert_eq!(parse_number("  12abc"), 12.0);
        assert_eq!(parse_number("+.5"), 0.5);
        assert_eq!(parse_number("3."), 3.0);
        assert_eq!(parse_number("2e3 "), 2000.0);
        assert_eq!(parse_number("2e"), 2.0);
        assert_eq!(parse_number("-"), 0.0);
        assert_eq!(parse_number(""), 0.0);
    }

    #[test]
    fn sequence_and_checksum() {
        let mut last = 4;
        let ok = CommandLine::parse(&signed("N5 G5 C1 P500"));
        assert_eq!(check_line(&ok, &mut last), Ok(LineVerdict::Execute));
        assert_eq!(last, 5);

        let skipped = CommandLine::parse(&signed("N7 G5 C1 P500"));
        assert_eq!(check_line(&skipped, &mut last), Err(ProtocolError::LineSequence));

        let reset = CommandLine::parse(&signed("N100 M110"));
        assert_eq!(check_line(&reset, &mut last), Ok(LineVerdict::Execute));
        assert_eq!(last, 100);
    }

    #[test]
    fn corrupted_payload_is_a_mismatch() {
        let mut last = 4;
        let good = signed("N5 G5 C1 P500");
        let bad = good.replacen("P500", "P501", 1);
        assert_eq!(
            check_line(&CommandLine::parse(&bad), &mut last),
            Err(ProtocolError::ChecksumMismatch)
        );
        assert_eq!(last, 4);
    }

    #[test]
    fn missing_halves() {
        let mut last = 0;
        assert_eq!(
            check_line(&CommandLine::parse("N1 G5"), &mut last),
            Err(ProtocolError::MissingChecksum)
        );
        assert_eq!(
            check_line(&CommandLine::parse("G5 *12"), &mut last),
            Err(ProtocolError::ChecksumWithoutLine)
        );
        assert_eq!(
            check_line(&CommandLine::parse("G5 C1 ; note"), &mut last),
            Ok(LineVerdict::Comment)
        );
        assert_eq!(last, 0);
    }
}
