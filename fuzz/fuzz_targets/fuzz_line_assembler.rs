//! Fuzz target: `LineAssembler::feed` and `check_line`
//!
//! Drives arbitrary console bytes through the assembler and the sequence
//! check. Neither may panic, every line stays under the size cap, and the
//! sequence number only moves on an accepted line.
//!
//! cargo fuzz run fuzz_line_assembler

#![no_main]

use libfuzzer_sys::fuzz_target;
use robocore::protocol::MAX_CMD_SIZE;
use robocore::protocol::line::{LineAssembler, check_line};

fuzz_target!(|data: &[u8]| {
    let mut assembler = LineAssembler::new();
    let mut last_n = 0i64;

    for &b in data {
        if let Some(line) = assembler.feed(b) {
            assert!(line.as_str().len() < MAX_CMD_SIZE, "line exceeds MAX_CMD_SIZE");
            let before = last_n;
            if check_line(&line, &mut last_n).is_err() {
                assert_eq!(last_n, before, "rejected line moved the sequence");
            }
            let _ = line.int('G');
            let _ = line.value('P');
        }
    }

    assembler.reset();
    assert_eq!(assembler.pending(), 0);
});
