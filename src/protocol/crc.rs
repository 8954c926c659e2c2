//! CRC-16 over the command prefix.
//!
//! Reflected polynomial 0x8408 seeded with 0xFFFF; the result is inverted
//! and its two bytes swapped before it goes on the wire in decimal.

const POLY: u16 = 0x8408;

pub fn crc16(data: &[u8]) -> u16 {
    if data.is_empty() {
        return 0;
    }
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        let mut b = u16::from(byte);
        for _ in 0..8 {
            if (crc ^ b) & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
            b >>= 1;
        }
    }
    (!crc).swap_bytes()
}
