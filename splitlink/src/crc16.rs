//! CRC16 as computed by the peripheral bootloader.
//!
//! Bit-compatible with avr-libc's `_crc16_update`: polynomial 0xA001
//! (0x8005 reflected), one byte at a time, no final XOR. Firmware frames
//! and the image checksum both start from [`INIT`].

pub const INIT: u16 = 0xFFFF;

pub fn update(mut crc: u16, byte: u8) -> u16 {
    crc ^= byte as u16;
    for _ in 0..8 {
        if crc & 1 != 0 {
            crc = (crc >> 1) ^ 0xA001;
        } else {
            crc >>= 1;
        }
    }
    crc
}

/// CRC16 of `bytes` starting from [`INIT`].
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes.iter().fold(INIT, |crc, &b| update(crc, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values() {
        assert_eq!(checksum(&[0x01, 0x02, 0x03]), 0x6161);
        assert_eq!(checksum(b"123456789"), 0x4B37);
    }

    #[test]
    fn empty_input_is_init() {
        assert_eq!(checksum(&[]), INIT);
    }

    #[test]
    fn incremental_matches_bulk() {
        let data = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0xFF];
        let mut crc = INIT;
        for &b in &data[..3] {
            crc = update(crc, b);
        }
        for &b in &data[3..] {
            crc = update(crc, b);
        }
        assert_eq!(crc, checksum(&data));
    }
}
