//! In-memory peripheral bootloader.
//!
//! Answers the same commands as the real bootloader on one bus address:
//! version and CRC reporting, erase, page addressing and CRC-checked frame
//! writes. Accepted frames end with a data NACK, like on hardware. Delays
//! are accumulated instead of slept, so a dry run of a full update is
//! instant.

use std::fmt::Write as _;

use embedded_hal::delay::DelayNs;

use crate::bus::{Bus, Transmission};
use crate::crc16;
use crate::profile::FlasherProps;

/// Size of the emulated flash: the whole 16-bit address space.
pub const FLASH_SIZE: usize = 0x1_0000;

pub struct SimulatedBootloader {
    pub address: u8,
    pub props: FlasherProps,
    pub flash: Vec<u8>,
    /// Reported application version; 0xFF means no application.
    pub version: u8,
    /// Human readable record of every transaction.
    pub log: Vec<String>,
    pub elapsed_ns: u64,
    pub erase_count: u32,
    pub frames_written: u32,
    pub executed: bool,

    /// Reject the frame with this index (counted over the whole update).
    pub reject_frame: Option<usize>,
    /// Store every frame with its first byte flipped.
    pub corrupt_writes: bool,
    /// CRC requests to ignore after an erase.
    pub busy_after_erase: u16,

    busy_remaining: u16,
    page_address: usize,
    frame_in_page: usize,
    frames_seen: usize,
    pending_reply: Option<[u8; 3]>,
    raw_writes: Vec<Vec<u8>>,
}

impl SimulatedBootloader {
    pub fn new(address: u8, props: FlasherProps) -> Self {
        Self {
            address,
            props,
            flash: vec![0xFF; FLASH_SIZE],
            version: 1,
            log: Vec::new(),
            elapsed_ns: 0,
            erase_count: 0,
            frames_written: 0,
            executed: false,
            reject_frame: None,
            corrupt_writes: false,
            busy_after_erase: 0,
            busy_remaining: 0,
            page_address: 0,
            frame_in_page: 0,
            frames_seen: 0,
            pending_reply: None,
            raw_writes: Vec::new(),
        }
    }

    /// Every write the bootloader received, in order.
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.raw_writes
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns / 1_000_000
    }

    fn record(&mut self, line: String) {
        self.log.push(line);
    }

    fn handle(&mut self, bytes: &[u8]) -> Transmission {
        let commands = self.props.commands;
        let Some(&command) = bytes.first() else {
            return Transmission::Complete;
        };

        if command == commands.get_version_and_crc {
            self.get_version_and_crc(bytes)
        } else if command == commands.erase_program {
            self.flash.fill(0xFF);
            self.erase_count += 1;
            self.busy_remaining = self.busy_after_erase;
            Transmission::Complete
        } else if command == commands.page_address {
            if bytes.len() != 3 {
                return Transmission::Fault;
            }
            self.page_address = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
            self.frame_in_page = 0;
            Transmission::Complete
        } else if command == commands.continue_page {
            self.continue_page(bytes)
        } else if command == commands.execute {
            self.executed = true;
            Transmission::Complete
        } else {
            Transmission::DataNack
        }
    }

    fn get_version_and_crc(&mut self, bytes: &[u8]) -> Transmission {
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            return Transmission::AddressNack;
        }
        if bytes.len() != 5 {
            return Transmission::Fault;
        }
        let offset = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
        let length = u16::from_le_bytes([bytes[3], bytes[4]]) as usize;
        let end = (offset + length).min(FLASH_SIZE);
        let crc = crc16::checksum(&self.flash[offset.min(end)..end]);
        let [lo, hi] = crc.to_le_bytes();
        self.pending_reply = Some([self.version, lo, hi]);
        Transmission::Complete
    }

    fn continue_page(&mut self, bytes: &[u8]) -> Transmission {
        let frame_size = self.props.frame_size as usize;
        let index = self.frames_seen;
        self.frames_seen += 1;

        if bytes.len() != frame_size + 4 || self.reject_frame == Some(index) {
            return Transmission::Fault;
        }
        let data = &bytes[1..=frame_size];
        let crc = u16::from_le_bytes([bytes[frame_size + 1], bytes[frame_size + 2]]);
        if crc16::checksum(data) != crc {
            return Transmission::Fault;
        }

        let start = self.page_address + self.frame_in_page * frame_size;
        if start + frame_size > FLASH_SIZE {
            return Transmission::Fault;
        }
        self.flash[start..start + frame_size].copy_from_slice(data);
        if self.corrupt_writes {
            self.flash[start] ^= 0x01;
        }
        self.frame_in_page += 1;
        self.frames_written += 1;

        // The trailing dummy byte is NACKed
        Transmission::DataNack
    }
}

impl DelayNs for SimulatedBootloader {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns += ns as u64;
    }
}

impl Bus for SimulatedBootloader {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Transmission {
        let status = if address == self.address {
            self.raw_writes.push(bytes.to_vec());
            self.handle(bytes)
        } else {
            Transmission::AddressNack
        };

        let mut line = format!("W 0x{:02X} [{:3}]", address, bytes.len());
        for b in bytes.iter().take(8) {
            let _ = write!(line, " {:02X}", b);
        }
        if bytes.len() > 8 {
            line.push_str(" ..");
        }
        let _ = write!(line, " -> {}", status.code());
        self.record(line);
        status
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> usize {
        let n = match self.pending_reply.take() {
            Some(reply) if address == self.address => {
                let n = reply.len().min(buffer.len());
                buffer[..n].copy_from_slice(&reply[..n]);
                n
            }
            _ => 0,
        };
        self.record(format!(
            "R 0x{:02X} [{:3}] {:02X?}",
            address,
            buffer.len(),
            &buffer[..n]
        ));
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim() -> SimulatedBootloader {
        SimulatedBootloader::new(0x50, FlasherProps::DEFAULT)
    }

    #[test]
    fn reports_version_and_crc_of_range() {
        let mut sim = sim();
        sim.flash[4..8].copy_from_slice(&[1, 2, 3, 0]);
        assert!(sim.write(0x50, &[0x06, 4, 0, 3, 0]).is_complete());

        let mut rx = [0u8; 3];
        assert_eq!(sim.read(0x50, &mut rx), 3);
        assert_eq!(rx, [1, 0x61, 0x61]);
        // One reply per request
        assert_eq!(sim.read(0x50, &mut rx), 0);
    }

    #[test]
    fn accepted_frames_end_with_data_nack() {
        let mut sim = sim();
        sim.write(0x50, &[0x01, 0x40, 0x00]);

        let mut frame = vec![0x02];
        frame.extend_from_slice(&[0xAB; 16]);
        frame.extend_from_slice(&crc16::checksum(&[0xAB; 16]).to_le_bytes());
        frame.push(0);
        assert_eq!(sim.write(0x50, &frame), Transmission::DataNack);
        assert_eq!(&sim.flash[0x40..0x50], &[0xAB; 16]);

        // Corrupt CRC
        frame[17] ^= 0xFF;
        assert_eq!(sim.write(0x50, &frame), Transmission::Fault);
        assert!(sim.flash[0x50..0x60].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn other_addresses_are_not_answered() {
        let mut sim = sim();
        assert_eq!(sim.write(0x58, &[0x04]), Transmission::AddressNack);
        assert_eq!(sim.erase_count, 0);
        assert!(sim.writes().is_empty());
        assert_eq!(sim.log.len(), 1);
    }

    #[test]
    fn delays_accumulate() {
        let mut sim = sim();
        sim.delay_ms(1000);
        sim.delay_us(500);
        assert_eq!(sim.elapsed_ms(), 1000);
        assert_eq!(sim.elapsed_ns, 1_000_500_000);
    }
}
