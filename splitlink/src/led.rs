//! Streams a half's LED colors to it one bank at a time.
//!
//! A full refresh of 72 LEDs does not fit one bus transaction, so colors
//! go out in banks: `[LED_BASE + bank, r, g, b, r, g, b, ...]`. Each byte
//! is dimmed by the link's brightness adjustment, gamma corrected, and
//! red bytes get the profile's compensation on top.

use log::trace;

use crate::bus::Bus;
use crate::device::MAX_BANK_BYTES;
use crate::error::LinkError;
use crate::link::PeripheralLink;
use crate::profile::PeripheralProfile;
use crate::protocol::cmd;

/// Transform a raw color byte into the value put on the wire.
pub fn encode_byte(raw: u8, adjustment: u8, red: bool, profile: &PeripheralProfile) -> u8 {
    let adjusted = raw.saturating_sub(adjustment);
    let corrected = profile.gamma[adjusted as usize];
    if red && corrected >= profile.red_compensation {
        corrected - profile.red_compensation
    } else {
        corrected
    }
}

pub struct LedBankStreamer {
    frame: [u8; 1 + MAX_BANK_BYTES],
}

impl Default for LedBankStreamer {
    fn default() -> Self {
        Self::new()
    }
}

impl LedBankStreamer {
    pub fn new() -> Self {
        Self {
            frame: [0; 1 + MAX_BANK_BYTES],
        }
    }

    /// Build the wire frame for `bank` and return it.
    pub fn build_frame(&mut self, link: &PeripheralLink, bank: usize) -> &[u8] {
        let device = link.device();
        let profile = link.profile();

        self.frame[0] = cmd::LED_BASE.wrapping_add(bank as u8);
        let len = device.leds.bank_bytes_into(bank, &mut self.frame[1..]);
        for (i, byte) in self.frame[1..=len].iter_mut().enumerate() {
            let red = i % 3 == profile.red_channel as usize;
            *byte = encode_byte(*byte, device.brightness_adjustment, red, profile);
        }
        &self.frame[..=len]
    }

    /// Send the bank after the one sent last and advance, wrapping after
    /// the last bank.
    pub fn send_next_bank<B: Bus>(
        &mut self,
        link: &mut PeripheralLink,
        bus: &mut B,
    ) -> Result<(), LinkError> {
        let bank = link.device_mut().leds.take_next_bank();
        self.send_bank(link, bus, bank)
    }

    /// Send the first changed bank at or after the next bank, wrapping
    /// around, and advance past it. Returns false when nothing changed.
    pub fn send_next_dirty_bank<B: Bus>(
        &mut self,
        link: &mut PeripheralLink,
        bus: &mut B,
    ) -> Result<bool, LinkError> {
        let leds = &mut link.device_mut().leds;
        let Some(bank) = leds.next_dirty_bank() else {
            return Ok(false);
        };
        leds.set_next_bank(bank);
        self.send_next_bank(link, bus)?;
        Ok(true)
    }

    pub fn send_bank<B: Bus>(
        &mut self,
        link: &mut PeripheralLink,
        bus: &mut B,
        bank: usize,
    ) -> Result<(), LinkError> {
        self.build_frame(link, bank);
        let len = 1 + link.device().leds.bank_bytes();
        trace!("bank {} -> 0x{:02X}", bank, link.controller_address());
        link.write_data(bus, &self.frame[..len])?;
        link.device_mut().leds.clear_dirty(bank);
        Ok(())
    }

    /// Send every bank that changed since it was last sent. Stops at the
    /// first failure; unsent banks stay dirty. Returns the number sent.
    pub fn sync_changed<B: Bus>(
        &mut self,
        link: &mut PeripheralLink,
        bus: &mut B,
    ) -> Result<usize, LinkError> {
        let mut sent = 0;
        for bank in 0..link.device().leds.banks() {
            if link.device().leds.is_dirty(bank) {
                self.send_bank(link, bus, bank)?;
                sent += 1;
            }
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Rgb;
    use crate::mock::MockBus;

    fn online_link(bus: &mut MockBus) -> PeripheralLink {
        let mut link = PeripheralLink::new(0, PeripheralProfile::RAISE);
        link.write_data(bus, &[cmd::NONE]).unwrap();
        bus.clear();
        link
    }

    #[test]
    fn red_compensation() {
        let p = PeripheralProfile::RAISE;
        // gamma[234] == 200, gamma[80] == 10, gamma[113] == 26
        assert_eq!(encode_byte(234, 0, true, &p), 174);
        assert_eq!(encode_byte(80, 0, true, &p), 10);
        assert_eq!(encode_byte(113, 0, true, &p), 0);
        assert_eq!(encode_byte(234, 0, false, &p), 200);
    }

    #[test]
    fn brightness_adjustment_saturates() {
        let p = PeripheralProfile::RAISE;
        assert_eq!(encode_byte(255, 21, false, &p), 200);
        assert_eq!(encode_byte(20, 55, false, &p), 0);
    }

    #[test]
    fn banks_cycle_in_order_and_wrap() {
        let mut bus = MockBus::new();
        let mut link = online_link(&mut bus);
        let mut streamer = LedBankStreamer::new();

        for _ in 0..9 {
            streamer.send_next_bank(&mut link, &mut bus).unwrap();
        }
        assert_eq!(link.device().leds.next_bank(), 0);

        let heads: Vec<u8> = bus.writes().iter().map(|w| w[0]).collect();
        assert_eq!(heads, (0x80..0x89).collect::<Vec<u8>>());
        assert!(bus.writes().iter().all(|w| w.len() == 25));

        streamer.send_next_bank(&mut link, &mut bus).unwrap();
        assert_eq!(bus.writes().last().unwrap()[0], 0x80);
    }

    #[test]
    fn dirty_banks_are_sent_from_next_bank_and_wrap() {
        let mut bus = MockBus::new();
        let mut link = online_link(&mut bus);
        let mut streamer = LedBankStreamer::new();

        for _ in 0..5 {
            streamer.send_next_bank(&mut link, &mut bus).unwrap();
        }
        assert_eq!(link.device().leds.next_bank(), 5);
        bus.clear();

        // Dirty banks on both sides of next_bank
        for led in [8, 24, 48, 64] {
            link.device_mut().leds.set(led, Rgb::new(1, 1, 1));
        }
        let mut sent = Vec::new();
        while streamer.send_next_dirty_bank(&mut link, &mut bus).unwrap() {
            sent.push(link.device().leds.next_bank());
        }
        let heads: Vec<u8> = bus.writes().iter().map(|w| w[0]).collect();
        assert_eq!(heads, vec![0x86, 0x88, 0x81, 0x83]);
        assert_eq!(sent, vec![7, 0, 2, 4]);
        assert_eq!(link.device().leds.next_dirty_bank(), None);
    }

    #[test]
    fn frame_layout() {
        let mut bus = MockBus::new();
        let mut link = online_link(&mut bus);
        link.device_mut().leds.set(9, Rgb::new(234, 234, 80));

        let mut streamer = LedBankStreamer::new();
        streamer.send_bank(&mut link, &mut bus, 1).unwrap();
        let frame = &bus.writes()[0];
        assert_eq!(frame[0], 0x81);
        // Second LED of bank 1; red lands on frame offset 4
        assert_eq!(&frame[4..7], &[174, 200, 10]);
        assert!(frame[1..4].iter().all(|&b| b == 0));
    }

    #[test]
    fn only_dirty_banks_are_synced() {
        let mut bus = MockBus::new();
        let mut link = online_link(&mut bus);
        let mut streamer = LedBankStreamer::new();

        link.device_mut().leds.set(0, Rgb::new(1, 1, 1));
        link.device_mut().leds.set(70, Rgb::new(1, 1, 1));
        assert_eq!(streamer.sync_changed(&mut link, &mut bus), Ok(2));
        let heads: Vec<u8> = bus.writes().iter().map(|w| w[0]).collect();
        assert_eq!(heads, vec![0x80, 0x88]);

        bus.clear();
        assert_eq!(streamer.sync_changed(&mut link, &mut bus), Ok(0));
        assert!(bus.ops.is_empty());
    }

    #[test]
    fn failed_send_keeps_bank_dirty() {
        let mut bus = MockBus::new();
        let mut link = online_link(&mut bus);
        let mut streamer = LedBankStreamer::new();

        link.device_mut().leds.set(8, Rgb::new(1, 1, 1));
        bus.push_status(crate::bus::Transmission::AddressNack);
        assert_eq!(
            streamer.sync_changed(&mut link, &mut bus),
            Err(LinkError::NoResponse)
        );
        assert!(link.device().leds.is_dirty(1));
    }
}
