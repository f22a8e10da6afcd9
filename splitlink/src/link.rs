//! Register protocol driver for one keyboard half.
//!
//! Requests are single writes of `[command, args...]`. Reads write the
//! command byte, give the peripheral a short turnaround to prepare the
//! answer, then read it in a separate transaction.
//!
//! A half that is unplugged (or busy in its bootloader) must not stall
//! the scan loop, so every operation first checks the availability
//! countdown: 0 means the device is known present, 1 means "probe it
//! now", anything larger is decremented without touching the bus.

use log::{debug, warn};

use crate::bus::Bus;
use crate::device::{PeripheralDevice, Rgb};
use crate::error::LinkError;
use crate::profile::PeripheralProfile;
use crate::protocol::{cmd, reply, Layout, SpiFrequency, HAND_ROWS, KEYDATA_FRAME_LEN};
use crate::snapshot::KeyMatrixSnapshot;

pub struct PeripheralLink {
    device: PeripheralDevice,
    profile: PeripheralProfile,
}

impl PeripheralLink {
    /// Link to the half wired with the 2-bit `select` value. The device
    /// starts out unverified and is probed on first use.
    pub fn new(select: u8, profile: PeripheralProfile) -> Self {
        let select = select & 0b11;
        let device = PeripheralDevice::new(profile.scanner_address(select), select, profile.leds);
        Self { device, profile }
    }

    pub fn device(&self) -> &PeripheralDevice {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut PeripheralDevice {
        &mut self.device
    }

    pub fn profile(&self) -> &PeripheralProfile {
        &self.profile
    }

    /// Bus address of the half: the scanner base OR-ed with its select value.
    pub fn controller_address(&self) -> u8 {
        self.device.address
    }

    /// The 2-bit select value wired on the half.
    pub fn select(&self) -> u8 {
        self.device.select
    }

    pub fn bootloader_address(&self) -> u8 {
        self.profile.bootloader_address(self.device.select)
    }

    pub fn is_online(&self) -> bool {
        self.device.online
    }

    pub fn crc_errors(&self) -> u16 {
        self.device.crc_error_count
    }

    /// Count a CRC mismatch found by a higher layer. Does not affect
    /// availability.
    pub fn record_crc_error(&mut self) {
        self.device.crc_error_count = self.device.crc_error_count.saturating_add(1);
    }

    pub fn set_brightness(&mut self, brightness: u8) {
        self.device.brightness_adjustment = 255 - brightness;
    }

    pub fn brightness(&self) -> u8 {
        255 - self.device.brightness_adjustment
    }

    /// Something went wrong talking to the device; check again next cycle.
    pub fn mark_unavailable(&mut self) {
        self.device.retry_countdown = 1;
        self.device.online = false;
    }

    /// Apply the availability countdown. Returns false when the caller
    /// must not touch the bus this cycle.
    fn is_device_available<B: Bus>(&mut self, bus: &mut B) -> bool {
        match self.device.retry_countdown {
            0 => true,
            1 => {
                if bus.probe(self.device.address).is_complete() {
                    debug!("peripheral 0x{:02X} is back", self.device.address);
                    self.device.retry_countdown = 0;
                    self.device.online = true;
                    true
                } else {
                    debug!(
                        "peripheral 0x{:02X} absent, next probe in {} cycles",
                        self.device.address, self.profile.retry_backoff
                    );
                    self.device.retry_countdown = self.profile.retry_backoff.max(1);
                    self.device.online = false;
                    false
                }
            }
            _ => {
                self.device.retry_countdown -= 1;
                false
            }
        }
    }

    /// Write one request frame, tracking availability.
    pub fn write_data<B: Bus>(&mut self, bus: &mut B, data: &[u8]) -> Result<(), LinkError> {
        if !self.is_device_available(bus) {
            return Err(LinkError::Unavailable);
        }
        let status = bus.write(self.device.address, data);
        if !status.is_complete() {
            warn!(
                "write of 0x{:02X} to 0x{:02X} failed: status {}",
                data.first().copied().unwrap_or(cmd::NONE),
                self.device.address,
                status.code()
            );
            self.mark_unavailable();
            return Err(LinkError::NoResponse);
        }
        self.device.online = true;
        Ok(())
    }

    /// Request a register and read its single-byte value.
    pub fn read_register<B: Bus>(&mut self, bus: &mut B, command: u8) -> Result<u8, LinkError> {
        let mut rx = [0u8; 1];
        self.request(bus, command, &mut rx)?;
        Ok(rx[0])
    }

    pub fn write_register<B: Bus>(
        &mut self,
        bus: &mut B,
        command: u8,
        value: u8,
    ) -> Result<(), LinkError> {
        self.write_data(bus, &[command, value])
    }

    /// Write `command`, wait the settle delay, then read exactly `rx.len()` bytes.
    fn request<B: Bus>(&mut self, bus: &mut B, command: u8, rx: &mut [u8]) -> Result<(), LinkError> {
        self.write_data(bus, &[command])?;

        // Long enough for the peripheral to prepare its answer
        bus.delay_us(self.profile.settle_delay_us);

        if bus.read(self.device.address, rx) < rx.len() {
            warn!(
                "no answer to 0x{:02X} from 0x{:02X}",
                command, self.device.address
            );
            self.mark_unavailable();
            return Err(LinkError::NoResponse);
        }
        Ok(())
    }

    /// Read the half's current key state. The stored snapshot is only
    /// updated when a complete, correctly tagged frame arrives.
    pub fn read_key_snapshot<B: Bus>(
        &mut self,
        bus: &mut B,
    ) -> Result<KeyMatrixSnapshot<u8, HAND_ROWS>, LinkError> {
        if !self.is_device_available(bus) {
            return Err(LinkError::Unavailable);
        }

        let mut rx = [0u8; KEYDATA_FRAME_LEN];
        let received = bus.read(self.device.address, &mut rx);
        if received < KEYDATA_FRAME_LEN || rx[0] != reply::KEYDATA {
            warn!(
                "bad key frame from 0x{:02X}: {} bytes, tag 0x{:02X}",
                self.device.address, received, rx[0]
            );
            self.mark_unavailable();
            return Err(LinkError::BadFrame);
        }

        let mut rows = [0u8; HAND_ROWS];
        rows.copy_from_slice(&rx[1..]);
        self.device.keys.update(rows);
        self.device.online = true;
        Ok(self.device.keys)
    }

    pub fn read_version<B: Bus>(&mut self, bus: &mut B) -> Result<u8, LinkError> {
        self.read_register(bus, cmd::VERSION)
    }

    pub fn keyscan_interval<B: Bus>(&mut self, bus: &mut B) -> Result<u8, LinkError> {
        self.read_register(bus, cmd::KEYSCAN_INTERVAL)
    }

    /// Minimum pause between two matrix scans on the peripheral. The
    /// mapping to time is roughly linear: 10 ≈ 0.35 ms, 50 ≈ 1.6 ms,
    /// 100 ≈ 3.15 ms. LED updates add jitter on top.
    pub fn set_keyscan_interval<B: Bus>(&mut self, bus: &mut B, interval: u8) -> Result<(), LinkError> {
        self.write_register(bus, cmd::KEYSCAN_INTERVAL, interval)
    }

    pub fn led_spi_frequency<B: Bus>(&mut self, bus: &mut B) -> Result<SpiFrequency, LinkError> {
        let raw = self.read_register(bus, cmd::LED_SPI_FREQUENCY)?;
        SpiFrequency::from_raw(raw).ok_or(LinkError::BadFrame)
    }

    pub fn set_led_spi_frequency<B: Bus>(
        &mut self,
        bus: &mut B,
        frequency: SpiFrequency,
    ) -> Result<(), LinkError> {
        self.write_register(bus, cmd::LED_SPI_FREQUENCY, frequency as u8)
    }

    pub fn set_cols_use_pullups<B: Bus>(&mut self, bus: &mut B, enabled: bool) -> Result<(), LinkError> {
        self.write_register(bus, cmd::COLS_USE_PULLUPS, enabled as u8)
    }

    /// Hardware brightness of the LED driver. Coarse; the per-byte
    /// adjustment applied by the bank streamer gives a smoother curve.
    pub fn set_global_brightness<B: Bus>(&mut self, bus: &mut B, level: u8) -> Result<(), LinkError> {
        self.write_register(bus, cmd::LED_GLOBAL_BRIGHTNESS, level)
    }

    /// Version of the SLED LED driver chip.
    pub fn sled_status<B: Bus>(&mut self, bus: &mut B) -> Result<u8, LinkError> {
        self.read_register(bus, cmd::SLED_STATUS)
    }

    pub fn sled_current<B: Bus>(&mut self, bus: &mut B) -> Result<u8, LinkError> {
        self.read_register(bus, cmd::SLED_CURRENT)
    }

    pub fn set_sled_current<B: Bus>(&mut self, bus: &mut B, current: u8) -> Result<(), LinkError> {
        self.write_register(bus, cmd::SLED_CURRENT, current)
    }

    pub fn sled_self_test<B: Bus>(&mut self, bus: &mut B) -> Result<(), LinkError> {
        self.write_data(bus, &[cmd::SLED_SELF_TEST])
    }

    pub fn led_open_faults<B: Bus>(&mut self, bus: &mut B) -> Result<u8, LinkError> {
        self.read_register(bus, cmd::LED_OPEN)
    }

    pub fn led_short_faults<B: Bus>(&mut self, bus: &mut B) -> Result<u8, LinkError> {
        self.read_register(bus, cmd::LED_SHORT)
    }

    pub fn layout<B: Bus>(&mut self, bus: &mut B) -> Result<Layout, LinkError> {
        self.read_register(bus, cmd::LAYOUT).map(Layout::from_raw)
    }

    /// Hall sensor reading telling whether the two halves are joined.
    pub fn joint<B: Bus>(&mut self, bus: &mut B) -> Result<u16, LinkError> {
        let mut rx = [0u8; 2];
        self.request(bus, cmd::JOINED, &mut rx)?;
        Ok(u16::from_le_bytes(rx))
    }

    /// Gamma corrected, sent as `r, g, b`.
    pub fn set_all_leds_to<B: Bus>(&mut self, bus: &mut B, color: Rgb) -> Result<(), LinkError> {
        let gamma = self.profile.gamma;
        let data = [
            cmd::LED_SET_ALL_TO,
            gamma[color.r as usize],
            gamma[color.g as usize],
            gamma[color.b as usize],
        ];
        self.write_data(bus, &data)
    }

    pub fn set_one_led_to<B: Bus>(&mut self, bus: &mut B, led: u8, color: Rgb) -> Result<(), LinkError> {
        let gamma = self.profile.gamma;
        let data = [
            cmd::LED_SET_ONE_TO,
            led,
            gamma[color.r as usize],
            gamma[color.g as usize],
            gamma[color.b as usize],
        ];
        self.write_data(bus, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Transmission;
    use crate::mock::{MockBus, Op};

    fn present_link(bus: &mut MockBus) -> PeripheralLink {
        let mut link = PeripheralLink::new(0, PeripheralProfile::RAISE);
        // Burn the initial probe
        link.write_data(bus, &[cmd::NONE]).unwrap();
        bus.clear();
        link
    }

    #[test]
    fn first_use_probes_then_reads() {
        let mut bus = MockBus::new();
        bus.push_reply(&[0x2A]);
        let mut link = PeripheralLink::new(1, PeripheralProfile::RAISE);
        assert!(!link.is_online());

        assert_eq!(link.read_register(&mut bus, cmd::VERSION), Ok(0x2A));
        assert_eq!(
            bus.ops,
            vec![
                Op::Write { address: 0x59, bytes: vec![] },
                Op::Write { address: 0x59, bytes: vec![cmd::VERSION] },
                Op::Read { address: 0x59, len: 1 },
            ]
        );
        assert!(bus.elapsed_ns >= 40_000);
        assert!(link.is_online());
        assert_eq!(link.device().retry_countdown, 0);
    }

    #[test]
    fn missing_reply_is_no_response() {
        let mut bus = MockBus::new();
        let mut link = present_link(&mut bus);
        assert_eq!(
            link.read_register(&mut bus, cmd::LAYOUT),
            Err(LinkError::NoResponse)
        );
        assert!(!link.is_online());
        assert_eq!(link.device().retry_countdown, 1);
    }

    #[test]
    fn failed_write_marks_for_probe_next_cycle() {
        let mut bus = MockBus::new();
        let mut link = present_link(&mut bus);
        bus.push_status(Transmission::DataNack);
        assert_eq!(
            link.write_register(&mut bus, cmd::KEYSCAN_INTERVAL, 10),
            Err(LinkError::NoResponse)
        );
        assert_eq!(link.device().retry_countdown, 1);

        bus.clear();
        link.write_register(&mut bus, cmd::KEYSCAN_INTERVAL, 10).unwrap();
        assert_eq!(
            bus.writes(),
            vec![vec![], vec![cmd::KEYSCAN_INTERVAL, 10]],
            "probe, then the actual write"
        );
    }

    #[test]
    fn failed_probe_backs_off() {
        let mut bus = MockBus::new();
        let mut link = PeripheralLink::new(0, PeripheralProfile::RAISE);
        bus.push_status(Transmission::AddressNack);
        assert_eq!(
            link.write_register(&mut bus, cmd::SLED_CURRENT, 1),
            Err(LinkError::Unavailable)
        );
        assert_eq!(link.device().retry_countdown, 0xFF);
        bus.clear();

        // Every cycle until the countdown reaches 1 stays off the bus
        for _ in 0..0xFE {
            assert_eq!(link.read_key_snapshot(&mut bus), Err(LinkError::Unavailable));
        }
        assert!(bus.ops.is_empty());
        assert_eq!(link.device().retry_countdown, 1);

        // Then exactly one probe
        bus.push_status(Transmission::AddressNack);
        assert_eq!(link.read_key_snapshot(&mut bus), Err(LinkError::Unavailable));
        assert_eq!(bus.ops, vec![Op::Write { address: 0x58, bytes: vec![] }]);
    }

    #[test]
    fn key_snapshot_requires_tag_and_full_frame() {
        let mut bus = MockBus::new();
        let mut link = present_link(&mut bus);

        bus.push_reply(&[reply::KEYDATA, 1, 2, 3, 4, 5]);
        let snap = link.read_key_snapshot(&mut bus).unwrap();
        assert_eq!(snap.current, [1, 2, 3, 4, 5]);
        assert_eq!(bus.ops, vec![Op::Read { address: 0x58, len: 6 }]);

        // Wrong tag
        bus.push_reply(&[reply::NONE, 9, 9, 9, 9, 9]);
        assert_eq!(link.read_key_snapshot(&mut bus), Err(LinkError::BadFrame));
        assert_eq!(link.device().keys.current, [1, 2, 3, 4, 5]);
        assert!(!link.is_online());

        // Short frame, after the re-probe
        bus.push_reply(&[reply::KEYDATA, 9, 9]);
        assert_eq!(link.read_key_snapshot(&mut bus), Err(LinkError::BadFrame));
        assert_eq!(link.device().keys.current, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn addresses() {
        let link = PeripheralLink::new(3, PeripheralProfile::RAISE);
        assert_eq!(link.controller_address(), 0x5B);
        assert_eq!(link.select(), 3);
        assert_eq!(PeripheralLink::new(0, PeripheralProfile::RAISE).controller_address(), 0x58);
        assert_eq!(link.bootloader_address(), 0x53);
    }

    #[test]
    fn joint_reads_two_bytes_little_endian() {
        let mut bus = MockBus::new();
        let mut link = present_link(&mut bus);
        bus.push_reply(&[0x34, 0x12]);
        assert_eq!(link.joint(&mut bus), Ok(0x1234));

        bus.push_reply(&[0x34]);
        assert_eq!(link.joint(&mut bus), Err(LinkError::NoResponse));
    }

    #[test]
    fn typed_registers() {
        let mut bus = MockBus::new();
        let mut link = present_link(&mut bus);

        bus.push_reply(&[0x04]).push_reply(&[0x01]).push_reply(&[0x09]);
        assert_eq!(link.led_spi_frequency(&mut bus), Ok(SpiFrequency::Khz512));
        assert_eq!(link.layout(&mut bus), Ok(Layout::Ansi));
        assert_eq!(link.led_spi_frequency(&mut bus), Err(LinkError::BadFrame));

        bus.clear();
        link.set_led_spi_frequency(&mut bus, SpiFrequency::Mhz1).unwrap();
        link.set_cols_use_pullups(&mut bus, true).unwrap();
        link.sled_self_test(&mut bus).unwrap();
        assert_eq!(
            bus.writes(),
            vec![
                vec![cmd::LED_SPI_FREQUENCY, 0x05],
                vec![cmd::COLS_USE_PULLUPS, 1],
                vec![cmd::SLED_SELF_TEST],
            ]
        );
    }

    #[test]
    fn led_commands_are_gamma_corrected() {
        let mut bus = MockBus::new();
        let mut link = present_link(&mut bus);
        link.set_all_leds_to(&mut bus, Rgb::new(255, 128, 0)).unwrap();
        link.set_one_led_to(&mut bus, 5, Rgb::new(0, 255, 200)).unwrap();
        assert_eq!(
            bus.writes(),
            vec![
                vec![cmd::LED_SET_ALL_TO, 255, 37, 0],
                vec![cmd::LED_SET_ONE_TO, 5, 0, 255, 129],
            ]
        );
    }

    #[test]
    fn brightness_is_stored_inverted() {
        let mut link = PeripheralLink::new(0, PeripheralProfile::RAISE);
        link.set_brightness(200);
        assert_eq!(link.device().brightness_adjustment, 55);
        assert_eq!(link.brightness(), 200);
    }

    #[test]
    fn crc_errors_do_not_take_device_offline() {
        let mut bus = MockBus::new();
        let mut link = present_link(&mut bus);
        link.record_crc_error();
        link.record_crc_error();
        assert_eq!(link.crc_errors(), 2);
        assert!(link.is_online());
        assert_eq!(link.device().retry_countdown, 0);
    }
}
