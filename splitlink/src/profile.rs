//! Per-hardware calibration and protocol constants.
//!
//! Everything that differs between peripheral hardware revisions lives in
//! a [`PeripheralProfile`] instead of being hard-coded in the protocol
//! code. [`PeripheralProfile::RAISE`] describes the reference halves.

use crate::gamma::GAMMA_2_8;
use crate::protocol::{BOOTLOADER_ADDR_BASE, SCANNER_ADDR_BASE};

/// How a half's LEDs are grouped into banks on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct LedLayout {
    /// LED slots per half.
    pub count: u8,
    /// LEDs sent in one bank transaction.
    pub per_bank: u8,
}

impl LedLayout {
    pub const fn banks(&self) -> usize {
        if self.per_bank == 0 {
            return 0;
        }
        (self.count as usize).div_ceil(self.per_bank as usize)
    }

    pub const fn bank_bytes(&self) -> usize {
        self.per_bank as usize * 3
    }
}

impl Default for LedLayout {
    fn default() -> Self {
        PeripheralProfile::RAISE.leds
    }
}

/// Command codes understood by the peripheral bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct BootloaderCommands {
    pub page_address: u8,
    pub continue_page: u8,
    pub execute: u8,
    pub erase_program: u8,
    pub get_version_and_crc: u8,
}

impl Default for BootloaderCommands {
    fn default() -> Self {
        FlasherProps::DEFAULT.commands
    }
}

/// Page layout and timing of the peripheral bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct FlasherProps {
    pub page_size: u16,
    /// Bytes of page data per write transaction; divides `page_size`.
    pub frame_size: u16,
    /// Fill byte for the part of the last page past the image end.
    pub blank: u8,
    /// Pause after every page address and frame write.
    pub delay_ms: u32,
    /// Erase has no completion signal, so we wait this long.
    pub erase_delay_ms: u32,
    /// Time the bootloader needs to compute a CRC before it can answer.
    pub crc_settle_ms: u32,
    /// Transmission status a correctly received frame ends with. The
    /// bootloader NACKs the trailing dummy byte, so this is a data NACK.
    pub frame_ack: u8,
    /// CRC read attempts after writing before giving up.
    pub reverify_attempts: u16,
    pub reverify_delay_ms: u32,
    pub commands: BootloaderCommands,
}

impl FlasherProps {
    pub const DEFAULT: FlasherProps = FlasherProps {
        page_size: 64,
        frame_size: 16,
        blank: 0xFF,
        delay_ms: 1,
        erase_delay_ms: 1000,
        crc_settle_ms: 100,
        frame_ack: 3,
        reverify_attempts: 50,
        reverify_delay_ms: 100,
        commands: BootloaderCommands {
            page_address: 0x01,
            continue_page: 0x02,
            execute: 0x03,
            erase_program: 0x04,
            get_version_and_crc: 0x06,
        },
    };

    pub const fn frames_per_page(&self) -> usize {
        if self.frame_size == 0 {
            return 0;
        }
        (self.page_size / self.frame_size) as usize
    }
}

impl Default for FlasherProps {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct PeripheralProfile {
    pub scanner_address_base: u8,
    pub bootloader_address_base: u8,
    /// Turnaround between a register request and reading its answer.
    pub settle_delay_us: u32,
    /// Cycles to wait before probing again after a failed probe.
    pub retry_backoff: u16,
    /// Interval pushed to both halves when they come online.
    pub keyscan_interval: u8,
    /// Byte offset of the red channel inside each LED triple. Colors go on
    /// the wire as `r, g, b`, in bank frames and in the set-all and
    /// set-one LED commands alike, so the Raise uses 0.
    pub red_channel: u8,
    /// Subtracted from gamma-corrected red values that are at least this
    /// large; the red LEDs see a higher drive voltage than green and blue.
    pub red_compensation: u8,
    /// LED that only exists on ISO halves and must be blanked on ANSI ones.
    pub iso_only_led: u8,
    pub leds: LedLayout,
    #[cfg_attr(feature = "serde", serde(skip, default = "default_gamma"))]
    pub gamma: &'static [u8; 256],
    pub flasher: FlasherProps,
}

#[cfg(feature = "serde")]
fn default_gamma() -> &'static [u8; 256] {
    &GAMMA_2_8
}

impl PeripheralProfile {
    pub const RAISE: PeripheralProfile = PeripheralProfile {
        scanner_address_base: SCANNER_ADDR_BASE,
        bootloader_address_base: BOOTLOADER_ADDR_BASE,
        settle_delay_us: 40,
        retry_backoff: 0x00FF,
        keyscan_interval: 50,
        leds: LedLayout {
            count: 72,
            per_bank: 8,
        },
        red_channel: 0,
        red_compensation: 26,
        iso_only_led: 19,
        gamma: &GAMMA_2_8,
        flasher: FlasherProps::DEFAULT,
    };

    pub fn scanner_address(&self, select: u8) -> u8 {
        self.scanner_address_base | (select & 0b11)
    }

    pub fn bootloader_address(&self, select: u8) -> u8 {
        self.bootloader_address_base | (select & 0b11)
    }
}

impl Default for PeripheralProfile {
    fn default() -> Self {
        Self::RAISE
    }
}
