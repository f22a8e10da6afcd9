//! Wire constants for the peripheral register protocol.
//!
//! Every request starts with a single command byte. Reads are a command
//! write followed by a separate read transaction once the peripheral has
//! had time to prepare its answer.

/// Base bus address of the key/LED scanner firmware. The 2-bit select
/// value wired on each half is OR-ed into it.
pub const SCANNER_ADDR_BASE: u8 = 0x58;

/// Base bus address of the peripheral bootloader (0x50 left, 0x51 right).
pub const BOOTLOADER_ADDR_BASE: u8 = 0x50;

/// Rows reported by each half in a key data reply.
pub const HAND_ROWS: usize = 5;

/// Length of a key data reply: tag byte plus one byte per row.
pub const KEYDATA_FRAME_LEN: usize = 1 + HAND_ROWS;

pub mod cmd {
    pub const NONE: u8 = 0x00;
    pub const VERSION: u8 = 0x01;
    pub const KEYSCAN_INTERVAL: u8 = 0x02;
    pub const LED_SET_ALL_TO: u8 = 0x03;
    pub const LED_SET_ONE_TO: u8 = 0x04;
    pub const COLS_USE_PULLUPS: u8 = 0x05;
    pub const LED_SPI_FREQUENCY: u8 = 0x06;
    pub const LED_GLOBAL_BRIGHTNESS: u8 = 0x07;
    pub const SLED_STATUS: u8 = 0x08;
    pub const LED_OPEN: u8 = 0x09;
    pub const LED_SHORT: u8 = 0x0A;
    pub const JOINED: u8 = 0x0B;
    pub const LAYOUT: u8 = 0x0C;
    pub const SLED_CURRENT: u8 = 0x0D;
    pub const SLED_SELF_TEST: u8 = 0x0E;
    /// "Set LED bank N" is `LED_BASE + N`.
    pub const LED_BASE: u8 = 0x80;
}

pub mod reply {
    pub const NONE: u8 = 0x00;
    pub const KEYDATA: u8 = 0x01;
}

/// Clock of the SPI link between a half's controller and its LED driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SpiFrequency {
    Off = 0x00,
    Khz64 = 0x01,
    Khz128 = 0x02,
    Khz256 = 0x03,
    /// Least visible flicker on the Raise LED driver.
    #[default]
    Khz512 = 0x04,
    Mhz1 = 0x05,
    Mhz2 = 0x06,
    Mhz4 = 0x07,
}

impl SpiFrequency {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0x00 => Self::Off,
            0x01 => Self::Khz64,
            0x02 => Self::Khz128,
            0x03 => Self::Khz256,
            0x04 => Self::Khz512,
            0x05 => Self::Mhz1,
            0x06 => Self::Mhz2,
            0x07 => Self::Mhz4,
            _ => return None,
        })
    }
}

/// Physical layout reported by a half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    #[default]
    Iso,
    Ansi,
}

impl Layout {
    pub fn from_raw(raw: u8) -> Self {
        if raw == 1 {
            Layout::Ansi
        } else {
            Layout::Iso
        }
    }
}
