//! Main-controller side of a split keyboard's peripheral link.
//!
//! The main controller polls two keyboard halves over a shared two-wire
//! bus. This crate holds everything that talks over that bus: the
//! register protocol, LED bank streaming, the page-based firmware
//! updater, and the bit-sliced debouncer used for local switch matrices.
//!
//! This crate is `no_std` so it can be used by both the AVR firmware and
//! the native CLI tool. The `std` feature adds the simulated peripheral
//! bootloader used by the CLI's dry runs.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod bus;
pub mod crc16;
pub mod debounce;
pub mod device;
pub mod error;
pub mod flasher;
pub mod gamma;
pub mod hands;
pub mod led;
pub mod link;
pub mod profile;
pub mod protocol;
pub mod snapshot;

#[cfg(any(test, feature = "std"))]
pub mod sim;

#[cfg(test)]
mod mock;

pub use bus::{Bus, Transmission};
pub use debounce::{DebounceMatrixScanner, Debouncer};
pub use device::{LedBuffer, PeripheralDevice, Rgb};
pub use error::{FlashError, LinkError};
pub use flasher::{
    FirmwareImage, FirmwareUpdater, FlashPhase, FlashProgress, FlashReport, PageOffsets,
};
pub use hands::{HandEvent, Hands, ScanReport, Side};
pub use led::LedBankStreamer;
pub use link::PeripheralLink;
pub use profile::{FlasherProps, PeripheralProfile};
pub use snapshot::{KeyMatrixSnapshot, KeyTransition, RowState};
