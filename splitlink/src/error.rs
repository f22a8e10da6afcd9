//! Link and flashing error types

use thiserror::Error;

/// Errors from a single register or data transaction with a peripheral.
///
/// All of them are recoverable: the peripheral's data is stale for this
/// cycle and availability tracking re-probes it later.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The device is presumed offline; no bus traffic was attempted.
    #[error("peripheral unavailable")]
    Unavailable,

    /// The request was not acknowledged or no reply byte arrived.
    #[error("peripheral did not respond")]
    NoResponse,

    /// A reply arrived but was too short or carried the wrong tag.
    #[error("malformed reply frame")]
    BadFrame,
}

/// Errors that end a firmware update attempt.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// The image cannot be split into addressable pages.
    #[error("invalid firmware image")]
    InvalidImage,

    /// The bootloader could not report a version and CRC; nothing was written.
    #[error("peripheral bootloader did not report a usable CRC")]
    VerifyBeforeFailed,

    /// The erase command was not acknowledged.
    #[error("erase command failed")]
    EraseFailed,

    /// A page address or frame write was not acknowledged as expected.
    /// The peripheral may be left partially written.
    #[error("write failed for page at 0x{offset:04X}")]
    PageWriteFailed { offset: u16 },

    /// The CRC read back after writing does not match the image.
    #[error("CRC mismatch after write: expected 0x{expected:04X}, got 0x{actual:04X}")]
    VerifyAfterMismatch { expected: u16, actual: u16 },

    /// The CRC could not be read back after writing.
    #[error("peripheral stopped answering during verification")]
    VerifyAfterTimeout,

    /// The jump-to-application command was not acknowledged.
    #[error("execute command failed")]
    ExecuteFailed,
}
