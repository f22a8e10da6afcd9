//! The shared two-wire bus as seen by the main controller.
//!
//! Only the main controller initiates transactions and only one is in
//! flight at a time, so every operation takes the bus by `&mut`.

use embedded_hal::delay::DelayNs;

/// How a write transaction ended, with the same codes as the classic
/// two-wire "end transmission" status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transmission {
    /// Every byte was acknowledged.
    Complete,
    /// Data did not fit the transmit buffer.
    TooLong,
    /// Nobody answered the address byte.
    AddressNack,
    /// The device answered its address but NACKed a data byte.
    DataNack,
    /// Arbitration loss, timeout or any other bus fault.
    Fault,
}

impl Transmission {
    pub fn code(self) -> u8 {
        match self {
            Transmission::Complete => 0,
            Transmission::TooLong => 1,
            Transmission::AddressNack => 2,
            Transmission::DataNack => 3,
            Transmission::Fault => 4,
        }
    }

    pub fn is_complete(self) -> bool {
        self == Transmission::Complete
    }
}

/// Bus master. Implementations also provide the blocking delays the
/// protocol needs between a request and its answer.
pub trait Bus: DelayNs {
    /// Write `bytes` to `address` as one transaction, ending with a stop.
    fn write(&mut self, address: u8, bytes: &[u8]) -> Transmission;

    /// Write `bytes` to `address` and keep the bus for a repeated start.
    fn write_no_stop(&mut self, address: u8, bytes: &[u8]) -> Transmission {
        self.write(address, bytes)
    }

    /// Request `buffer.len()` bytes from `address`. Returns how many
    /// actually arrived; a device that NACKs its address yields 0.
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> usize;

    /// Address-only transaction used to check that a device is present.
    fn probe(&mut self, address: u8) -> Transmission {
        self.write(address, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(Transmission::Complete.code(), 0);
        assert_eq!(Transmission::AddressNack.code(), 2);
        assert_eq!(Transmission::DataNack.code(), 3);
        assert_eq!(Transmission::Fault.code(), 4);
        assert!(Transmission::Complete.is_complete());
        assert!(!Transmission::DataNack.is_complete());
    }
}
