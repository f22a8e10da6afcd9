//! TWI (I2C) master for the link to both keyboard halves.
//!
//! Blocking, polled implementation of the core `Bus` trait on the
//! ATmega32U4 TWI peripheral. Status codes are the ones from the datasheet
//! with the prescaler bits masked off.

use avr_device::atmega32u4::TWI;
use embedded_hal::delay::DelayNs;
use splitlink::{Bus, Transmission};

/// SCL freq = CPU_FREQ / (16 + 2 * TWBR * prescaler)
/// 100kHz = 16MHz / (16 + 2 * 72 * 1) => TWBR = 72
const TWBR_VALUE: u8 = 72;

const TW_START: u8 = 0x08;
const TW_REP_START: u8 = 0x10;
const TW_MT_SLA_ACK: u8 = 0x18;
const TW_MT_SLA_NACK: u8 = 0x20;
const TW_MT_DATA_ACK: u8 = 0x28;
const TW_MT_DATA_NACK: u8 = 0x30;
const TW_MR_SLA_ACK: u8 = 0x40;
const TW_MR_DATA_ACK: u8 = 0x50;
const TW_MR_DATA_NACK: u8 = 0x58;

/// Nanoseconds per iteration of the delay loop at 16MHz.
const NS_PER_SPIN: u32 = 250;

pub struct TwiBus<'a> {
    twi: &'a TWI,
}

impl<'a> TwiBus<'a> {
    pub fn new(twi: &'a TWI) -> Self {
        // Set TWI bit rate, prescaler = 1, enable
        twi.twbr.write(|w| unsafe { w.bits(TWBR_VALUE) });
        twi.twsr.write(|w| w.twps().prescaler_1());
        twi.twcr.write(|w| w.twen().set_bit());
        Self { twi }
    }

    fn status(&self) -> u8 {
        self.twi.twsr.read().bits() & 0xF8
    }

    /// Busy-wait for the TWI interrupt flag. False on timeout.
    fn wait_twint(&self) -> bool {
        let mut timeout: u16 = 0xFFFF;
        while self.twi.twcr.read().twint().bit_is_clear() {
            timeout -= 1;
            if timeout == 0 {
                return false;
            }
        }
        true
    }

    /// Start, or repeated start after a write without stop.
    fn start(&mut self) -> bool {
        self.twi
            .twcr
            .write(|w| w.twint().set_bit().twsta().set_bit().twen().set_bit());
        self.wait_twint() && matches!(self.status(), TW_START | TW_REP_START)
    }

    fn stop(&mut self) {
        self.twi
            .twcr
            .write(|w| w.twint().set_bit().twsto().set_bit().twen().set_bit());
    }

    /// Shift one byte out and return the resulting status.
    fn send(&mut self, byte: u8) -> Option<u8> {
        self.twi.twdr.write(|w| unsafe { w.bits(byte) });
        self.twi.twcr.write(|w| w.twint().set_bit().twen().set_bit());
        self.wait_twint().then(|| self.status())
    }

    /// Clock one byte in, ACKing it unless it is the last one.
    fn receive(&mut self, ack: bool) -> Option<u8> {
        if ack {
            self.twi
                .twcr
                .write(|w| w.twint().set_bit().twea().set_bit().twen().set_bit());
        } else {
            self.twi.twcr.write(|w| w.twint().set_bit().twen().set_bit());
        }
        if !self.wait_twint() {
            return None;
        }
        let expected = if ack { TW_MR_DATA_ACK } else { TW_MR_DATA_NACK };
        (self.status() == expected).then(|| self.twi.twdr.read().bits())
    }

    fn transmit(&mut self, address: u8, bytes: &[u8]) -> Transmission {
        if !self.start() {
            return Transmission::Fault;
        }
        match self.send(address << 1) {
            Some(TW_MT_SLA_ACK) => {}
            Some(TW_MT_SLA_NACK) => return Transmission::AddressNack,
            _ => return Transmission::Fault,
        }
        for &byte in bytes {
            match self.send(byte) {
                Some(TW_MT_DATA_ACK) => {}
                Some(TW_MT_DATA_NACK) => return Transmission::DataNack,
                _ => return Transmission::Fault,
            }
        }
        Transmission::Complete
    }
}

impl DelayNs for TwiBus<'_> {
    fn delay_ns(&mut self, ns: u32) {
        for _ in 0..ns.div_ceil(NS_PER_SPIN) {
            unsafe { core::arch::asm!("nop") };
        }
    }
}

impl Bus for TwiBus<'_> {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Transmission {
        let status = self.transmit(address, bytes);
        self.stop();
        status
    }

    fn write_no_stop(&mut self, address: u8, bytes: &[u8]) -> Transmission {
        let status = self.transmit(address, bytes);
        if !status.is_complete() {
            self.stop();
        }
        status
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> usize {
        if buffer.is_empty() || !self.start() {
            self.stop();
            return 0;
        }
        match self.send((address << 1) | 1) {
            Some(TW_MR_SLA_ACK) => {}
            _ => {
                self.stop();
                return 0;
            }
        }

        let last = buffer.len() - 1;
        let mut received = 0;
        for (i, slot) in buffer.iter_mut().enumerate() {
            match self.receive(i < last) {
                Some(byte) => {
                    *slot = byte;
                    received += 1;
                }
                None => break,
            }
        }
        self.stop();
        received
    }
}
