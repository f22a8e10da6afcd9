//! State the main controller keeps for each peripheral.

use crate::profile::LedLayout;
use crate::protocol::HAND_ROWS;
use crate::snapshot::KeyMatrixSnapshot;

/// Most LED slots a half can have.
pub const LED_CAPACITY: usize = 72;

/// Most banks a half can be split into.
pub const MAX_BANKS: usize = 16;

/// Most bytes in one bank.
pub const MAX_BANK_BYTES: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Colors of one half, serialized on demand into fixed-size banks.
#[derive(Debug, Clone)]
pub struct LedBuffer {
    leds: [Rgb; LED_CAPACITY],
    layout: LedLayout,
    next_bank: usize,
    /// One bit per bank that changed since it was last sent.
    dirty: u16,
}

impl LedBuffer {
    /// Layouts larger than the buffer capacity are clamped to it.
    pub fn new(layout: LedLayout) -> Self {
        let per_bank = (layout.per_bank as usize).clamp(1, MAX_BANK_BYTES / 3);
        let count = (layout.count as usize)
            .min(LED_CAPACITY)
            .min(per_bank * MAX_BANKS);
        let layout = LedLayout {
            count: count as u8,
            per_bank: per_bank as u8,
        };
        Self {
            leds: [Rgb::BLACK; LED_CAPACITY],
            layout,
            next_bank: 0,
            dirty: 0,
        }
    }

    pub fn layout(&self) -> LedLayout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.layout.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn banks(&self) -> usize {
        self.layout.banks()
    }

    pub fn bank_bytes(&self) -> usize {
        self.layout.bank_bytes()
    }

    pub fn next_bank(&self) -> usize {
        self.next_bank
    }

    pub fn set_next_bank(&mut self, bank: usize) {
        if bank < self.banks() {
            self.next_bank = bank;
        }
    }

    /// Return the bank to send now and advance to the following one.
    pub fn take_next_bank(&mut self) -> usize {
        let bank = self.next_bank;
        self.next_bank = (self.next_bank + 1) % self.banks().max(1);
        bank
    }

    pub fn get(&self, index: usize) -> Option<Rgb> {
        (index < self.len()).then(|| self.leds[index])
    }

    /// Store a color and mark its bank dirty if it changed. Out of range
    /// indices are ignored.
    pub fn set(&mut self, index: usize, color: Rgb) {
        if index >= self.len() {
            return;
        }
        if self.leds[index] != color {
            self.leds[index] = color;
            self.dirty |= 1 << (index / self.layout.per_bank as usize);
        }
    }

    pub fn fill(&mut self, color: Rgb) {
        for i in 0..self.len() {
            self.set(i, color);
        }
    }

    pub fn mark_all_dirty(&mut self) {
        self.dirty = ((1u32 << self.banks()) - 1) as u16;
    }

    pub fn is_dirty(&self, bank: usize) -> bool {
        bank < self.banks() && self.dirty & (1 << bank) != 0
    }

    /// First dirty bank at or after `next_bank`, wrapping around.
    pub fn next_dirty_bank(&self) -> Option<usize> {
        let banks = self.banks();
        (0..banks)
            .map(|n| (self.next_bank + n) % banks)
            .find(|&bank| self.is_dirty(bank))
    }

    pub fn clear_dirty(&mut self, bank: usize) {
        if bank < self.banks() {
            self.dirty &= !(1 << bank);
        }
    }

    /// Serialize `bank` as `r, g, b` triples into `out` and return the
    /// number of bytes written. Slots past the last LED read as black.
    pub fn bank_bytes_into(&self, bank: usize, out: &mut [u8]) -> usize {
        let per_bank = self.layout.per_bank as usize;
        let len = self.bank_bytes().min(out.len());
        for (i, chunk) in out[..len].chunks_mut(3).enumerate() {
            let color = self.get(bank * per_bank + i).unwrap_or(Rgb::BLACK);
            let triple = [color.r, color.g, color.b];
            chunk.copy_from_slice(&triple[..chunk.len()]);
        }
        len
    }
}

/// One peripheral as tracked by the main controller.
#[derive(Debug, Clone)]
pub struct PeripheralDevice {
    /// Bus address: the scanner base OR-ed with `select`.
    pub address: u8,
    /// The 2-bit select value wired on this half.
    pub select: u8,
    pub online: bool,
    /// 0 = known present, otherwise cycles left before the next probe.
    pub retry_countdown: u16,
    pub crc_error_count: u16,
    /// `255 - brightness`, subtracted from every color byte.
    pub brightness_adjustment: u8,
    pub leds: LedBuffer,
    pub keys: KeyMatrixSnapshot<u8, HAND_ROWS>,
}

impl PeripheralDevice {
    pub fn new(address: u8, select: u8, layout: LedLayout) -> Self {
        Self {
            address,
            select,
            online: false,
            // Probe on first use
            retry_countdown: 1,
            crc_error_count: 0,
            brightness_adjustment: 0,
            leds: LedBuffer::new(layout),
            keys: KeyMatrixSnapshot::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAISE: LedLayout = LedLayout {
        count: 72,
        per_bank: 8,
    };

    #[test]
    fn banks_serialize_in_led_order() {
        let mut buf = LedBuffer::new(RAISE);
        buf.set(8, Rgb::new(1, 2, 3));
        buf.set(15, Rgb::new(4, 5, 6));

        let mut out = [0u8; MAX_BANK_BYTES];
        let n = buf.bank_bytes_into(1, &mut out);
        assert_eq!(n, 24);
        assert_eq!(&out[..3], &[1, 2, 3]);
        assert_eq!(&out[21..24], &[4, 5, 6]);
        assert!(out[3..21].iter().all(|&b| b == 0));
    }

    #[test]
    fn next_bank_wraps() {
        let mut buf = LedBuffer::new(RAISE);
        let visited: Vec<usize> = (0..10).map(|_| buf.take_next_bank()).collect();
        assert_eq!(visited, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 0]);
    }

    #[test]
    fn dirty_tracking_per_bank() {
        let mut buf = LedBuffer::new(RAISE);
        buf.set(17, Rgb::new(9, 9, 9));
        assert!(buf.is_dirty(2));
        assert!(!buf.is_dirty(1));

        buf.clear_dirty(2);
        buf.set(17, Rgb::new(9, 9, 9));
        assert!(!buf.is_dirty(2), "same color does not dirty the bank");

        buf.mark_all_dirty();
        assert!((0..9).all(|b| buf.is_dirty(b)));
        assert!(!buf.is_dirty(9));
    }

    #[test]
    fn out_of_range_writes_are_ignored() {
        let mut buf = LedBuffer::new(RAISE);
        buf.set(72, Rgb::new(1, 1, 1));
        assert_eq!(buf.get(72), None);
        assert_eq!(buf.get(71), Some(Rgb::BLACK));
    }

    #[test]
    fn partial_last_bank_pads_black() {
        let mut buf = LedBuffer::new(LedLayout {
            count: 10,
            per_bank: 4,
        });
        assert_eq!(buf.banks(), 3);
        buf.fill(Rgb::new(7, 7, 7));
        let mut out = [0xAAu8; 12];
        buf.bank_bytes_into(2, &mut out);
        assert_eq!(&out[..6], &[7; 6]);
        assert_eq!(&out[6..], &[0; 6]);
    }

    #[test]
    fn oversized_layout_is_clamped() {
        let buf = LedBuffer::new(LedLayout {
            count: 200,
            per_bank: 40,
        });
        assert_eq!(buf.len(), LED_CAPACITY);
        assert_eq!(buf.bank_bytes(), MAX_BANK_BYTES);
    }
}
