//! Local switch matrix wired straight to the controller's GPIO.
//!
//! Drive pins (active-low outputs): PB0, PB1, PB2, PB3, PD2, PD3
//! Read pins (inputs w/ pull-up):   PF0, PF1, PF4, PF5, PF6, PF7, PB6
//!
//! Each drive pin is one row of the sample; the read pins are its bits,
//! inverted so that a pressed switch reads as 1.

use avr_device::atmega32u4::Peripherals;

/// Number of drive pins.
pub const ROWS: usize = 6;
/// Number of read pins.
pub const COLS: usize = 7;

const PORTB_DRIVE: u8 = 0x0F;
const PORTD_DRIVE: u8 = 0x0C;
const PORTF_READ: u8 = 0xF3;
const PORTB_READ: u8 = 0x40;

pub fn init_gpio(dp: &Peripherals) {
    let portb = &dp.PORTB;
    let portd = &dp.PORTD;
    let portf = &dp.PORTF;

    // Drive pins as outputs, initially high (inactive)
    portb
        .ddrb
        .modify(|r, w| unsafe { w.bits(r.bits() | PORTB_DRIVE) });
    portb
        .portb
        .modify(|r, w| unsafe { w.bits(r.bits() | PORTB_DRIVE) });
    portd
        .ddrd
        .modify(|r, w| unsafe { w.bits(r.bits() | PORTD_DRIVE) });
    portd
        .portd
        .modify(|r, w| unsafe { w.bits(r.bits() | PORTD_DRIVE) });

    // Read pins as inputs with pull-ups
    portf
        .ddrf
        .modify(|r, w| unsafe { w.bits(r.bits() & !PORTF_READ) });
    portf
        .portf
        .modify(|r, w| unsafe { w.bits(r.bits() | PORTF_READ) });
    portb
        .ddrb
        .modify(|r, w| unsafe { w.bits(r.bits() & !PORTB_READ) });
    portb
        .portb
        .modify(|r, w| unsafe { w.bits(r.bits() | PORTB_READ) });
}

fn release_all(dp: &Peripherals) {
    dp.PORTB
        .portb
        .modify(|r, w| unsafe { w.bits(r.bits() | PORTB_DRIVE) });
    dp.PORTD
        .portd
        .modify(|r, w| unsafe { w.bits(r.bits() | PORTD_DRIVE) });
}

/// Drive a specific pin low. All other drive pins high.
fn drive_pin(dp: &Peripherals, row: usize) {
    release_all(dp);
    match row {
        0..=3 => dp
            .PORTB
            .portb
            .modify(|r, w| unsafe { w.bits(r.bits() & !(1 << row)) }),
        4 | 5 => dp
            .PORTD
            .portd
            .modify(|r, w| unsafe { w.bits(r.bits() & !(1 << (row - 2))) }),
        _ => {}
    }
}

/// The 7 read pins of the driven row, pressed = 1.
fn read_row(dp: &Peripherals) -> u8 {
    let pinf = dp.PORTF.pinf.read().bits();
    let pinb = dp.PORTB.pinb.read().bits();

    // PF0, PF1 -> bits 0-1; PF4-PF7 -> bits 2-5; PB6 -> bit 6
    let raw = (pinf & 0x03) | ((pinf >> 2) & 0x3C) | (pinb & PORTB_READ);
    !raw & ((1 << COLS) - 1)
}

/// Sample every row once.
pub fn scan(dp: &Peripherals) -> [u8; ROWS] {
    let mut rows = [0u8; ROWS];
    for (row, bits) in rows.iter_mut().enumerate() {
        drive_pin(dp, row);
        settle_delay();
        *bits = read_row(dp);
    }
    release_all(dp);
    rows
}

/// Short delay for pin settling (~5us at 16MHz).
#[inline(always)]
fn settle_delay() {
    for _ in 0..20u8 {
        unsafe { core::arch::asm!("nop") };
    }
}
