//! Main controller firmware for ATmega32U4 (Teensy 2.0).
//!
//! Drives both keyboard halves over TWI and scans the local switch matrix:
//! - Key data polling with hot-plug detection for each half
//! - LED bank streaming with gamma correction
//! - Debouncing of the locally wired switches
//!
//! The on-board LED on PD6 lights while any key is held.

#![no_std]
#![no_main]
#![feature(asm_experimental_arch)]

mod matrix;
mod twi;

use avr_device::atmega32u4::Peripherals;
use embedded_hal::delay::DelayNs;
use splitlink::{DebounceMatrixScanner, Hands, PeripheralProfile, Rgb};

use twi::TwiBus;

/// Length of one main loop iteration.
const CYCLE_MICROS: u32 = 1000;

/// Color both halves start out with.
const IDLE_COLOR: Rgb = Rgb::new(0, 0, 32);

/// Panic handler: on AVR we just loop forever.
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

fn set_status_led(dp: &Peripherals, on: bool) {
    dp.PORTD.portd.modify(|r, w| unsafe {
        if on {
            w.bits(r.bits() | 0x40)
        } else {
            w.bits(r.bits() & !0x40)
        }
    });
}

#[no_mangle]
pub extern "C" fn main() -> ! {
    let dp = unsafe { Peripherals::steal() };

    // Disable clock prescaler (CLKPR)
    dp.CPU.clkpr.write(|w| w.clkpce().set_bit());
    dp.CPU.clkpr.write(|w| unsafe { w.bits(0) }); // Prescaler = 1

    // PD6 output
    dp.PORTD
        .ddrd
        .modify(|r, w| unsafe { w.bits(r.bits() | 0x40) });

    matrix::init_gpio(&dp);

    let mut bus = TwiBus::new(&dp.TWI);
    let mut hands = Hands::new(PeripheralProfile::RAISE);
    let mut local = DebounceMatrixScanner::<u8, { matrix::ROWS }>::new();
    hands.fill(IDLE_COLOR);

    let mut now_micros: u32 = 0;

    loop {
        if local.scan_due(now_micros) {
            local.scan(&matrix::scan(&dp));
        }

        let report = hands.scan_cycle(&mut bus);
        if report.keys_changed || local.snapshot().has_changes() {
            set_status_led(&dp, hands.pressed_count() + local.pressed_count() > 0);
            hands.acknowledge();
            local.snapshot_mut().acknowledge();
        }

        hands.sync_leds(&mut bus);

        bus.delay_us(CYCLE_MICROS);
        now_micros = now_micros.wrapping_add(CYCLE_MICROS);
    }
}
