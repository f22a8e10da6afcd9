//! Both halves of the keyboard as seen by the main controller.
//!
//! Runs the per-cycle work: poll each half for key data, notice halves
//! being plugged and unplugged, and stream changed LED banks. Key state
//! is exposed in main-matrix coordinates, where the left half owns
//! columns 0..8 and the right half is mirrored into columns 8..16.

use log::{debug, info};

use crate::bus::Bus;
use crate::device::Rgb;
use crate::error::{FlashError, LinkError};
use crate::flasher::{FirmwareImage, FirmwareUpdater, FlashProgress, FlashReport};
use crate::led::LedBankStreamer;
use crate::link::PeripheralLink;
use crate::profile::PeripheralProfile;
use crate::protocol::{Layout, HAND_ROWS};
use crate::snapshot::KeyTransition;

/// Columns scanned by one half.
pub const HAND_COLS: usize = 8;

/// Columns of the combined matrix.
pub const MATRIX_COLS: usize = 2 * HAND_COLS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    /// Select value wired on this half.
    pub fn select(self) -> u8 {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    fn index(self) -> usize {
        self.select() as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandEvent {
    Connected(Side),
    Disconnected(Side),
}

/// Outcome of one [`Hands::scan_cycle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub events: [Option<HandEvent>; 2],
    /// Key state differs from the last acknowledged state.
    pub keys_changed: bool,
}

impl ScanReport {
    pub fn events(&self) -> impl Iterator<Item = HandEvent> + '_ {
        self.events.iter().flatten().copied()
    }
}

pub struct Hands {
    links: [PeripheralLink; 2],
    streamer: LedBankStreamer,
    online: [bool; 2],
    suspended: [bool; 2],
    layout: Layout,
    keyscan_interval: u8,
}

impl Hands {
    pub fn new(profile: PeripheralProfile) -> Self {
        Self {
            links: [
                PeripheralLink::new(Side::Left.select(), profile),
                PeripheralLink::new(Side::Right.select(), profile),
            ],
            streamer: LedBankStreamer::new(),
            online: [false; 2],
            suspended: [false; 2],
            layout: Layout::Iso,
            keyscan_interval: profile.keyscan_interval,
        }
    }

    pub fn link(&self, side: Side) -> &PeripheralLink {
        &self.links[side.index()]
    }

    pub fn link_mut(&mut self, side: Side) -> &mut PeripheralLink {
        &mut self.links[side.index()]
    }

    /// Layout reported by the halves; ANSI if either says so.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn is_online(&self, side: Side) -> bool {
        self.online[side.index()]
    }

    /// Stop polling and streaming to a half, e.g. while it sits in its
    /// bootloader.
    pub fn suspend(&mut self, side: Side) {
        self.suspended[side.index()] = true;
    }

    /// Resume a suspended half. It is re-probed and re-initialized.
    pub fn resume(&mut self, side: Side) {
        let i = side.index();
        self.suspended[i] = false;
        self.online[i] = false;
        self.links[i].mark_unavailable();
    }

    pub fn is_suspended(&self, side: Side) -> bool {
        self.suspended[side.index()]
    }

    pub fn set_led(&mut self, side: Side, index: usize, color: Rgb) {
        let iso_only = self.links[0].profile().iso_only_led as usize;
        if side == Side::Left && index == iso_only && self.layout == Layout::Ansi {
            return;
        }
        self.links[side.index()].device_mut().leds.set(index, color);
    }

    pub fn led(&self, side: Side, index: usize) -> Option<Rgb> {
        self.links[side.index()].device().leds.get(index)
    }

    pub fn fill(&mut self, color: Rgb) {
        for side in Side::BOTH {
            let len = self.links[side.index()].device().leds.len();
            for i in 0..len {
                self.set_led(side, i, color);
            }
        }
    }

    /// Poll both halves for key data.
    pub fn scan_cycle<B: Bus>(&mut self, bus: &mut B) -> ScanReport {
        let mut report = ScanReport::default();
        let mut reinitialize = false;

        for side in Side::BOTH {
            let i = side.index();
            if self.suspended[i] {
                continue;
            }

            let link = &mut self.links[i];
            if link.read_key_snapshot(bus).is_ok() && self.layout == Layout::Ansi {
                apply_ansi_quirks(side, &mut link.device_mut().keys.current);
            }

            let now_online = link.is_online();
            if now_online && !self.online[i] {
                info!("{:?} half connected", side);
                report.events[i] = Some(HandEvent::Connected(side));
                reinitialize = true;
            } else if !now_online && self.online[i] {
                info!("{:?} half disconnected", side);
                report.events[i] = Some(HandEvent::Disconnected(side));
                link.device_mut().keys.clear();
            }
            self.online[i] = now_online;
        }

        if reinitialize {
            self.initialize_sides(bus);
        }

        report.keys_changed = self
            .links
            .iter()
            .any(|link| link.device().keys.has_changes());
        report
    }

    /// Bring both halves to a known state after one of them was plugged in.
    fn initialize_sides<B: Bus>(&mut self, bus: &mut B) {
        let mut layout = Layout::Iso;
        for (link, _) in self.active_links() {
            if let Ok(Layout::Ansi) = link.layout(bus) {
                layout = Layout::Ansi;
            }
        }
        if layout != self.layout {
            debug!("layout is now {:?}", layout);
        }
        self.layout = layout;

        let interval = self.keyscan_interval;
        for (link, _) in self.active_links() {
            link.set_keyscan_interval(bus, interval).ok();
        }

        // The LED driver keeps showing the last color of the ISO-only LED
        // when the map no longer covers it, so it is blanked on every replug
        let iso_only = self.links[0].profile().iso_only_led as usize;
        self.links[0].device_mut().leds.set(iso_only, Rgb::BLACK);
        // Resend everything; the half that came back lost its colors
        for link in &mut self.links {
            link.device_mut().leds.mark_all_dirty();
        }
    }

    fn active_links(&mut self) -> impl Iterator<Item = (&mut PeripheralLink, Side)> {
        let suspended = self.suspended;
        self.links
            .iter_mut()
            .zip(Side::BOTH)
            .filter(move |(_, side)| !suspended[side.index()])
    }

    /// Key changes since the last [`acknowledge`](Self::acknowledge), in
    /// main-matrix coordinates.
    pub fn transitions(&self) -> impl Iterator<Item = KeyTransition> + '_ {
        let left = self.links[0].device().keys.transitions();
        let right = self.links[1]
            .device()
            .keys
            .transitions()
            .map(|t| KeyTransition {
                col: (MATRIX_COLS - 1) as u8 - t.col,
                ..t
            });
        left.chain(right)
    }

    pub fn acknowledge(&mut self) {
        for link in &mut self.links {
            link.device_mut().keys.acknowledge();
        }
    }

    /// Whether the key at `row`, `col` in main-matrix coordinates is down.
    pub fn is_pressed(&self, row: usize, col: usize) -> bool {
        if row >= HAND_ROWS || col >= MATRIX_COLS {
            return false;
        }
        if col < HAND_COLS {
            self.links[0].device().keys.is_pressed(row, col)
        } else {
            self.links[1]
                .device()
                .keys
                .is_pressed(row, MATRIX_COLS - 1 - col)
        }
    }

    pub fn pressed_count(&self) -> u32 {
        self.links.iter().map(|l| l.device().keys.pressed_count()).sum()
    }

    /// Send at most one changed LED bank to each half.
    pub fn sync_leds<B: Bus>(&mut self, bus: &mut B) {
        for side in Side::BOTH {
            let i = side.index();
            if self.suspended[i] {
                continue;
            }
            // Failures leave the bank dirty and are retried next cycle
            self.streamer
                .send_next_dirty_bank(&mut self.links[i], bus)
                .ok();
        }
    }

    /// Flash `image` onto a half that is already in its bootloader.
    /// Polling of that half is suspended for the duration and it is
    /// re-initialized once it answers again.
    pub fn flash<B: Bus, P: FlashProgress>(
        &mut self,
        side: Side,
        bus: &mut B,
        image: &FirmwareImage<'_>,
        progress: &mut P,
    ) -> Result<FlashReport, FlashError> {
        info!("flashing {:?} half", side);
        self.suspend(side);
        self.links[side.index()].device_mut().keys.clear();

        let mut updater = FirmwareUpdater::new();
        let result = updater.flash(&mut self.links[side.index()], bus, image, progress);

        self.resume(side);
        result
    }

    /// Set the brightness both halves are dimmed to.
    pub fn set_brightness(&mut self, brightness: u8) {
        for link in &mut self.links {
            link.set_brightness(brightness);
            link.device_mut().leds.mark_all_dirty();
        }
    }

    pub fn brightness(&self) -> u8 {
        self.links[0].brightness()
    }

    pub fn keyscan_interval(&self) -> u8 {
        self.keyscan_interval
    }

    /// Store the interval and push it to both halves. Halves that are
    /// offline get it when they reconnect.
    pub fn set_keyscan_interval<B: Bus>(&mut self, bus: &mut B, interval: u8) -> Result<(), LinkError> {
        self.keyscan_interval = interval;
        let mut result = Ok(());
        for (link, _) in self.active_links() {
            if let Err(e) = link.set_keyscan_interval(bus, interval) {
                result = Err(e);
            }
        }
        result
    }

    pub fn set_sled_current<B: Bus>(&mut self, bus: &mut B, current: u8) -> Result<(), LinkError> {
        let mut result = Ok(());
        for (link, _) in self.active_links() {
            if let Err(e) = link.set_sled_current(bus, current) {
                result = Err(e);
            }
        }
        result
    }

    pub fn crc_errors(&self, side: Side) -> u16 {
        self.links[side.index()].crc_errors()
    }

    /// Firmware version of each half, `None` where it did not answer.
    pub fn versions<B: Bus>(&mut self, bus: &mut B) -> [Option<u8>; 2] {
        let mut versions = [None; 2];
        for (link, side) in self.active_links() {
            versions[side.index()] = link.read_version(bus).ok();
        }
        versions
    }
}

/// The ANSI PCBs route a few switches to different matrix positions
/// than the ISO ones.
fn apply_ansi_quirks(side: Side, rows: &mut [u8; HAND_ROWS]) {
    match side {
        Side::Left => {
            let row = rows[3];
            let swapped = (row & !0b11) | ((row & 0b01) << 1) | ((row & 0b10) >> 1);
            rows[3] = swapped;
        }
        Side::Right => {
            let a = rows[1] & 1;
            let b = rows[2] & 1;
            rows[1] = (rows[1] & !1) | b;
            rows[2] = (rows[2] & !1) | a;
        }
    }
}
