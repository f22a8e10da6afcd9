//! Page-based firmware updater for the peripheral bootloader.
//!
//! The sequence is: read the version and CRC the bootloader reports (a
//! device that cannot report one is not flashed), erase, write every page
//! as a page address followed by CRC-protected frames, read the CRC back
//! and compare it against the image, then jump to the new application.
//!
//! The first four image bytes are the reset vector, which the bootloader
//! keeps pointing at itself, so both CRCs skip them.

use core::fmt;

use log::{debug, trace, warn};

use crate::bus::Bus;
use crate::crc16;
use crate::error::FlashError;
use crate::link::PeripheralLink;
use crate::profile::FlasherProps;

/// Largest frame the updater can send.
pub const MAX_FRAME_SIZE: usize = 64;

/// Image bytes not covered by the CRC.
const RESET_VECTOR_LEN: usize = 4;

/// Where each page of an image lands in the peripheral's flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOffsets<'a> {
    /// Pages follow each other starting at `base`.
    Contiguous { base: u16 },
    /// One offset per page.
    Explicit(&'a [u16]),
}

/// A firmware image and the flash offsets of its pages.
#[derive(Debug, Clone, Copy)]
pub struct FirmwareImage<'a> {
    data: &'a [u8],
    offsets: PageOffsets<'a>,
}

impl<'a> FirmwareImage<'a> {
    pub fn contiguous(data: &'a [u8], base: u16) -> Self {
        Self {
            data,
            offsets: PageOffsets::Contiguous { base },
        }
    }

    pub fn with_offsets(data: &'a [u8], offsets: &'a [u16]) -> Self {
        Self {
            data,
            offsets: PageOffsets::Explicit(offsets),
        }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn page_count(&self, page_size: u16) -> usize {
        if page_size == 0 {
            return 0;
        }
        self.data.len().div_ceil(page_size as usize)
    }

    /// Flash offset of `page`, if the image defines one that fits 16 bits.
    pub fn page_offset(&self, page: usize, page_size: u16) -> Option<u16> {
        match self.offsets {
            PageOffsets::Contiguous { base } => {
                let offset = base as usize + page * page_size as usize;
                u16::try_from(offset).ok()
            }
            PageOffsets::Explicit(offsets) => offsets.get(page).copied(),
        }
    }

    /// CRC16 the bootloader should report once the image is written.
    pub fn expected_crc(&self) -> u16 {
        crc16::checksum(self.data.get(RESET_VECTOR_LEN..).unwrap_or(&[]))
    }

    /// Check that the image can be written with `props`.
    pub fn validate(&self, props: &FlasherProps) -> Result<(), FlashError> {
        let page_size = props.page_size as usize;
        let frame_size = props.frame_size as usize;
        if page_size == 0
            || frame_size == 0
            || frame_size > MAX_FRAME_SIZE
            || page_size % frame_size != 0
        {
            return Err(FlashError::InvalidImage);
        }

        if self.data.len() <= RESET_VECTOR_LEN {
            return Err(FlashError::InvalidImage);
        }
        if u16::try_from(self.data.len() - RESET_VECTOR_LEN).is_err() {
            return Err(FlashError::InvalidImage);
        }

        let pages = self.page_count(props.page_size);
        let mut last_offset = 0;
        for page in 0..pages {
            last_offset = self
                .page_offset(page, props.page_size)
                .ok_or(FlashError::InvalidImage)?;
        }
        // The last page must also end inside the 16-bit address space
        if last_offset as usize + page_size > 0x1_0000 {
            return Err(FlashError::InvalidImage);
        }
        self.crc_offset().ok_or(FlashError::InvalidImage)?;
        Ok(())
    }

    fn crc_offset(&self) -> Option<u16> {
        self.page_offset(0, 0)?.checked_add(RESET_VECTOR_LEN as u16)
    }

    fn crc_length(&self) -> u16 {
        (self.data.len() - RESET_VECTOR_LEN) as u16
    }
}

/// Where a firmware update currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashPhase {
    Idle,
    Verifying,
    Erasing,
    Writing,
    ReVerifying,
    Done,
    Failed,
}

impl fmt::Display for FlashPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Verifying => write!(f, "Reading bootloader version and CRC"),
            Self::Erasing => write!(f, "Erasing application"),
            Self::Writing => write!(f, "Writing pages"),
            Self::ReVerifying => write!(f, "Verifying written image"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress callback; implement for a CLI progress bar or tests.
pub trait FlashProgress {
    fn on_phase(&mut self, _phase: FlashPhase) {}
    /// `written` of `total` pages are on the device.
    fn on_page(&mut self, _written: usize, _total: usize) {}
}

impl FlashProgress for () {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashReport {
    /// Application version the bootloader reported before erasing.
    pub previous_version: u8,
    pub previous_crc: u16,
    pub crc: u16,
    pub pages: usize,
    pub bytes: usize,
}

pub struct FirmwareUpdater {
    phase: FlashPhase,
}

impl Default for FirmwareUpdater {
    fn default() -> Self {
        Self::new()
    }
}

impl FirmwareUpdater {
    pub fn new() -> Self {
        Self {
            phase: FlashPhase::Idle,
        }
    }

    pub fn phase(&self) -> FlashPhase {
        self.phase
    }

    /// Write `image` to the half behind `link`, which must already be in
    /// its bootloader. The link's availability is left for re-probing
    /// since the half restarts whatever the outcome.
    pub fn flash<B: Bus, P: FlashProgress>(
        &mut self,
        link: &mut PeripheralLink,
        bus: &mut B,
        image: &FirmwareImage<'_>,
        progress: &mut P,
    ) -> Result<FlashReport, FlashError> {
        let props = link.profile().flasher;
        let address = link.bootloader_address();

        let result = image
            .validate(&props)
            .and_then(|()| self.run(link, bus, address, &props, image, progress));

        link.mark_unavailable();
        match result {
            Ok(report) => {
                self.enter(FlashPhase::Done, progress);
                Ok(report)
            }
            Err(e) => {
                warn!("flashing 0x{:02X} failed in {:?}: {}", address, self.phase, e);
                self.enter(FlashPhase::Failed, progress);
                Err(e)
            }
        }
    }

    fn enter<P: FlashProgress>(&mut self, phase: FlashPhase, progress: &mut P) {
        debug!("flash phase: {}", phase);
        self.phase = phase;
        progress.on_phase(phase);
    }

    fn run<B: Bus, P: FlashProgress>(
        &mut self,
        link: &mut PeripheralLink,
        bus: &mut B,
        address: u8,
        props: &FlasherProps,
        image: &FirmwareImage<'_>,
        progress: &mut P,
    ) -> Result<FlashReport, FlashError> {
        self.enter(FlashPhase::Verifying, progress);
        // Throw-away read to settle the bootloader's reply buffer
        let mut scratch = [0u8; 3];
        bus.read(address, &mut scratch);

        let (previous_version, previous_crc) =
            read_version_and_crc(bus, address, props, image).ok_or(FlashError::VerifyBeforeFailed)?;
        if previous_version == 0xFF || previous_crc == 0xFFFF {
            return Err(FlashError::VerifyBeforeFailed);
        }
        debug!(
            "bootloader 0x{:02X}: version {}, crc 0x{:04X}",
            address, previous_version, previous_crc
        );

        self.enter(FlashPhase::Erasing, progress);
        let status = bus.write(address, &[props.commands.erase_program]);
        bus.delay_ms(props.erase_delay_ms);
        if !status.is_complete() {
            return Err(FlashError::EraseFailed);
        }

        self.enter(FlashPhase::Writing, progress);
        let pages = image.page_count(props.page_size);
        for page in 0..pages {
            write_page(bus, address, props, image, page)?;
            progress.on_page(page + 1, pages);
        }

        self.enter(FlashPhase::ReVerifying, progress);
        let expected = image.expected_crc();
        let mut actual = None;
        for _ in 0..props.reverify_attempts {
            if let Some((_, crc)) = read_version_and_crc(bus, address, props, image) {
                actual = Some(crc);
                break;
            }
            bus.delay_ms(props.reverify_delay_ms);
        }
        let actual = actual.ok_or(FlashError::VerifyAfterTimeout)?;
        if actual != expected {
            link.record_crc_error();
            return Err(FlashError::VerifyAfterMismatch { expected, actual });
        }

        let status = bus.write(address, &[props.commands.execute, 0x00]);
        if !status.is_complete() {
            return Err(FlashError::ExecuteFailed);
        }

        Ok(FlashReport {
            previous_version,
            previous_crc,
            crc: actual,
            pages,
            bytes: image.len(),
        })
    }
}

/// Ask the bootloader for its version and the CRC of the image range.
fn read_version_and_crc<B: Bus>(
    bus: &mut B,
    address: u8,
    props: &FlasherProps,
    image: &FirmwareImage<'_>,
) -> Option<(u8, u16)> {
    let [off_lo, off_hi] = image.crc_offset()?.to_le_bytes();
    let [len_lo, len_hi] = image.crc_length().to_le_bytes();
    let request = [props.commands.get_version_and_crc, off_lo, off_hi, len_lo, len_hi];
    if !bus.write_no_stop(address, &request).is_complete() {
        return None;
    }

    bus.delay_ms(props.crc_settle_ms);

    let mut rx = [0u8; 3];
    if bus.read(address, &mut rx) < rx.len() {
        return None;
    }
    Some((rx[0], u16::from_le_bytes([rx[1], rx[2]])))
}

fn write_page<B: Bus>(
    bus: &mut B,
    address: u8,
    props: &FlasherProps,
    image: &FirmwareImage<'_>,
    page: usize,
) -> Result<(), FlashError> {
    let offset = image
        .page_offset(page, props.page_size)
        .ok_or(FlashError::InvalidImage)?;
    let [lo, hi] = offset.to_le_bytes();

    let status = bus.write(address, &[props.commands.page_address, lo, hi]);
    bus.delay_ms(props.delay_ms);
    if !status.is_complete() {
        return Err(FlashError::PageWriteFailed { offset });
    }

    let data = image.data();
    let page_start = page * props.page_size as usize;
    let frame_size = props.frame_size as usize;
    let mut frame = [0u8; MAX_FRAME_SIZE + 4];

    for f in 0..props.frames_per_page() {
        let start = page_start + f * frame_size;
        frame[0] = props.commands.continue_page;
        for (j, slot) in frame[1..=frame_size].iter_mut().enumerate() {
            *slot = data.get(start + j).copied().unwrap_or(props.blank);
        }
        let crc = crc16::checksum(&frame[1..=frame_size]);
        let [crc_lo, crc_hi] = crc.to_le_bytes();
        frame[frame_size + 1] = crc_lo;
        frame[frame_size + 2] = crc_hi;
        // Dummy byte; the bootloader NACKs it once the frame checks out
        frame[frame_size + 3] = 0x00;

        let status = bus.write(address, &frame[..frame_size + 4]);
        trace!(
            "page 0x{:04X} frame {}: crc 0x{:04X}, status {}",
            offset,
            f,
            crc,
            status.code()
        );
        if status.code() != props.frame_ack {
            return Err(FlashError::PageWriteFailed { offset });
        }
        bus.delay_ms(props.delay_ms);
    }
    Ok(())
}
