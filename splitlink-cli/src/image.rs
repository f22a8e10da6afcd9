//! Loading firmware images from disk.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use splitlink::FirmwareImage;

use crate::hex;

/// A firmware image and the peripheral flash address it starts at.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub base: u16,
    pub data: Vec<u8>,
}

impl LoadedImage {
    pub fn firmware(&self) -> FirmwareImage<'_> {
        FirmwareImage::contiguous(&self.data, self.base)
    }
}

/// Read `path` as Intel HEX if it has a `.hex` extension, as raw binary
/// placed at `raw_base` otherwise.
pub fn load(path: &Path, raw_base: u16, blank: u8) -> Result<LoadedImage> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let is_hex = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("hex"));
    parse(&bytes, is_hex, raw_base, blank).with_context(|| format!("loading {}", path.display()))
}

pub fn parse(bytes: &[u8], is_hex: bool, raw_base: u16, blank: u8) -> Result<LoadedImage> {
    let (base, data) = if is_hex {
        let text = std::str::from_utf8(bytes).context("HEX file is not text")?;
        let segments = hex::parse_hex(text).context("parsing Intel HEX file")?;
        hex::flatten_segments(&segments, blank).context("flattening HEX segments")?
    } else {
        (raw_base as u32, bytes.to_vec())
    };

    if data.is_empty() {
        bail!("image is empty");
    }
    let end = base as usize + data.len();
    if end > 0x1_0000 {
        bail!(
            "image of {} bytes at 0x{:04X} does not fit the 64 KiB peripheral address space",
            data.len(),
            base
        );
    }

    Ok(LoadedImage {
        base: base as u16,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_binary_uses_given_base() {
        let image = parse(&[1, 2, 3, 4, 5], false, 0x80, 0xFF).unwrap();
        assert_eq!(image.base, 0x80);
        assert_eq!(image.data, vec![1, 2, 3, 4, 5]);
        assert_eq!(image.firmware().page_offset(1, 64), Some(0xC0));
    }

    #[test]
    fn hex_base_comes_from_records() {
        let hex = b":020000020100FB\n\
                    :10000000112233445566778899AABBCCDDEEFF00F8\n\
                    :00000001FF\n";
        let image = parse(hex, true, 0, 0xFF).unwrap();
        assert_eq!(image.base, 0x1000);
        assert_eq!(image.data.len(), 16);
    }

    #[test]
    fn oversized_images_are_rejected() {
        assert!(parse(&[0; 0x100], false, 0xFF80, 0xFF).is_err());
        assert!(parse(&[], false, 0, 0xFF).is_err());

        let linear = b":020000040001F9\n:02001000DEAD63\n:00000001FF\n";
        assert!(parse(linear, true, 0, 0xFF).is_err());
    }
}
