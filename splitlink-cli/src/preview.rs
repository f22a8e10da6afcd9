//! Show the LED bank frames a half would receive for a solid color.

use anyhow::{bail, Context, Result};
use splitlink::{LedBankStreamer, PeripheralLink, PeripheralProfile, Rgb};

/// Parse `RRGGBB`, with or without a leading `#`.
pub fn parse_color(s: &str) -> Result<Rgb> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 {
        bail!("color must be six hex digits, got {:?}", s);
    }
    let value = u32::from_str_radix(hex, 16).with_context(|| format!("invalid color {:?}", s))?;
    let [_, r, g, b] = value.to_be_bytes();
    Ok(Rgb::new(r, g, b))
}

/// Wire frames for every bank of one half filled with `color`.
pub fn bank_frames(profile: PeripheralProfile, color: Rgb, brightness: u8) -> Vec<Vec<u8>> {
    let mut link = PeripheralLink::new(0, profile);
    link.set_brightness(brightness);
    link.device_mut().leds.fill(color);

    let mut streamer = LedBankStreamer::new();
    (0..link.device().leds.banks())
        .map(|bank| streamer.build_frame(&link, bank).to_vec())
        .collect()
}

pub fn format_frame(frame: &[u8]) -> String {
    frame
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colors() {
        assert_eq!(parse_color("#FF8000").unwrap(), Rgb::new(255, 128, 0));
        assert_eq!(parse_color("0a0b0c").unwrap(), Rgb::new(10, 11, 12));
        assert!(parse_color("FFF").is_err());
        assert!(parse_color("GG0000").is_err());
    }

    #[test]
    fn frames_cover_all_banks() {
        let frames = bank_frames(PeripheralProfile::RAISE, Rgb::new(234, 234, 80), 255);
        assert_eq!(frames.len(), 9);
        assert_eq!(frames[0][0], 0x80);
        assert_eq!(frames[8][0], 0x88);
        assert_eq!(frames[3].len(), 25);
        assert_eq!(&frames[3][1..4], &[174, 200, 10]);
    }

    #[test]
    fn brightness_dims_before_gamma() {
        let frames = bank_frames(PeripheralProfile::RAISE, Rgb::new(0, 255, 0), 234);
        assert_eq!(frames[0][2], 200);
    }

    #[test]
    fn frame_formatting() {
        assert_eq!(format_frame(&[0x80, 0x0A, 0xFF]), "80 0A FF");
    }
}
