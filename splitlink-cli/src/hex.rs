use anyhow::{bail, Context, Result};

/// A run of contiguous bytes from an Intel HEX file.
#[derive(Debug, Clone)]
pub struct HexSegment {
    pub address: u32,
    pub data: Vec<u8>,
}

/// Parse an Intel HEX format string into address-data segments.
///
/// Supports record types:
/// - 00: Data
/// - 01: End of File
/// - 02: Extended Segment Address
/// - 03, 05: Start address (ignored, the bootloader jumps to its own vector)
/// - 04: Extended Linear Address
pub fn parse_hex(input: &str) -> Result<Vec<HexSegment>> {
    let mut segments: Vec<HexSegment> = Vec::new();
    let mut base_address: u32 = 0;

    for (line_num, line) in input.lines().enumerate() {
        let line_no = line_num + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(record) = line.strip_prefix(':') else {
            bail!("line {}: missing start code ':'", line_no);
        };

        let bytes =
            decode_hex_bytes(record).with_context(|| format!("line {}: invalid hex data", line_no))?;
        if bytes.len() < 5 {
            bail!("line {}: record too short", line_no);
        }

        let byte_count = bytes[0] as usize;
        if bytes.len() != 5 + byte_count {
            bail!(
                "line {}: expected {} data bytes, got {}",
                line_no,
                byte_count,
                bytes.len() - 5
            );
        }

        // Sum of all bytes including the checksum is 0 mod 256
        let checksum: u8 = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        if checksum != 0 {
            bail!("line {}: checksum mismatch", line_no);
        }

        let address = u16::from_be_bytes([bytes[1], bytes[2]]);
        let record_type = bytes[3];
        let data = &bytes[4..4 + byte_count];

        match record_type {
            0x00 => {
                let full_address = base_address + address as u32;

                if let Some(last) = segments.last_mut() {
                    if full_address == last.address + last.data.len() as u32 {
                        last.data.extend_from_slice(data);
                        continue;
                    }
                }

                segments.push(HexSegment {
                    address: full_address,
                    data: data.to_vec(),
                });
            }
            0x01 => break,
            0x02 | 0x04 => {
                if byte_count != 2 {
                    bail!("line {}: address record must be 2 bytes", line_no);
                }
                let value = u16::from_be_bytes([data[0], data[1]]) as u32;
                base_address = if record_type == 0x02 {
                    value << 4
                } else {
                    value << 16
                };
            }
            0x03 | 0x05 => {}
            other => {
                bail!("line {}: unsupported record type 0x{:02X}", line_no, other);
            }
        }
    }

    Ok(segments)
}

/// Flatten parsed segments into one contiguous image starting at the
/// lowest address. Gaps are filled with `blank`.
pub fn flatten_segments(segments: &[HexSegment], blank: u8) -> Result<(u32, Vec<u8>)> {
    let Some(min_addr) = segments.iter().map(|s| s.address).min() else {
        bail!("no data records in HEX file");
    };
    let max_addr = segments
        .iter()
        .map(|s| s.address + s.data.len() as u32)
        .max()
        .unwrap_or(min_addr);

    let mut image = vec![blank; (max_addr - min_addr) as usize];
    for seg in segments {
        let offset = (seg.address - min_addr) as usize;
        image[offset..offset + seg.data.len()].copy_from_slice(&seg.data);
    }

    Ok((min_addr, image))
}

fn decode_hex_bytes(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        bail!("odd number of hex characters");
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .with_context(|| format!("invalid hex at position {}", i))
        })
        .collect()
}
