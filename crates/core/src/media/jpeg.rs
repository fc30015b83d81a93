//! JPEG container scanning.
//!
//! A baseline JPEG as produced by camera encoders is a sequence of marker
//! segments followed by entropy-coded scan data:
//!
//! ```text
//! FFD8                 SOI   start of image (no length)
//! FFE0 <len> ...       APP0  JFIF header
//! FFDB <len> ...       DQT   quantization table 0
//! FFDB <len> ...       DQT   quantization table 1
//! FFC0 <len> ...       SOF0  frame header (dimensions)
//! FFC4 <len> ...       DHT   huffman tables (repeated)
//! FFDA <len> ...       SOS   scan header
//! ...entropy data...         0xFF bytes are stuffed as FF 00
//! FFD9                 EOI   end of image
//! ```
//!
//! Segment lengths are big-endian and include the two length bytes. Every
//! read below is checked against the slice, since the buffer contents come
//! from outside the process.

use crate::error::{JpegErrorKind, Result, RtspError};

/// JPEG marker type bytes (the byte following `0xFF`).
pub mod markers {
    pub const SOI: u8 = 0xD8;
    pub const EOI: u8 = 0xD9;
    pub const SOS: u8 = 0xDA;
    pub const DQT: u8 = 0xDB;
    pub const DHT: u8 = 0xC4;
    pub const SOF0: u8 = 0xC0;
    pub const APP0: u8 = 0xE0;
}

/// Size of one 8-bit precision quantization table body.
pub const QUANT_TABLE_LEN: usize = 64;

/// Location of the scan data and the optional quantization tables of a JPEG.
#[derive(Debug, Clone, Copy)]
pub struct JpegScan<'a> {
    /// Offset of the first entropy-coded byte in the original buffer.
    pub scan_start: usize,
    /// Entropy-coded scan data, up to (not including) the EOI marker.
    pub scan: &'a [u8],
    /// Body of the first DQT segment, when present.
    pub quant0: Option<&'a [u8; QUANT_TABLE_LEN]>,
    /// Body of the second DQT segment, when present.
    pub quant1: Option<&'a [u8; QUANT_TABLE_LEN]>,
}

fn read_u16(buf: &[u8], pos: usize) -> Option<usize> {
    let bytes = buf.get(pos..pos + 2)?;
    Some(usize::from(u16::from_be_bytes([bytes[0], bytes[1]])))
}

/// Scan marker-by-marker for `marker`, starting at the head of `buf`.
///
/// Returns the position immediately after the requested marker's type byte;
/// the remaining length is `buf.len() - pos`. SOI carries no payload and is
/// stepped over; APP0, DQT, DHT, SOF0 and SOS are skipped using their
/// length field. Any other type byte is logged and scanning continues.
///
/// Returns `None` when a framing byte is not `0xFF` or the buffer runs out.
pub fn find_marker(buf: &[u8], marker: u8) -> Option<usize> {
    let mut pos = 0;

    while pos < buf.len() {
        let framing = buf[pos];
        if framing != 0xFF {
            tracing::warn!(
                pos,
                framing = format_args!("{:#04x}", framing),
                "malformed jpeg framing byte"
            );
            return None;
        }
        let typecode = *buf.get(pos + 1)?;
        pos += 2;

        if typecode == marker {
            return Some(pos);
        }

        match typecode {
            markers::SOI => {}
            markers::APP0 | markers::DQT | markers::DHT | markers::SOF0 | markers::SOS => {
                let Some(len) = read_u16(buf, pos) else {
                    tracing::debug!(pos, "segment length runs past end of buffer");
                    return None;
                };
                pos += len;
            }
            other => {
                tracing::warn!(
                    pos,
                    typecode = format_args!("{:#04x}", other),
                    "unexpected jpeg marker"
                );
            }
        }
    }

    tracing::debug!(marker = format_args!("{:#04x}", marker), "jpeg marker not found");
    None
}

/// Advance through byte-stuffed scan data to the next real marker.
///
/// Inside the scan a literal `0xFF` is always followed by `0x00`, so the
/// first `0xFF` followed by any other byte starts a marker. Returns the
/// position of that `0xFF`, or `None` if the buffer ends first.
pub fn skip_scan_bytes(buf: &[u8]) -> Option<usize> {
    let mut pos = 0;
    while pos + 1 < buf.len() {
        if buf[pos] == 0xFF {
            if buf[pos + 1] != 0x00 {
                return Some(pos);
            }
            pos += 2;
        } else {
            pos += 1;
        }
    }
    None
}

fn quant_table_at(buf: &[u8], segment: usize) -> Option<&[u8; QUANT_TABLE_LEN]> {
    // Two length bytes and the precision/table-id byte precede the body.
    let body = buf.get(segment + 3..segment + 3 + QUANT_TABLE_LEN)?;
    body.try_into().ok()
}

/// Locate the scan data and the (up to two) quantization tables of a JPEG.
///
/// Missing quantization tables are not an error; callers treat `quant0` and
/// `quant1` as optional. Fails when the buffer does not start like a JPEG,
/// has no SOS segment, or the scan data is not terminated by EOI.
pub fn decode_container(buf: &[u8]) -> Result<JpegScan<'_>> {
    let jpeg_err = |kind| RtspError::Jpeg { kind };

    find_marker(buf, markers::SOI).ok_or(jpeg_err(JpegErrorKind::MissingSoi))?;

    let mut quant0 = None;
    let mut quant1 = None;
    match find_marker(buf, markers::DQT) {
        Some(first) => {
            quant0 = quant_table_at(buf, first);
            let next = read_u16(buf, first).map(|len| first + len);
            match next.and_then(|next| {
                let rest = buf.get(next..)?;
                find_marker(rest, markers::DQT).map(|pos| next + pos)
            }) {
                Some(second) => quant1 = quant_table_at(buf, second),
                None => tracing::debug!("no second quantization table"),
            }
        }
        None => tracing::debug!("no quantization table"),
    }

    let sos = find_marker(buf, markers::SOS).ok_or(jpeg_err(JpegErrorKind::MissingSos))?;
    let sos_len = read_u16(buf, sos).ok_or(jpeg_err(JpegErrorKind::Truncated))?;
    let scan_start = sos + sos_len;
    let scan_data = buf
        .get(scan_start..)
        .ok_or(jpeg_err(JpegErrorKind::Truncated))?;

    let scan_len = skip_scan_bytes(scan_data).ok_or(jpeg_err(JpegErrorKind::MissingEoi))?;
    if scan_data.get(scan_len + 1) != Some(&markers::EOI) {
        return Err(jpeg_err(JpegErrorKind::MissingEoi));
    }

    tracing::trace!(scan_start, scan_len, has_quant = quant0.is_some(), "decoded jpeg container");

    Ok(JpegScan {
        scan_start,
        scan: &scan_data[..scan_len],
        quant0,
        quant1,
    })
}

/// Read `(width, height)` in pixels from the SOF0 frame header.
pub fn frame_dimensions(buf: &[u8]) -> Option<(u16, u16)> {
    let sof = find_marker(buf, markers::SOF0)?;
    // length (2), sample precision (1), height (2), width (2)
    let height = read_u16(buf, sof + 3)?;
    let width = read_u16(buf, sof + 5)?;
    Some((width as u16, height as u16))
}
