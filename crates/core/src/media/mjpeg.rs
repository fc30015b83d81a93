//! MJPEG RTP packetizer: RFC 2435.
//!
//! Each JPEG frame is cut into fragments of at most [`MAX_FRAGMENT_SIZE`]
//! bytes. Every fragment gets an 8-byte JPEG header carrying its byte offset
//! in the frame, so a receiver can reassemble frames without markers of its
//! own. Payload type 26 is static; SDP needs no `a=rtpmap` line.
//!
//! ## JPEG payload header (RFC 2435 §3.1)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Type-specific |              Fragment Offset                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Type     |       Q       |     Width     |     Height    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! When `Q >= 128` the first fragment also carries a quantization table
//! header (RFC 2435 §3.1.8) followed by the tables themselves.

use crate::error::{PacketizeErrorKind, Result, RtspError};
use crate::media::jpeg::QUANT_TABLE_LEN;
use crate::media::rtp::RtpPacket;

/// Largest JPEG fragment carried by one packet; keeps the datagram under a
/// typical 1500-byte MTU once headers are added.
pub const MAX_FRAGMENT_SIZE: usize = 1300;

/// Static RTP payload type for JPEG (RFC 3551 §6).
pub const JPEG_PAYLOAD_TYPE: u8 = 26;

/// RTP clock rate for JPEG video.
pub const JPEG_CLOCK_RATE: u32 = 90_000;

/// Process-wide synchronization source. Sessions stamp their own sequence
/// numbers and timestamps, so a single SSRC is shared by all of them.
pub const DEFAULT_SSRC: u32 = 0x13F9_7E67;

/// Largest width/height expressible in the 8-bit, 8-pixel-unit fields.
pub const MAX_DIMENSION: u16 = 2040;

const MAX_FRAME_LEN: usize = 1 << 24;
const TYPE_SPECIFIC: u8 = 0;
const JPEG_TYPE_BASELINE: u8 = 0;
const Q_TABLES_FOLLOW: u8 = 128;
const DEFAULT_QUALITY: u8 = 0x5e;

/// RTP/JPEG packetizer (RFC 2435).
///
/// Builds one packet at a time into an owned, reusable [`RtpPacket`]. The
/// caller must send the packet before the next
/// [`pack_fragment`](Self::pack_fragment) call overwrites it.
#[derive(Debug)]
pub struct JpegPacketizer {
    ssrc: u32,
    packet: RtpPacket,
}

impl JpegPacketizer {
    pub fn new() -> Self {
        Self::with_ssrc(DEFAULT_SSRC)
    }

    pub fn with_ssrc(ssrc: u32) -> Self {
        tracing::debug!(ssrc = format_args!("{:#010X}", ssrc), "JPEG packetizer created");
        Self {
            ssrc,
            packet: RtpPacket::new(),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// The most recently built packet.
    pub fn packet(&self) -> &RtpPacket {
        &self.packet
    }

    pub fn packet_mut(&mut self) -> &mut RtpPacket {
        &mut self.packet
    }

    /// Build the packet carrying `jpeg[offset..]`, up to [`MAX_FRAGMENT_SIZE`].
    ///
    /// Quantization tables are embedded only in the first fragment and only
    /// when both are supplied. Returns the offset of the next fragment, or
    /// `None` once the final fragment (marker bit set) has been built.
    pub fn pack_fragment(
        &mut self,
        jpeg: &[u8],
        offset: usize,
        quant0: Option<&[u8; QUANT_TABLE_LEN]>,
        quant1: Option<&[u8; QUANT_TABLE_LEN]>,
        width: u16,
        height: u16,
    ) -> Result<Option<usize>> {
        let err = |kind| RtspError::Packetize { kind };

        if jpeg.len() > MAX_FRAME_LEN {
            return Err(err(PacketizeErrorKind::FrameTooLarge));
        }
        if offset >= jpeg.len() {
            return Err(err(PacketizeErrorKind::OffsetOutOfRange));
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(err(PacketizeErrorKind::DimensionsTooLarge));
        }

        let fragment_len = MAX_FRAGMENT_SIZE.min(jpeg.len() - offset);
        let end = offset + fragment_len;
        let last = end == jpeg.len();
        let tables = match (quant0, quant1) {
            (Some(q0), Some(q1)) if offset == 0 => Some((q0, q1)),
            _ => None,
        };
        let q = if tables.is_some() {
            Q_TABLES_FOLLOW
        } else {
            DEFAULT_QUALITY
        };

        self.packet.begin(JPEG_PAYLOAD_TYPE, last, self.ssrc);

        let offset_be = (offset as u32).to_be_bytes();
        self.packet.extend(&[
            TYPE_SPECIFIC,
            offset_be[1],
            offset_be[2],
            offset_be[3],
            JPEG_TYPE_BASELINE,
            q,
            (width / 8) as u8,
            (height / 8) as u8,
        ]);

        if let Some((q0, q1)) = tables {
            let tables_len = (2 * QUANT_TABLE_LEN) as u16;
            // MBZ, precision (8-bit for both tables), length
            self.packet.extend(&[0, 0]);
            self.packet.extend(&tables_len.to_be_bytes());
            self.packet.extend(q0);
            self.packet.extend(q1);
        }

        self.packet.extend(&jpeg[offset..end]);
        self.packet.finish();

        tracing::trace!(offset, fragment_len, last, quant_tables = tables.is_some(), "packed JPEG fragment");

        Ok(if last { None } else { Some(end) })
    }
}

impl Default for JpegPacketizer {
    fn default() -> Self {
        Self::new()
    }
}
