/// Length of the RTSP interleaved framing prefix (RFC 2326 §10.12).
pub const INTERLEAVE_PREFIX_LEN: usize = 4;

/// Length of the RTP fixed header without CSRCs (RFC 3550 §5.1).
pub const RTP_HEADER_LEN: usize = 12;

/// Capacity reserved for one packet: prefix, headers, two quant tables and
/// a maximum-size fragment all fit.
pub const RTP_PACKET_CAPACITY: usize = 1536;

const SEQUENCE_AT: usize = INTERLEAVE_PREFIX_LEN + 2;
const TIMESTAMP_AT: usize = INTERLEAVE_PREFIX_LEN + 4;
const SSRC_AT: usize = INTERLEAVE_PREFIX_LEN + 8;

/// A reusable RTP packet buffer, laid out for both delivery paths.
///
/// ```text
/// +------+---------+-------------------+
/// | '$'  | channel |   length (BE16)   |   interleave prefix (TCP only)
/// +------+---------+-------------------+
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                   payload (codec header + data)               |
/// ```
///
/// The payload is written once per fragment and shared by every viewer;
/// sequence number and timestamp are per-session and get stamped with
/// [`set_sequence_and_timestamp`](Self::set_sequence_and_timestamp) right
/// before each send.
///
/// Version is always 2. Padding, extension, and CSRC count are always 0.
#[derive(Debug)]
pub struct RtpPacket {
    buf: Vec<u8>,
    last_fragment: bool,
}

impl RtpPacket {
    /// An empty packet: prefix and a zeroed RTP header, no payload.
    pub fn new() -> Self {
        let mut packet = Self {
            buf: Vec::with_capacity(RTP_PACKET_CAPACITY),
            last_fragment: false,
        };
        packet.begin(0, false, 0);
        packet.finish();
        packet
    }

    /// Reset the buffer and write the prefix placeholder and RTP header.
    ///
    /// The `marker` bit (RFC 3550 §5.1) flags the last packet of a frame.
    pub(crate) fn begin(&mut self, payload_type: u8, marker: bool, ssrc: u32) {
        self.buf.clear();
        self.buf.extend_from_slice(&[b'$', 0, 0, 0]);
        self.buf.push(2 << 6);
        self.buf.push(((marker as u8) << 7) | (payload_type & 0x7f));
        self.buf.extend_from_slice(&[0; 6]);
        self.buf.extend_from_slice(&ssrc.to_be_bytes());
        self.last_fragment = marker;
    }

    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write the interleave length once the payload is complete.
    pub(crate) fn finish(&mut self) {
        let len = self.len() as u16;
        self.buf[2..4].copy_from_slice(&len.to_be_bytes());
    }

    /// Stamp the session-specific sequence number and 90 kHz timestamp.
    pub fn set_sequence_and_timestamp(&mut self, sequence: u16, timestamp: u32) {
        self.buf[SEQUENCE_AT..SEQUENCE_AT + 2].copy_from_slice(&sequence.to_be_bytes());
        self.buf[TIMESTAMP_AT..TIMESTAMP_AT + 4].copy_from_slice(&timestamp.to_be_bytes());
    }

    /// Full buffer including the `$` framing prefix, for interleaved TCP.
    pub fn interleaved(&self) -> &[u8] {
        &self.buf
    }

    /// RTP header and payload without the framing prefix, for UDP.
    pub fn rtp(&self) -> &[u8] {
        self.buf.get(INTERLEAVE_PREFIX_LEN..).unwrap_or_default()
    }

    /// Bytes after the RTP fixed header.
    pub fn payload(&self) -> &[u8] {
        self.buf
            .get(INTERLEAVE_PREFIX_LEN + RTP_HEADER_LEN..)
            .unwrap_or_default()
    }

    /// Size of the RTP packet (header + payload), excluding the prefix.
    pub fn len(&self) -> usize {
        self.buf.len().saturating_sub(INTERLEAVE_PREFIX_LEN)
    }

    /// True when no payload has been written after the header.
    pub fn is_empty(&self) -> bool {
        self.payload().is_empty()
    }

    /// Whether this packet carries the final fragment of its frame.
    pub fn is_last_fragment(&self) -> bool {
        self.last_fragment
    }

    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.buf[SEQUENCE_AT], self.buf[SEQUENCE_AT + 1]])
    }

    pub fn timestamp(&self) -> u32 {
        let b = &self.buf[TIMESTAMP_AT..TIMESTAMP_AT + 4];
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn ssrc(&self) -> u32 {
        let b = &self.buf[SSRC_AT..SSRC_AT + 4];
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }
}

impl Default for RtpPacket {
    fn default() -> Self {
        Self::new()
    }
}
