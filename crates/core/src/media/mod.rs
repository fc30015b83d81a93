//! JPEG parsing and RTP packetization.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each captured JPEG frame is split into one or more RTP packets.
//! Every RTP packet carries a 12-byte fixed header ([`rtp::RtpPacket`])
//! containing:
//!
//! - **Sequence number** (16-bit, wrapping): for reordering and loss detection.
//! - **Timestamp** (32-bit): media clock, 90 kHz for video.
//! - **SSRC** (32-bit): identifies the sender.
//! - **Marker bit**: set on the last packet of a frame.
//!
//! ## Modules
//!
//! | Module | Purpose | RFC |
//! |--------|---------|-----|
//! | [`jpeg`] | Marker scanning, scan-data and DQT location | ITU T.81 |
//! | [`mjpeg`] | RTP/JPEG payload packetizer | [RFC 2435](https://tools.ietf.org/html/rfc2435) |
//! | [`rtp`] | Reusable packet buffer with interleave prefix | RFC 3550, RFC 2326 §10.12 |

pub mod jpeg;
pub mod mjpeg;
pub mod rtp;

pub use mjpeg::JpegPacketizer;
pub use rtp::RtpPacket;
