//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the SDP body returned by DESCRIBE responses. The format:
//!
//! ```text
//! v=0                                   ← protocol version
//! o=- <sess-id> 1 IN IP4 <server-ip>    ← origin
//! s=<session-name>                      ← session name
//! t=0 0                                 ← timing (live, unbounded)
//! m=video 0 RTP/AVP 26                  ← static JPEG payload type
//! a=x-dimensions: <width>,<height>      ← frame size in pixels
//! a=x-control: trackID=1                ← track control URL
//! c=IN IP4 0.0.0.0                      ← connection address
//! ```
//!
//! Payload type 26 is statically assigned to JPEG/90000 (RFC 3551), so no
//! `a=rtpmap` line is needed.

use crate::media::mjpeg::JPEG_PAYLOAD_TYPE;
use crate::stream::StreamInfo;

/// Control attribute value of the single video track.
pub const TRACK_ID: &str = "trackID=1";

/// Generate the SDP session description for the stream.
///
/// `origin_id` is the `o=` session id; callers pass a fresh random value.
pub fn generate_sdp(info: &StreamInfo, origin_id: u32) -> String {
    let sdp = [
        "v=0".to_string(),
        format!("o=- {} 1 IN IP4 {}", origin_id, info.server_ip),
        format!("s={}", info.session_name),
        "t=0 0".to_string(),
        format!("m=video 0 RTP/AVP {}", JPEG_PAYLOAD_TYPE),
        format!("a=x-dimensions: {},{}", info.width, info.height),
        format!("a=x-control: {}", TRACK_ID),
        "c=IN IP4 0.0.0.0".to_string(),
    ];

    tracing::trace!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}
