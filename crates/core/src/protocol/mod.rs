//! RTSP protocol implementation (RFC 2326).
//!
//! This module handles the text-based RTSP signaling protocol: framing
//! requests off a byte stream, building responses, routing methods, and
//! generating SDP.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://server/mjpeg/1 RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! Every request must name the served stream and carry a numeric `CSeq`;
//! otherwise it is answered with 404 or 400 before method dispatch.
//!
//! ## Supported methods
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery |
//! | DESCRIBE | §10.2 | Retrieve SDP session description (Basic auth) |
//! | SETUP | §10.4 | Negotiate transport (UDP ports or TCP interleaved) |
//! | PLAY | §10.5 | Start media delivery |
//! | TEARDOWN | §10.7 | Destroy session |

pub mod handler;
pub mod request;
pub mod response;
pub mod sdp;

pub use handler::MethodHandler;
pub use request::{Method, RequestFramer, RtspRequest};
pub use response::RtspResponse;
