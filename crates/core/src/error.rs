//! Error types for the MJPEG RTSP server library.

use std::fmt;

/// Errors that can occur in the MJPEG RTSP server library.
///
/// Protocol problems (bad request lines, missing `CSeq`, wrong URL) are never
/// reported through this type: they are answered on the wire with a 4xx
/// status. The variants below cover the failures a caller can act on:
///
/// - **Transport**: [`Io`](Self::Io): socket/network failures.
/// - **Media**: [`Jpeg`](Self::Jpeg), [`Packetize`](Self::Packetize),
///   [`Capture`](Self::Capture).
/// - **Server**: [`AlreadyRunning`](Self::AlreadyRunning),
///   [`InvalidConfig`](Self::InvalidConfig).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// A [`ServerConfig`](crate::ServerConfig) field failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The JPEG container could not be decoded.
    #[error("JPEG decode error: {kind}")]
    Jpeg { kind: JpegErrorKind },

    /// A JPEG frame could not be split into RTP/JPEG packets (RFC 2435).
    #[error("RTP/JPEG packetization error: {kind}")]
    Packetize { kind: PacketizeErrorKind },

    /// The frame source failed to produce a frame.
    #[error("frame capture failed: {0}")]
    Capture(String),
}

/// Specific kind of JPEG container failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpegErrorKind {
    /// No start-of-image marker at the head of the buffer.
    MissingSoi,
    /// No start-of-scan marker could be located.
    MissingSos,
    /// The scan data is not followed by an end-of-image marker.
    MissingEoi,
    /// A segment header claims more bytes than the buffer holds.
    Truncated,
}

impl fmt::Display for JpegErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSoi => write!(f, "missing start-of-image marker"),
            Self::MissingSos => write!(f, "missing start-of-scan marker"),
            Self::MissingEoi => write!(f, "missing end-of-image marker"),
            Self::Truncated => write!(f, "truncated segment"),
        }
    }
}

/// Specific kind of packetization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketizeErrorKind {
    /// The fragment offset is at or past the end of the frame.
    OffsetOutOfRange,
    /// The frame does not fit the 24-bit fragment offset field.
    FrameTooLarge,
    /// Width or height exceeds 2040 pixels (8-bit field in 8-pixel units).
    DimensionsTooLarge,
}

impl fmt::Display for PacketizeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OffsetOutOfRange => write!(f, "fragment offset out of range"),
            Self::FrameTooLarge => write!(f, "frame exceeds 24-bit fragment offset"),
            Self::DimensionsTooLarge => write!(f, "image dimensions exceed 2040 pixels"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
