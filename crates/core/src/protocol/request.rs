use std::fmt;

/// Receive buffer capacity per session. Requests from the supported
/// clients are a few hundred bytes.
pub const RECV_BUFFER_SIZE: usize = 2048;

/// When new bytes arrive and fewer than this many bytes are left in the
/// buffer, the stale partial request is discarded first.
const RESET_HEADROOM: usize = 256;

/// Length of the overlap re-scanned when looking for the header terminator.
const TERMINATOR_OVERLAP: usize = 3;

/// RTSP methods understood by the server (RFC 2326 §10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Teardown,
}

impl Method {
    /// Request-line prefixes, matched case-sensitively and including the
    /// separating space.
    const PREFIXES: [(&'static [u8], Method); 5] = [
        (b"OPTIONS ", Method::Options),
        (b"DESCRIBE ", Method::Describe),
        (b"SETUP ", Method::Setup),
        (b"PLAY ", Method::Play),
        (b"TEARDOWN ", Method::Teardown),
    ];

    /// Identify the method from the start of a request line.
    pub fn from_request_line(line: &[u8]) -> Option<Self> {
        Self::PREFIXES
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix))
            .map(|(_, method)| *method)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Teardown => "TEARDOWN",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete RTSP request (RFC 2326 §6).
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. Lines without a
/// colon are ignored. The raw text is kept for the credential check, which
/// searches the whole header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: Method,
    /// Request-URI (e.g. `rtsp://host:554/mjpeg/1`); empty if absent.
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`); empty if absent.
    pub version: String,
    /// Headers as ordered (name, value) pairs.
    pub headers: Vec<(String, String)>,
    /// The request exactly as received, terminator included.
    pub raw: String,
}

impl RtspRequest {
    /// Split a framed request into request line and headers.
    pub fn parse(method: Method, raw: String) -> Self {
        let mut lines = raw.lines().skip_while(|line| line.is_empty());

        let mut parts = lines.next().unwrap_or_default().split_whitespace().skip(1);
        let uri = parts.next().unwrap_or_default().to_string();
        let version = parts.next().unwrap_or_default().to_string();

        if !version.is_empty() && version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let headers = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        RtspRequest {
            method,
            uri,
            version,
            headers,
            raw,
        }
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The CSeq number (RFC 2326 §12.17).
    ///
    /// `None` when the header is missing or its value does not start with
    /// a decimal digit.
    pub fn cseq(&self) -> Option<u32> {
        leading_number(self.get_header("CSeq")?)
    }

    /// Whether the client declared it accepts an SDP description.
    pub fn accepts_sdp(&self) -> bool {
        self.get_header("Accept")
            .is_some_and(|accept| accept.contains("application/sdp"))
    }

    /// Whether `needle` appears anywhere in the raw request text.
    pub fn contains(&self, needle: &str) -> bool {
        self.raw.contains(needle)
    }
}

/// Parse the run of decimal digits at the start of `value`.
pub(crate) fn leading_number<T: std::str::FromStr>(value: &str) -> Option<T> {
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    if end == 0 {
        return None;
    }
    value[..end].parse().ok()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Outcome of one [`RequestFramer::poll`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum RecvResult {
    /// The request is incomplete; wait for more bytes.
    Continue,
    /// The first line is not a supported RTSP request line, or the
    /// request overflows the receive buffer.
    BadRequest,
    /// A complete header block was received.
    FullRequest(RtspRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramingState {
    AwaitingMethodLine,
    MethodKnown(Method),
}

/// Incremental request framing over a byte stream.
///
/// Bytes arrive in arbitrary chunks. The framer first waits for a complete
/// request line to identify the method, then for the `\r\n\r\n` header
/// terminator. Bytes after the terminator are kept for the next request.
#[derive(Debug)]
pub struct RequestFramer {
    buf: Vec<u8>,
    state: FramingState,
    /// Bytes already searched for the terminator.
    scanned: usize,
}

impl RequestFramer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(RECV_BUFFER_SIZE),
            state: FramingState::AwaitingMethodLine,
            scanned: 0,
        }
    }

    /// Number of buffered, not yet consumed bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() >= RECV_BUFFER_SIZE
    }

    /// Drop any partial request and start over.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = FramingState::AwaitingMethodLine;
        self.scanned = 0;
    }

    /// Called once per tick before appending newly arrived bytes: a buffer
    /// that is nearly full holds a request that will never complete.
    pub fn prepare_for_data(&mut self) {
        if self.buf.len() >= RECV_BUFFER_SIZE - RESET_HEADROOM {
            tracing::debug!(buffered = self.buf.len(), "discarding stale partial request");
            self.reset();
        }
    }

    /// Append received bytes. Returns how many fit into the buffer.
    pub fn extend(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(RECV_BUFFER_SIZE - self.buf.len());
        self.buf.extend_from_slice(&data[..take]);
        take
    }

    /// Advance framing over the buffered bytes.
    pub fn poll(&mut self) -> RecvResult {
        if self.state == FramingState::AwaitingMethodLine {
            // An empty line ahead of the request line is allowed.
            let start = if self.buf.starts_with(b"\r\n") { 2 } else { 0 };
            let line = &self.buf[start..];

            if find(line, b"\r\n").is_none() {
                return self.continue_or_overflow();
            }

            match Method::from_request_line(line) {
                Some(method) => {
                    tracing::trace!(%method, "request line received");
                    self.state = FramingState::MethodKnown(method);
                }
                None => {
                    tracing::debug!(
                        line = %String::from_utf8_lossy(&line[..line.len().min(32)]),
                        "unrecognized request line"
                    );
                    self.reset();
                    return RecvResult::BadRequest;
                }
            }
        }

        let FramingState::MethodKnown(method) = self.state else {
            return RecvResult::Continue;
        };

        let from = self.scanned.saturating_sub(TERMINATOR_OVERLAP);
        match find(&self.buf[from..], b"\r\n\r\n") {
            Some(pos) => {
                let end = from + pos + 4;
                let raw = String::from_utf8_lossy(&self.buf[..end]).into_owned();
                self.buf.drain(..end);
                self.state = FramingState::AwaitingMethodLine;
                self.scanned = 0;
                RecvResult::FullRequest(RtspRequest::parse(method, raw))
            }
            None => {
                self.scanned = self.buf.len();
                self.continue_or_overflow()
            }
        }
    }

    fn continue_or_overflow(&mut self) -> RecvResult {
        if self.is_full() {
            tracing::warn!(buffered = self.buf.len(), "request exceeds receive buffer");
            self.reset();
            RecvResult::BadRequest
        } else {
            RecvResult::Continue
        }
    }
}

impl Default for RequestFramer {
    fn default() -> Self {
        Self::new()
    }
}
