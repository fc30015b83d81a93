use chrono::{DateTime, Utc};

/// An RTSP response (RFC 2326 §7).
///
/// Serializes to the standard text format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
/// `Content-Length` is computed automatically when a body is present.
#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Server identification string included in every RTSP response
/// per RFC 2326 §12.36.
pub const SERVER_AGENT: &str = "mjpeg-rtsp/0.1";

/// Format a `Date` header value, e.g. `Tue, Mar 05 2024 14:07:09 GMT`.
pub fn format_date(now: DateTime<Utc>) -> String {
    now.format("%a, %b %d %Y %H:%M:%S GMT").to_string()
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    /// 200 OK: success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 400 Bad Request: malformed or missing required header.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// 401 Unauthorized: DESCRIBE without the configured credential.
    pub fn unauthorized() -> Self {
        Self::new(401, "Unauthorized")
    }

    /// 404: the request URL does not name the served stream.
    pub fn not_found() -> Self {
        Self::new(404, "Stream Not Found")
    }

    /// 500: the server could not set up local resources (e.g. RTP port).
    pub fn internal_error() -> Self {
        Self::new(500, "Internal Server Error")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Add the `CSeq` header echoing the request's sequence number.
    pub fn with_cseq(self, cseq: u32) -> Self {
        self.add_header("CSeq", &cseq.to_string())
    }

    /// Add a `Date` header for the current time.
    pub fn with_date(self) -> Self {
        self.add_header("Date", &format_date(Utc::now()))
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of the first header named `name` (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Serialize to the RTSP text wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically
    /// (RFC 2326 §12.14).
    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }
}
