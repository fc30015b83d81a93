use std::time::Duration;

use base64::prelude::{BASE64_STANDARD, Engine as _};

pub const DEFAULT_STREAM_SUFFIX: &str = "mjpeg/1";

/// SDP `s=` line used when none is configured.
pub const DEFAULT_SESSION_NAME: &str = "Stream";

/// Capture rate presets. Each preset maps to a fixed inter-frame interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameRate {
    Hz5,
    #[default]
    Hz10,
    Hz20,
}

impl FrameRate {
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            5 => Some(Self::Hz5),
            10 => Some(Self::Hz10),
            20 => Some(Self::Hz20),
            _ => None,
        }
    }

    pub fn hz(self) -> u32 {
        match self {
            Self::Hz5 => 5,
            Self::Hz10 => 10,
            Self::Hz20 => 20,
        }
    }

    /// Minimum time between two captured frames.
    pub fn frame_interval(self) -> Duration {
        match self {
            Self::Hz5 => Duration::from_millis(200),
            Self::Hz10 => Duration::from_millis(100),
            Self::Hz20 => Duration::from_millis(50),
        }
    }
}

/// Username/password pair for RTSP Basic authentication.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// The `base64(user:password)` token a client sends in
    /// `Authorization: Basic <token>`.
    pub fn basic_auth_token(&self) -> String {
        BASE64_STANDARD.encode(format!("{}:{}", self.username, self.password))
    }
}

/// What every session needs to know about the single stream being served.
///
/// Built once when the server starts. Owned by the multiplexer and lent to
/// sessions by shared reference on each tick, so sessions cannot modify it.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Path suffix clients must request (e.g. `mjpeg/1`).
    pub suffix: String,
    /// Advertised RTSP URL, used for `Content-Base` and `RTP-Info`.
    pub url: String,
    /// Advertised server IP, used in the SDP origin and SETUP `source=`.
    pub server_ip: String,
    /// Pre-encoded Basic-auth token; `None` disables authentication.
    pub auth_token: Option<String>,
    /// SDP session name (`s=`).
    pub session_name: String,
    pub width: u16,
    pub height: u16,
}

impl StreamInfo {
    pub fn new(suffix: &str, server_ip: &str, port: u16) -> Self {
        let suffix = suffix.trim_matches('/').to_string();
        Self {
            url: format!("rtsp://{}:{}/{}", server_ip, port, suffix),
            suffix,
            server_ip: server_ip.to_string(),
            auth_token: None,
            session_name: DEFAULT_SESSION_NAME.to_string(),
            width: 0,
            height: 0,
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn with_session_name(mut self, name: &str) -> Self {
        self.session_name = name.to_string();
        self
    }

    pub fn with_dimensions(mut self, width: u16, height: u16) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Whether `uri` addresses this stream (or one of its tracks).
    ///
    /// The host part is ignored: clients may reach the server under a
    /// different name than the advertised IP.
    pub fn matches_uri(&self, uri: &str) -> bool {
        let path = extract_stream_path(uri);
        match path.strip_prefix(self.suffix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Extract the stream path (without leading/trailing `/`) from an RTSP URI.
///
/// `rtsp://host:554/mjpeg/1`            → `mjpeg/1`
/// `rtsp://host:554/mjpeg/1/trackID=1`  → `mjpeg/1/trackID=1`
/// `rtsp://host:554`                    → ``
/// `/mjpeg/1`                           → `mjpeg/1`
pub fn extract_stream_path(uri: &str) -> &str {
    let path = if let Some(after) = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        match after.find('/') {
            Some(slash) => &after[slash..],
            None => "",
        }
    } else {
        uri
    };

    path.trim_matches('/')
}
