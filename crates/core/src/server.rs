use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::media::JpegPacketizer;
use crate::media::jpeg::decode_container;
use crate::session::RtspSession;
use crate::source::FrameSource;
use crate::stream::{Credentials, DEFAULT_SESSION_NAME, DEFAULT_STREAM_SUFFIX, FrameRate, StreamInfo};
use crate::transport::{Listener, TcpAcceptor};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP address the RTSP listener binds to.
    pub bind_addr: String,
    /// Stream path clients must request, e.g. `mjpeg/1`.
    pub suffix: String,
    pub frame_rate: FrameRate,
    /// Basic-auth credential required for DESCRIBE. `None` disables auth.
    pub credentials: Option<Credentials>,
    /// Maximum concurrent clients; further connections are closed on accept.
    pub max_clients: usize,
    /// First server-side RTP port. Slot `n` uses `base + 2n` and `base + 2n + 1`.
    pub rtp_port_base: u16,
    /// Host advertised in the RTSP URL and SDP.
    /// When `None`, the bind IP is used (or loopback for a wildcard bind).
    pub public_host: Option<String>,
    /// SDP session name (`s=`).
    pub session_name: String,
    /// Send the JPEG quantization tables in-band (RFC 2435 §3.1.8) instead
    /// of the whole JPEG file.
    pub embed_quant_tables: bool,
    /// Sleep between two ticks of the server loop.
    pub idle_sleep: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:554".to_string(),
            suffix: DEFAULT_STREAM_SUFFIX.to_string(),
            frame_rate: FrameRate::default(),
            credentials: None,
            max_clients: 3,
            rtp_port_base: 57000,
            public_host: None,
            session_name: DEFAULT_SESSION_NAME.to_string(),
            embed_quant_tables: false,
            idle_sleep: Duration::from_millis(5),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(RtspError::InvalidConfig(msg.to_string()));

        let suffix = self.suffix.trim_matches('/');
        if suffix.is_empty() || suffix.chars().any(char::is_whitespace) {
            return invalid("stream suffix must be non-empty and contain no whitespace");
        }
        if self.max_clients == 0 {
            return invalid("max_clients must be at least 1");
        }
        if let Some(creds) = &self.credentials
            && creds.username.contains(':')
        {
            return invalid("username must not contain ':'");
        }

        let last_port = self
            .max_clients
            .checked_mul(2)
            .and_then(|span| span.checked_add(usize::from(self.rtp_port_base)))
            .map(|end| end - 1);
        if !last_port.is_some_and(|port| port <= usize::from(u16::MAX)) {
            return invalid("rtp_port_base + 2 * max_clients exceeds the port range");
        }
        Ok(())
    }
}

/// Information about a connected viewer (client in the streaming state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub slot: usize,
    pub session_id: Option<u32>,
    pub client_addr: SocketAddr,
    pub interleaved: bool,
    pub packets_sent: u64,
}

enum Slot {
    Free,
    Occupied(RtspSession),
}

/// The server loop: a fixed arena of client slots, the shared stream
/// description, and the frame pipeline. Driven by [`tick`](Self::tick).
pub struct SessionMultiplexer {
    listener: Box<dyn Listener>,
    source: Box<dyn FrameSource>,
    slots: Vec<Slot>,
    info: StreamInfo,
    packetizer: JpegPacketizer,
    frame_interval: Duration,
    rtp_port_base: u16,
    embed_quant_tables: bool,
    last_frame: Option<Instant>,
    frames_sent: u64,
}

impl SessionMultiplexer {
    pub fn new(
        listener: Box<dyn Listener>,
        source: Box<dyn FrameSource>,
        info: StreamInfo,
        config: &ServerConfig,
    ) -> Self {
        Self {
            listener,
            source,
            slots: (0..config.max_clients).map(|_| Slot::Free).collect(),
            info,
            packetizer: JpegPacketizer::new(),
            frame_interval: config.frame_rate.frame_interval(),
            rtp_port_base: config.rtp_port_base,
            embed_quant_tables: config.embed_quant_tables,
            last_frame: None,
            frames_sent: 0,
        }
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Number of occupied slots.
    pub fn active_sessions(&self) -> usize {
        self.sessions().count()
    }

    pub fn viewers(&self) -> Vec<Viewer> {
        self.sessions()
            .filter(|session| session.is_streaming())
            .map(|session| Viewer {
                slot: session.slot(),
                session_id: session.session_id(),
                client_addr: session.peer_addr(),
                interleaved: session.is_interleaved(),
                packets_sent: session.packets_sent(),
            })
            .collect()
    }

    /// Give the frame source back, e.g. to restart the server.
    pub fn into_source(self) -> Box<dyn FrameSource> {
        self.source
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// One pass of the loop: accept, step every session, send a frame if
    /// one is due.
    pub fn tick_at(&mut self, now: Instant) {
        self.accept();
        self.step_sessions();

        if self.frame_due(now) && self.sessions().any(RtspSession::is_streaming) {
            let started = Instant::now();
            self.stream_frame(now);
            let spent = started.elapsed();
            if spent > self.frame_interval {
                tracing::warn!(
                    spent_ms = spent.as_millis() as u64,
                    interval_ms = self.frame_interval.as_millis() as u64,
                    "frame pacing overrun"
                );
            }
        }
    }

    fn sessions(&self) -> impl Iterator<Item = &RtspSession> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied(session) => Some(session),
            Slot::Free => None,
        })
    }

    fn accept(&mut self) {
        let mut conn = match self.listener.poll_accept() {
            Ok(Some(conn)) => conn,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                return;
            }
        };

        match self.slots.iter().position(|slot| matches!(slot, Slot::Free)) {
            Some(index) => {
                let session = RtspSession::new(index, conn, self.rtp_port_base, self.frame_interval);
                self.slots[index] = Slot::Occupied(session);
            }
            None => {
                tracing::warn!(peer = %conn.peer_addr(), max_clients = self.slots.len(), "no free slot, closing connection");
                conn.shutdown();
            }
        }
    }

    fn step_sessions(&mut self) {
        for slot in &mut self.slots {
            if let Slot::Occupied(session) = slot {
                session.step(&self.info);
                if session.is_terminal() {
                    *slot = Slot::Free;
                }
            }
        }
    }

    fn frame_due(&self, now: Instant) -> bool {
        match self.last_frame {
            None => true,
            // Clock went backwards.
            Some(last) => now
                .checked_duration_since(last)
                .is_none_or(|elapsed| elapsed >= self.frame_interval),
        }
    }

    fn stream_frame(&mut self, now: Instant) {
        self.last_frame = Some(now);

        let frame = match self.source.capture() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "no frame this tick");
                return;
            }
        };

        if (frame.width, frame.height) != (self.info.width, self.info.height) {
            tracing::info!(width = frame.width, height = frame.height, "frame dimensions changed");
            self.info.width = frame.width;
            self.info.height = frame.height;
        }

        let parts = if self.embed_quant_tables {
            decode_container(frame.data).map(|scan| (scan.scan, scan.quant0, scan.quant1))
        } else {
            Ok((frame.data, None, None))
        };
        let (payload, quant0, quant1) = match parts {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(error = %e, "skipping undecodable frame");
                self.source.release();
                return;
            }
        };

        let mut offset = 0;
        loop {
            let next = match self.packetizer.pack_fragment(
                payload,
                offset,
                quant0,
                quant1,
                frame.width,
                frame.height,
            ) {
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!(error = %e, offset, "frame skipped");
                    break;
                }
            };

            for slot in &mut self.slots {
                if let Slot::Occupied(session) = slot
                    && session.is_streaming()
                {
                    session.send_packet(self.packetizer.packet_mut(), now);
                }
            }

            match next {
                Some(next) => offset = next,
                None => {
                    self.frames_sent += 1;
                    break;
                }
            }
        }

        tracing::trace!(bytes = payload.len(), frame = self.frames_sent, "frame sent");
        self.source.release();
    }
}

/// Pick the host advertised in the stream URL and SDP.
fn advertised_host(config: &ServerConfig, local: SocketAddr) -> String {
    if let Some(host) = &config.public_host {
        return host.clone();
    }
    if !local.ip().is_unspecified() {
        return local.ip().to_string();
    }
    tracing::warn!("listening on a wildcard address; advertising 127.0.0.1 (set public_host)");
    "127.0.0.1".to_string()
}

/// MJPEG RTSP server handle.
///
/// Runs a [`SessionMultiplexer`] on a background thread between
/// [`start`](Self::start) and [`stop`](Self::stop).
pub struct Server {
    config: ServerConfig,
    source: Option<Box<dyn FrameSource>>,
    running: Arc<AtomicBool>,
    viewers: Arc<Mutex<Vec<Viewer>>>,
    local_addr: Option<SocketAddr>,
    url: Option<String>,
    worker: Option<JoinHandle<Box<dyn FrameSource>>>,
}

impl Server {
    pub fn new(config: ServerConfig, source: Box<dyn FrameSource>) -> Self {
        Self {
            config,
            source: Some(source),
            running: Arc::new(AtomicBool::new(false)),
            viewers: Arc::new(Mutex::new(Vec::new())),
            local_addr: None,
            url: None,
            worker: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }
        self.config.validate()?;
        let source = self.source.take().ok_or(RtspError::AlreadyRunning)?;

        let bound = TcpAcceptor::bind(&self.config.bind_addr).and_then(|acceptor| {
            let local_addr = acceptor.local_addr()?;
            Ok((acceptor, local_addr))
        });
        let (acceptor, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                self.source = Some(source);
                return Err(e.into());
            }
        };

        let host = advertised_host(&self.config, local_addr);
        let (width, height) = source.dimensions().unwrap_or((0, 0));
        let info = StreamInfo::new(&self.config.suffix, &host, local_addr.port())
            .with_auth_token(self.config.credentials.as_ref().map(Credentials::basic_auth_token))
            .with_session_name(&self.config.session_name)
            .with_dimensions(width, height);

        tracing::info!(
            addr = %local_addr,
            url = %info.url,
            fps = self.config.frame_rate.hz(),
            max_clients = self.config.max_clients,
            auth = info.auth_token.is_some(),
            "RTSP server listening"
        );

        self.local_addr = Some(local_addr);
        self.url = Some(info.url.clone());

        let mut mux = SessionMultiplexer::new(Box::new(acceptor), source, info, &self.config);
        let running = self.running.clone();
        let viewers = self.viewers.clone();
        let idle_sleep = self.config.idle_sleep;

        self.running.store(true, Ordering::SeqCst);
        self.worker = Some(thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                mux.tick();
                *viewers.lock() = mux.viewers();
                thread::sleep(idle_sleep);
            }
            viewers.lock().clear();
            mux.into_source()
        }));

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(source) => self.source = Some(source),
                Err(_) => tracing::error!("server thread panicked"),
            }
            tracing::info!("server stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Advertised stream URL, once started.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Clients currently receiving media, as of the last tick.
    pub fn viewers(&self) -> Vec<Viewer> {
        self.viewers.lock().clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
