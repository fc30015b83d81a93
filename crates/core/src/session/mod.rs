//! Per-client RTSP session (RFC 2326 §3).
//!
//! One [`RtspSession`] exists per accepted control connection. Each tick the
//! multiplexer calls [`RtspSession::step`], which reads whatever the client
//! sent, frames complete requests, and answers them. Media is pushed with
//! [`RtspSession::send_packet`].
//!
//! ## Session lifecycle
//!
//! ```text
//! accept          -> Uninit
//! PLAY            -> Streaming
//! TEARDOWN        -> Closed
//! connection lost -> Closed
//! garbage request -> Error
//! ```
//!
//! `Closed` and `Error` are terminal: the multiplexer frees the slot on the
//! next tick.

pub mod transport;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::media::RtpPacket;
use crate::media::mjpeg::JPEG_CLOCK_RATE;
use crate::protocol::handler::{MethodHandler, RtpPosition};
use crate::protocol::request::{RECV_BUFFER_SIZE, RecvResult, RequestFramer};
use crate::protocol::response::RtspResponse;
use crate::stream::StreamInfo;
use crate::transport::{Connection, ReadOutcome};

/// Bytes pulled from the connection per read call.
const READ_CHUNK: usize = 512;

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected; no PLAY yet.
    Uninit,
    /// Receiving media.
    Streaming,
    /// Delivery suspended. No supported method enters this state.
    Paused,
    /// Torn down by the client or the connection dropped.
    Closed,
    /// The client sent something that is not an RTSP request.
    Error,
}

/// Inputs to [`SessionState::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Play,
    Teardown,
    ConnectionLost,
    BadRequest,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }

    /// The single transition function. Terminal states absorb every event.
    pub fn next(self, event: SessionEvent) -> Self {
        if self.is_terminal() {
            return self;
        }
        match event {
            SessionEvent::Play => Self::Streaming,
            SessionEvent::Teardown | SessionEvent::ConnectionLost => Self::Closed,
            SessionEvent::BadRequest => Self::Error,
        }
    }
}

/// A single client: control connection, request framing, negotiated
/// transport, and the RTP sequence/timestamp counters for this client.
pub struct RtspSession {
    slot: usize,
    conn: Box<dyn Connection>,
    peer: SocketAddr,
    framer: RequestFramer,
    handler: MethodHandler,
    state: SessionState,
    frame_interval: Duration,
    sequence: u16,
    timestamp: u32,
    prev_frame: Option<Instant>,
    packets_sent: u64,
}

impl RtspSession {
    pub fn new(
        slot: usize,
        conn: Box<dyn Connection>,
        rtp_port_base: u16,
        frame_interval: Duration,
    ) -> Self {
        let peer = conn.peer_addr();
        tracing::info!(slot, %peer, "client connected");
        Self {
            slot,
            conn,
            peer,
            framer: RequestFramer::new(),
            handler: MethodHandler::new(slot, peer.ip(), rtp_port_base),
            state: SessionState::Uninit,
            frame_interval,
            sequence: 0,
            timestamp: 0,
            prev_frame: None,
            packets_sent: 0,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn session_id(&self) -> Option<u32> {
        self.handler.session_id()
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether RTP goes over the control connection.
    pub fn is_interleaved(&self) -> bool {
        self.handler.media().is_some_and(|m| m.is_interleaved())
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Sequence number and timestamp the next packet will carry.
    pub fn rtp_position(&self) -> RtpPosition {
        RtpPosition {
            sequence: self.sequence,
            timestamp: self.timestamp,
        }
    }

    /// Run one tick: flush queued output, read input, answer complete
    /// requests.
    pub fn step(&mut self, info: &StreamInfo) {
        if self.is_terminal() {
            return;
        }

        if let Err(e) = self.conn.flush_pending() {
            tracing::debug!(slot = self.slot, error = %e, "flush failed");
            self.apply(SessionEvent::ConnectionLost);
            return;
        }

        self.receive();

        while !self.is_terminal() && self.framer.buffered() > 0 {
            match self.framer.poll() {
                RecvResult::Continue => break,
                RecvResult::BadRequest => {
                    self.send_response(RtspResponse::bad_request());
                    self.apply(SessionEvent::BadRequest);
                }
                RecvResult::FullRequest(request) => {
                    tracing::debug!(slot = self.slot, method = %request.method, uri = %request.uri, "request");
                    let position = self.rtp_position();
                    let handled = self.handler.handle(&request, info, position);
                    self.send_response(handled.response);
                    if let Some(event) = handled.event {
                        self.apply(event);
                    }
                }
            }
        }
    }

    /// Stamp `packet` with this session's counters and deliver it.
    ///
    /// The sequence number advances on every packet. The timestamp advances
    /// after the last fragment of a frame, by the wall-clock time since this
    /// session's previous frame in 90 kHz units.
    pub fn send_packet(&mut self, packet: &mut RtpPacket, now: Instant) {
        let Some(media) = self.handler.media() else {
            return;
        };

        let interleaved = media.is_interleaved();

        packet.set_sequence_and_timestamp(self.sequence, self.timestamp);
        let delivered = media.deliver(self.conn.as_mut(), packet);
        match delivered {
            Ok(_) => self.packets_sent += 1,
            Err(e) if interleaved => {
                tracing::debug!(slot = self.slot, error = %e, "interleaved write failed");
                self.apply(SessionEvent::ConnectionLost);
            }
            Err(e) => {
                tracing::debug!(slot = self.slot, error = %e, "RTP datagram not sent");
            }
        }
        tracing::trace!(slot = self.slot, seq = self.sequence, ts = self.timestamp, len = packet.len(), "RTP packet");
        self.sequence = self.sequence.wrapping_add(1);

        if packet.is_last_fragment() {
            let elapsed = self
                .prev_frame
                .and_then(|prev| now.checked_duration_since(prev))
                .unwrap_or(self.frame_interval);
            // Truncation wraps modulo 2^32, like the timestamp itself.
            let ticks = (elapsed.as_millis() * u128::from(JPEG_CLOCK_RATE) / 1000) as u32;
            self.timestamp = self.timestamp.wrapping_add(ticks);
            self.prev_frame = Some(now);
        }
    }

    fn receive(&mut self) {
        let mut chunk = [0u8; READ_CHUNK];
        let mut prepared = false;

        while !self.framer.is_full() {
            let room = READ_CHUNK.min(RECV_BUFFER_SIZE - self.framer.buffered());
            match self.conn.poll_read(&mut chunk[..room]) {
                Ok(ReadOutcome::Data(n)) => {
                    if !prepared {
                        self.framer.prepare_for_data();
                        prepared = true;
                    }
                    self.framer.extend(&chunk[..n]);
                }
                Ok(ReadOutcome::Empty) => break,
                Ok(ReadOutcome::Closed) => {
                    self.apply(SessionEvent::ConnectionLost);
                    break;
                }
                Err(e) => {
                    tracing::debug!(slot = self.slot, error = %e, "read failed");
                    self.apply(SessionEvent::ConnectionLost);
                    break;
                }
            }
        }
    }

    fn send_response(&mut self, response: RtspResponse) {
        tracing::debug!(slot = self.slot, status = response.status_code, "response");
        if let Err(e) = self.conn.write(response.serialize().as_bytes()) {
            tracing::debug!(slot = self.slot, error = %e, "response write failed");
            self.apply(SessionEvent::ConnectionLost);
        }
    }

    fn apply(&mut self, event: SessionEvent) {
        let next = self.state.next(event);
        if next != self.state {
            tracing::debug!(slot = self.slot, old_state = ?self.state, new_state = ?next, ?event, "state transition");
            self.state = next;
        }
    }
}

impl Drop for RtspSession {
    fn drop(&mut self) {
        tracing::info!(slot = self.slot, peer = %self.peer, state = ?self.state, packets = self.packets_sent, "client disconnected");
        self.conn.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::JpegPacketizer;
    use crate::transport::testing::{MockConnection, MockHandle};

    const INTERVAL: Duration = Duration::from_millis(100);

    fn info() -> StreamInfo {
        StreamInfo::new("mjpeg/1", "127.0.0.1", 554).with_dimensions(320, 240)
    }

    fn session() -> (RtspSession, MockHandle) {
        let (conn, handle) = MockConnection::new();
        (RtspSession::new(0, Box::new(conn), 57300, INTERVAL), handle)
    }

    fn play_interleaved(session: &mut RtspSession, handle: &MockHandle) {
        handle.push("SETUP rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n");
        handle.push("PLAY rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 2\r\n\r\n");
        session.step(&info());
        handle.take_output();
        assert!(session.is_streaming());
    }

    /// Packs `jpeg` fragment by fragment and sends each one at `now`.
    fn send_frame(session: &mut RtspSession, packetizer: &mut JpegPacketizer, jpeg: &[u8], now: Instant) {
        let mut offset = 0;
        loop {
            let next = packetizer.pack_fragment(jpeg, offset, None, None, 320, 240).unwrap();
            session.send_packet(packetizer.packet_mut(), now);
            match next {
                Some(n) => offset = n,
                None => break,
            }
        }
    }

    #[test]
    fn transition_table() {
        use SessionEvent::*;
        use SessionState::*;

        assert_eq!(Uninit.next(Play), Streaming);
        assert_eq!(Uninit.next(Teardown), Closed);
        assert_eq!(Uninit.next(BadRequest), Error);
        assert_eq!(Streaming.next(ConnectionLost), Closed);
        assert_eq!(Paused.next(Play), Streaming);
        assert_eq!(Closed.next(Play), Closed);
        assert_eq!(Error.next(Teardown), Error);
        assert!(Closed.is_terminal() && Error.is_terminal());
        assert!(!Streaming.is_terminal());
    }

    #[test]
    fn answers_options() {
        let (mut session, handle) = session();
        handle.push("OPTIONS rtsp://host/mjpeg/1 RTSP/1.0\r\nCSeq: 1\r\n\r\n");
        session.step(&info());

        let out = handle.take_text();
        assert!(out.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(out.contains("CSeq: 1\r\n"));
        assert_eq!(session.state(), SessionState::Uninit);
    }

    #[test]
    fn request_split_across_ticks() {
        let (mut session, handle) = session();
        handle.push("OPTIONS rtsp://host/mjpeg/1 RTSP/1.0\r\nCS");
        session.step(&info());
        assert!(handle.take_output().is_empty());

        handle.push("eq: 7\r\n\r\n");
        session.step(&info());
        assert!(handle.take_text().contains("CSeq: 7\r\n"));
    }

    #[test]
    fn missing_cseq_keeps_state() {
        let (mut session, handle) = session();
        handle.push("PLAY rtsp://host/mjpeg/1 RTSP/1.0\r\nSession: 1\r\n\r\n");
        session.step(&info());

        assert!(handle.take_text().starts_with("RTSP/1.0 400 Bad Request\r\n"));
        assert_eq!(session.state(), SessionState::Uninit);
    }

    #[test]
    fn garbage_is_error() {
        let (mut session, handle) = session();
        handle.push("GET / HTTP/1.1\r\n\r\n");
        session.step(&info());

        assert!(handle.take_text().starts_with("RTSP/1.0 400 Bad Request\r\n"));
        assert_eq!(session.state(), SessionState::Error);
    }

    #[test]
    fn peer_close_is_closed() {
        let (mut session, handle) = session();
        handle.close();
        session.step(&info());
        assert_eq!(session.state(), SessionState::Closed);

        drop(session);
        assert!(handle.is_shut_down());
    }

    #[test]
    fn teardown_after_play() {
        let (mut session, handle) = session();
        play_interleaved(&mut session, &handle);

        handle.push("TEARDOWN rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 3\r\n\r\n");
        session.step(&info());
        assert!(handle.take_text().starts_with("RTSP/1.0 200 OK\r\n"));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn sequence_numbers_are_consecutive() {
        let (mut session, handle) = session();
        play_interleaved(&mut session, &handle);

        let mut packetizer = JpegPacketizer::new();
        let jpeg = vec![0x55u8; 3000];
        send_frame(&mut session, &mut packetizer, &jpeg, Instant::now());

        let seqs = interleaved_sequences(&handle.take_output());
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(session.rtp_position().sequence, 3);
        assert_eq!(session.packets_sent(), 3);
    }

    /// Splits `$`-framed output into the sequence numbers it carries.
    fn interleaved_sequences(out: &[u8]) -> Vec<u16> {
        let mut seqs = Vec::new();
        let mut rest = out;
        while !rest.is_empty() {
            assert_eq!(rest[0], b'$');
            let len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
            let rtp = &rest[4..4 + len];
            seqs.push(u16::from_be_bytes([rtp[2], rtp[3]]));
            rest = &rest[4 + len..];
        }
        seqs
    }

    #[test]
    fn sequence_numbers_wrap() {
        let (mut session, handle) = session();
        play_interleaved(&mut session, &handle);
        session.sequence = 65534;

        let mut packetizer = JpegPacketizer::new();
        send_frame(&mut session, &mut packetizer, &[0x55u8; 3000], Instant::now());

        assert_eq!(interleaved_sequences(&handle.take_output()), vec![65534, 65535, 0]);
        assert_eq!(session.rtp_position().sequence, 1);
    }

    #[test]
    fn udp_delivery_strips_prefix() {
        let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let (conn, handle) = MockConnection::new();
        let mut session = RtspSession::new(0, Box::new(conn), 57500, INTERVAL);
        handle.push(&format!(
            "SETUP rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port={}-{}\r\n\r\n",
            port,
            port + 1
        ));
        handle.push("PLAY rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 2\r\n\r\n");
        session.step(&info());
        assert!(handle.take_text().contains("server_port=57500-57501"));
        assert!(session.is_streaming());
        assert!(!session.is_interleaved());

        let mut packetizer = JpegPacketizer::new();
        send_frame(&mut session, &mut packetizer, &[0x55u8; 1500], Instant::now());
        assert!(handle.take_output().is_empty(), "nothing on the control connection");

        let mut buf = [0u8; 2048];
        let mut datagrams = Vec::new();
        for _ in 0..2 {
            let (n, from) = receiver.recv_from(&mut buf).unwrap();
            assert_eq!(from.port(), 57500);
            assert_eq!(buf[0], 0x80, "RTP version 2, no `$` prefix");
            datagrams.push((
                n,
                u16::from_be_bytes([buf[2], buf[3]]),
                buf[1] & 0x80 != 0,
            ));
        }
        assert_eq!(datagrams, vec![(1320, 0, false), (220, 1, true)]);
        assert_eq!(session.packets_sent(), 2);
    }

    #[test]
    fn timestamp_advances_per_frame() {
        let (mut session, handle) = session();
        play_interleaved(&mut session, &handle);

        let mut packetizer = JpegPacketizer::new();
        let jpeg = vec![0x55u8; 2000];
        let t0 = Instant::now();

        send_frame(&mut session, &mut packetizer, &jpeg, t0);
        // First frame uses the nominal interval: 100 ms at 90 kHz.
        assert_eq!(session.rtp_position().timestamp, 9000);

        send_frame(&mut session, &mut packetizer, &jpeg, t0 + Duration::from_millis(40));
        assert_eq!(session.rtp_position().timestamp, 9000 + 3600);

        // Clock went backwards: nominal interval again.
        send_frame(&mut session, &mut packetizer, &jpeg, t0);
        assert_eq!(session.rtp_position().timestamp, 9000 + 3600 + 9000);
        assert_eq!(session.rtp_position().sequence, 6);
    }

    #[test]
    fn interleaved_write_failure_closes() {
        let (mut session, handle) = session();
        play_interleaved(&mut session, &handle);

        handle.close();
        let mut packetizer = JpegPacketizer::new();
        send_frame(&mut session, &mut packetizer, &[0u8; 100], Instant::now());
        assert_eq!(session.state(), SessionState::Closed);
    }
}
