use std::net::IpAddr;

use crate::protocol::request::{Method, RtspRequest};
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp::{self, TRACK_ID};
use crate::session::SessionEvent;
use crate::session::transport::{MediaTransport, TransportHeader, UdpDelivery};
use crate::stream::StreamInfo;

/// Timeout hint advertised in the `Session` header (RFC 2326 §12.37).
/// Advertised only; idle sessions are not expired server-side.
pub const SESSION_TIMEOUT_SECS: u32 = 60;

/// Realm sent in the `WWW-Authenticate` challenge.
pub const AUTH_REALM: &str = "mjpeg-rtsp";

const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN";

/// Next RTP sequence number and timestamp of a session, reported in the
/// PLAY `RTP-Info` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtpPosition {
    pub sequence: u16,
    pub timestamp: u32,
}

/// A response plus the state-machine event it triggers, if any.
#[must_use]
pub struct Handled {
    pub response: RtspResponse,
    pub event: Option<SessionEvent>,
}

impl Handled {
    fn reply(response: RtspResponse) -> Self {
        Self {
            response,
            event: None,
        }
    }

    fn transition(response: RtspResponse, event: SessionEvent) -> Self {
        Self {
            response,
            event: Some(event),
        }
    }
}

/// Server-side RTP/RTCP port pair for a session slot: `base + 2*slot` and
/// the port after it. `None` if the pair does not fit in 16 bits.
pub fn server_ports(base: u16, slot: usize) -> Option<(u16, u16)> {
    let offset = u16::try_from(slot).ok()?.checked_mul(2)?;
    let rtp = base.checked_add(offset)?;
    Some((rtp, rtp.checked_add(1)?))
}

/// Handles RTSP method requests for a single client connection.
///
/// Holds the protocol state negotiated on that connection: the RTSP
/// session id and the media transport picked at SETUP.
#[derive(Debug)]
pub struct MethodHandler {
    slot: usize,
    peer_ip: IpAddr,
    rtp_port_base: u16,
    session_id: Option<u32>,
    media: Option<MediaTransport>,
}

impl MethodHandler {
    pub fn new(slot: usize, peer_ip: IpAddr, rtp_port_base: u16) -> Self {
        MethodHandler {
            slot,
            peer_ip,
            rtp_port_base,
            session_id: None,
            media: None,
        }
    }

    /// RTSP session id assigned by the last successful SETUP.
    pub fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    /// Delivery path negotiated by the last successful SETUP.
    pub fn media(&self) -> Option<&MediaTransport> {
        self.media.as_ref()
    }

    pub fn handle(
        &mut self,
        request: &RtspRequest,
        info: &StreamInfo,
        position: RtpPosition,
    ) -> Handled {
        if !info.matches_uri(&request.uri) {
            tracing::warn!(slot = self.slot, uri = %request.uri, method = %request.method, "request for unknown stream");
            let mut resp = RtspResponse::not_found();
            if let Some(cseq) = request.cseq() {
                resp = resp.with_cseq(cseq);
            }
            return Handled::reply(resp.with_date());
        }

        let Some(cseq) = request.cseq() else {
            tracing::warn!(slot = self.slot, method = %request.method, "missing or invalid CSeq");
            return Handled::reply(RtspResponse::bad_request());
        };

        match request.method {
            Method::Options => self.handle_options(cseq),
            Method::Describe => self.handle_describe(cseq, request, info),
            Method::Setup => self.handle_setup(cseq, request, info),
            Method::Play => self.handle_play(cseq, info, position),
            Method::Teardown => self.handle_teardown(cseq),
        }
    }

    fn handle_options(&self, cseq: u32) -> Handled {
        tracing::debug!(%cseq, "OPTIONS");
        Handled::reply(
            RtspResponse::ok()
                .with_cseq(cseq)
                .add_header("Public", PUBLIC_METHODS),
        )
    }

    fn handle_describe(&self, cseq: u32, request: &RtspRequest, info: &StreamInfo) -> Handled {
        tracing::debug!(%cseq, uri = %request.uri, "DESCRIBE");

        if !request.accepts_sdp() {
            tracing::warn!(%cseq, "DESCRIBE without Accept: application/sdp");
            return Handled::reply(RtspResponse::bad_request().with_cseq(cseq));
        }

        if let Some(token) = &info.auth_token
            && !request.contains(token)
        {
            tracing::info!(slot = self.slot, peer = %self.peer_ip, "DESCRIBE not authorized");
            return Handled::reply(
                RtspResponse::unauthorized()
                    .with_cseq(cseq)
                    .add_header(
                        "WWW-Authenticate",
                        &format!("Basic realm=\"{}\"", AUTH_REALM),
                    )
                    .with_date(),
            );
        }

        let body = sdp::generate_sdp(info, rand::random());
        Handled::reply(
            RtspResponse::ok()
                .with_cseq(cseq)
                .with_date()
                .add_header("Content-Base", &info.url)
                .add_header("Content-Type", "application/sdp")
                .with_body(body),
        )
    }

    fn handle_setup(&mut self, cseq: u32, request: &RtspRequest, info: &StreamInfo) -> Handled {
        let Some(transport_header) = request.get_header("Transport") else {
            tracing::warn!(%cseq, "SETUP missing Transport header");
            return Handled::reply(RtspResponse::bad_request().with_cseq(cseq));
        };

        let Some(requested) = TransportHeader::parse(transport_header) else {
            tracing::warn!(%cseq, transport_header, "SETUP invalid Transport header");
            return Handled::reply(RtspResponse::bad_request().with_cseq(cseq));
        };

        let Some((server_rtp_port, server_rtcp_port)) = server_ports(self.rtp_port_base, self.slot)
        else {
            tracing::error!(slot = self.slot, base = self.rtp_port_base, "server port pair out of range");
            return Handled::reply(RtspResponse::internal_error().with_cseq(cseq));
        };

        // The slot's UDP port is held by any previous UDP transport, so a
        // re-SETUP reuses that socket instead of binding a second one.
        let previous = self.media.take();
        let media = match requested {
            TransportHeader::Interleaved => MediaTransport::Interleaved,
            TransportHeader::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => match previous {
                Some(MediaTransport::Udp(udp)) => {
                    MediaTransport::Udp(udp.retarget(self.peer_ip, client_rtp_port, client_rtcp_port))
                }
                previous => match UdpDelivery::open(
                    self.peer_ip,
                    client_rtp_port,
                    client_rtcp_port,
                    server_rtp_port,
                    server_rtcp_port,
                ) {
                    Ok(udp) => MediaTransport::Udp(udp),
                    Err(e) => {
                        tracing::error!(error = %e, server_rtp_port, "failed to bind RTP socket");
                        if previous.is_some() {
                            tracing::warn!(slot = self.slot, "keeping previous delivery path");
                        }
                        self.media = previous;
                        return Handled::reply(RtspResponse::internal_error().with_cseq(cseq));
                    }
                },
            },
        };

        let session_id: u32 = rand::random();
        let transport_response = media.response_header(&info.server_ip);

        tracing::info!(
            slot = self.slot,
            session_id,
            peer = %self.peer_ip,
            interleaved = media.is_interleaved(),
            server_rtp_port,
            "session configured via SETUP"
        );

        self.session_id = Some(session_id);
        self.media = Some(media);

        Handled::reply(
            RtspResponse::ok()
                .with_cseq(cseq)
                .with_date()
                .add_header(
                    "Session",
                    &format!("{};timeout={}", session_id, SESSION_TIMEOUT_SECS),
                )
                .add_header("Transport", &transport_response),
        )
    }

    fn handle_play(&self, cseq: u32, info: &StreamInfo, position: RtpPosition) -> Handled {
        let (Some(session_id), Some(_)) = (self.session_id, &self.media) else {
            tracing::warn!(%cseq, slot = self.slot, "PLAY before SETUP");
            return Handled::reply(RtspResponse::bad_request().with_cseq(cseq));
        };

        tracing::info!(slot = self.slot, session_id, "session started playing");

        let rtp_info = format!(
            "url={}/{};seq={};rtptime={}",
            info.url, TRACK_ID, position.sequence, position.timestamp
        );
        Handled::transition(
            RtspResponse::ok()
                .with_cseq(cseq)
                .with_date()
                .add_header("Range", "npt=0.000-")
                .add_header(
                    "Session",
                    &format!("{};timeout={}", session_id, SESSION_TIMEOUT_SECS),
                )
                .add_header("RTP-Info", &rtp_info),
            SessionEvent::Play,
        )
    }

    fn handle_teardown(&self, cseq: u32) -> Handled {
        tracing::info!(slot = self.slot, session_id = ?self.session_id, "session terminated via TEARDOWN");
        Handled::transition(RtspResponse::ok().with_cseq(cseq), SessionEvent::Teardown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "rtsp://10.0.0.5:554/mjpeg/1";

    fn info() -> StreamInfo {
        StreamInfo::new("mjpeg/1", "10.0.0.5", 554).with_dimensions(640, 480)
    }

    fn handler(base: u16) -> MethodHandler {
        MethodHandler::new(0, "192.168.1.7".parse().unwrap(), base)
    }

    fn request(method: Method, text: &str) -> RtspRequest {
        RtspRequest::parse(method, text.to_string())
    }

    fn run(handler: &mut MethodHandler, method: Method, text: &str, info: &StreamInfo) -> Handled {
        handler.handle(&request(method, text), info, RtpPosition::default())
    }

    #[test]
    fn options_lists_methods() {
        let handled = run(
            &mut handler(57000),
            Method::Options,
            "OPTIONS rtsp://host/mjpeg/1 RTSP/1.0\r\nCSeq: 1\r\n\r\n",
            &info(),
        );
        let text = handled.response.serialize();
        assert!(text.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(text.contains("CSeq: 1\r\n"));
        assert!(text.contains("Public: OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN\r\n"));
        assert!(handled.event.is_none());
    }

    #[test]
    fn url_mismatch_is_404_for_every_method() {
        for (method, name) in [
            (Method::Options, "OPTIONS"),
            (Method::Describe, "DESCRIBE"),
            (Method::Play, "PLAY"),
            (Method::Teardown, "TEARDOWN"),
        ] {
            let text = format!("{} rtsp://10.0.0.5:554/other RTSP/1.0\r\nCSeq: 3\r\n\r\n", name);
            let handled = run(&mut handler(57000), method, &text, &info());
            assert_eq!(handled.response.status_code, 404, "{name}");
            assert!(handled.response.get_header("Date").is_some());
            assert!(handled.event.is_none(), "{name}");
        }
    }

    #[test]
    fn missing_cseq_is_400_without_transition() {
        let handled = run(
            &mut handler(57000),
            Method::Teardown,
            "TEARDOWN rtsp://h/mjpeg/1 RTSP/1.0\r\nSession: 1\r\n\r\n",
            &info(),
        );
        assert_eq!(handled.response.status_code, 400);
        assert!(handled.event.is_none());
    }

    #[test]
    fn describe_returns_sdp() {
        let handled = run(
            &mut handler(57000),
            Method::Describe,
            "DESCRIBE rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n",
            &info(),
        );
        let resp = &handled.response;
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.get_header("Content-Base"), Some(URL));
        assert_eq!(resp.get_header("Content-Type"), Some("application/sdp"));

        let body = resp.body.as_deref().unwrap();
        assert!(body.contains("m=video 0 RTP/AVP 26\r\n"));
        assert!(body.contains("a=x-dimensions: 640,480\r\n"));
        assert!(resp.serialize().contains(&format!("Content-Length: {}\r\n", body.len())));
    }

    #[test]
    fn describe_requires_accept_sdp() {
        let handled = run(
            &mut handler(57000),
            Method::Describe,
            "DESCRIBE rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 2\r\n\r\n",
            &info(),
        );
        assert_eq!(handled.response.status_code, 400);
    }

    #[test]
    fn describe_challenges_without_credential() {
        let info = info().with_auth_token(Some("YWRtaW46c2VjcmV0".to_string()));
        let mut h = handler(57000);

        let handled = run(
            &mut h,
            Method::Describe,
            "DESCRIBE rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n",
            &info,
        );
        let resp = &handled.response;
        assert_eq!(resp.status_code, 401);
        assert_eq!(
            resp.get_header("WWW-Authenticate"),
            Some("Basic realm=\"mjpeg-rtsp\"")
        );
        assert!(resp.get_header("Date").is_some());
        assert!(handled.event.is_none());

        let handled = run(
            &mut h,
            Method::Describe,
            "DESCRIBE rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 3\r\nAccept: application/sdp\r\nAuthorization: Basic YWRtaW46c2VjcmV0\r\n\r\n",
            &info,
        );
        assert_eq!(handled.response.status_code, 200);
    }

    #[test]
    fn setup_udp_echoes_ports() {
        let mut h = handler(57000);
        let handled = run(
            &mut h,
            Method::Setup,
            "SETUP rtsp://h/mjpeg/1/trackID=1 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n",
            &info(),
        );
        let resp = &handled.response;
        assert_eq!(resp.status_code, 200);

        let transport = resp.get_header("Transport").unwrap();
        assert!(transport.contains("client_port=5000-5001;server_port=57000-57001"));
        assert!(transport.contains("destination=192.168.1.7"));
        assert!(transport.contains("source=10.0.0.5"));

        let session = resp.get_header("Session").unwrap();
        let id = h.session_id().unwrap();
        assert_eq!(session, format!("{};timeout=60", id));
        assert!(matches!(h.media(), Some(MediaTransport::Udp(_))));
    }

    #[test]
    fn resetup_udp_reuses_socket() {
        let mut h = handler(57400);
        let setup = |port: u16| {
            format!(
                "SETUP rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP;unicast;client_port={}-{}\r\n\r\n",
                port,
                port + 1
            )
        };
        let first = run(&mut h, Method::Setup, &setup(5000), &info());
        assert_eq!(first.response.status_code, 200);

        let second = run(&mut h, Method::Setup, &setup(6000), &info());
        assert_eq!(second.response.status_code, 200);
        assert!(second
            .response
            .get_header("Transport")
            .unwrap()
            .contains("client_port=6000-6001;server_port=57400-57401"));
        match h.media() {
            Some(MediaTransport::Udp(udp)) => assert_eq!(udp.client_addr.port(), 6000),
            other => panic!("expected UDP transport, got {:?}", other),
        }
    }

    #[test]
    fn failed_udp_bind_keeps_previous_transport() {
        let mut h = handler(57450);
        let handled = run(
            &mut h,
            Method::Setup,
            "SETUP rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n",
            &info(),
        );
        assert_eq!(handled.response.status_code, 200);
        let session_id = h.session_id();

        let _occupied = std::net::UdpSocket::bind(("0.0.0.0", 57450)).unwrap();
        let handled = run(
            &mut h,
            Method::Setup,
            "SETUP rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 4\r\nTransport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n",
            &info(),
        );
        assert_eq!(handled.response.status_code, 500);
        assert!(h.media().is_some_and(MediaTransport::is_interleaved));
        assert_eq!(h.session_id(), session_id);
    }

    #[test]
    fn setup_interleaved_skips_udp() {
        let mut h = handler(57100);
        let handled = run(
            &mut h,
            Method::Setup,
            "SETUP rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n",
            &info(),
        );
        assert_eq!(handled.response.status_code, 200);
        assert_eq!(
            handled.response.get_header("Transport"),
            Some("RTP/AVP/TCP;unicast;interleaved=0-1")
        );
        assert!(h.media().is_some_and(MediaTransport::is_interleaved));
    }

    #[test]
    fn setup_malformed_transport_is_400() {
        let mut h = handler(57000);
        for transport in ["RTP/AVP;unicast", "RTP/AVP;unicast;client_port=x"] {
            let text = format!(
                "SETUP rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 3\r\nTransport: {}\r\n\r\n",
                transport
            );
            let handled = run(&mut h, Method::Setup, &text, &info());
            assert_eq!(handled.response.status_code, 400, "{transport}");
        }
        let handled = run(
            &mut h,
            Method::Setup,
            "SETUP rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 3\r\n\r\n",
            &info(),
        );
        assert_eq!(handled.response.status_code, 400);
        assert!(h.media().is_none());
    }

    #[test]
    fn play_requires_setup() {
        let handled = run(
            &mut handler(57000),
            Method::Play,
            "PLAY rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 4\r\n\r\n",
            &info(),
        );
        assert_eq!(handled.response.status_code, 400);
        assert!(handled.event.is_none());
    }

    #[test]
    fn play_reports_rtp_info() {
        let mut h = handler(57200);
        let _ = run(
            &mut h,
            Method::Setup,
            "SETUP rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP/TCP;interleaved=0-1\r\n\r\n",
            &info(),
        );
        let handled = h.handle(
            &request(Method::Play, "PLAY rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 4\r\n\r\n"),
            &info(),
            RtpPosition {
                sequence: 17,
                timestamp: 9000,
            },
        );
        let resp = &handled.response;
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.get_header("Range"), Some("npt=0.000-"));
        assert_eq!(
            resp.get_header("RTP-Info"),
            Some("url=rtsp://10.0.0.5:554/mjpeg/1/trackID=1;seq=17;rtptime=9000")
        );
        assert_eq!(
            resp.get_header("Session"),
            Some(format!("{};timeout=60", h.session_id().unwrap()).as_str())
        );
        assert_eq!(handled.event, Some(SessionEvent::Play));
    }

    #[test]
    fn teardown_closes() {
        let handled = run(
            &mut handler(57000),
            Method::Teardown,
            "TEARDOWN rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 5\r\n\r\n",
            &info(),
        );
        assert_eq!(handled.response.status_code, 200);
        assert_eq!(handled.event, Some(SessionEvent::Teardown));
    }

    #[test]
    fn server_ports_per_slot() {
        assert_eq!(server_ports(57000, 0), Some((57000, 57001)));
        assert_eq!(server_ports(57000, 2), Some((57004, 57005)));
        assert_eq!(server_ports(65534, 0), Some((65534, 65535)));
        assert_eq!(server_ports(65534, 1), None);
    }
}
