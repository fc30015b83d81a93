use std::net::{IpAddr, SocketAddr};

use crate::error::Result;
use crate::media::RtpPacket;
use crate::protocol::request::leading_number;
use crate::transport::{Connection, RtpSocket};

/// Parsed client-side transport request from the RTSP `Transport` header
/// (RFC 2326 §12.39).
///
/// ## Wire format examples
///
/// ```text
/// Transport: RTP/AVP;unicast;client_port=8000-8001
/// Transport: RTP/AVP/TCP;unicast;interleaved=0-1
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportHeader {
    /// RTP carried on the RTSP connection with `$` framing (§10.12).
    Interleaved,
    /// RTP to a client UDP port; RTCP is the next port up.
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
    },
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// ```
    /// use mjpeg_rtsp::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th, TransportHeader::Udp { client_rtp_port: 8000, client_rtcp_port: 8001 });
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        if header.contains("RTP/AVP/TCP") || header.contains("interleaved=") {
            return Some(Self::Interleaved);
        }

        for part in header.split(';') {
            if let Some(ports) = part.trim().strip_prefix("client_port=") {
                let client_rtp_port: u16 = leading_number(ports)?;
                let client_rtcp_port = client_rtp_port.checked_add(1)?;
                return Some(Self::Udp {
                    client_rtp_port,
                    client_rtcp_port,
                });
            }
        }
        None
    }
}

/// Server-side UDP delivery state negotiated during SETUP.
#[derive(Debug)]
pub struct UdpDelivery {
    socket: RtpSocket,
    /// Full socket address for RTP delivery (`client_ip:client_rtp_port`).
    pub client_addr: SocketAddr,
    pub client_rtcp_port: u16,
    pub server_rtp_port: u16,
    pub server_rtcp_port: u16,
}

impl UdpDelivery {
    /// Bind the server RTP port and target the client's RTP port.
    pub fn open(
        client_ip: IpAddr,
        client_rtp_port: u16,
        client_rtcp_port: u16,
        server_rtp_port: u16,
        server_rtcp_port: u16,
    ) -> Result<Self> {
        let socket = RtpSocket::bind(server_rtp_port)?;
        Ok(Self {
            socket,
            client_addr: SocketAddr::new(client_ip, client_rtp_port),
            client_rtcp_port,
            server_rtp_port,
            server_rtcp_port,
        })
    }

    /// Aim an already bound socket at new client ports. Used on re-SETUP,
    /// where the slot's server port is still held by this socket.
    pub fn retarget(self, client_ip: IpAddr, client_rtp_port: u16, client_rtcp_port: u16) -> Self {
        Self {
            client_addr: SocketAddr::new(client_ip, client_rtp_port),
            client_rtcp_port,
            ..self
        }
    }
}

/// How a session's RTP packets reach the client. Chosen at SETUP and fixed
/// until the next SETUP.
#[derive(Debug)]
pub enum MediaTransport {
    /// `$`-framed packets written on the RTSP control connection.
    Interleaved,
    /// One datagram per packet, framing prefix stripped.
    Udp(UdpDelivery),
}

impl MediaTransport {
    pub fn is_interleaved(&self) -> bool {
        matches!(self, Self::Interleaved)
    }

    /// Send one packet to the client.
    pub fn deliver(&self, control: &mut dyn Connection, packet: &RtpPacket) -> Result<usize> {
        match self {
            Self::Interleaved => Ok(control.write(packet.interleaved())?),
            Self::Udp(udp) => udp.socket.send_to(packet.rtp(), udp.client_addr),
        }
    }

    /// Value of the `Transport` header in the SETUP response.
    pub fn response_header(&self, server_ip: &str) -> String {
        match self {
            Self::Interleaved => "RTP/AVP/TCP;unicast;interleaved=0-1".to_string(),
            Self::Udp(udp) => format!(
                "RTP/AVP;unicast;destination={};source={};client_port={}-{};server_port={}-{}",
                udp.client_addr.ip(),
                server_ip,
                udp.client_addr.port(),
                udp.client_rtcp_port,
                udp.server_rtp_port,
                udp.server_rtcp_port
            ),
        }
    }
}
