use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use crate::error::Result;

/// UDP socket for outbound RTP delivery to one client.
///
/// Bound to the server RTP port advertised in the SETUP response
/// (`server_port=`), so the client sees packets arrive from the port it
/// was told about. Sends are fire-and-forget.
#[derive(Debug)]
pub struct RtpSocket {
    socket: UdpSocket,
}

impl RtpSocket {
    /// Bind on all interfaces at `port` (0 picks an ephemeral port).
    pub fn bind(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Send raw bytes to a specific socket address.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, addr)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sends_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let target = receiver.local_addr().unwrap();

        let sender = RtpSocket::bind(0).unwrap();
        assert_ne!(sender.local_port().unwrap(), 0);
        assert_eq!(sender.send_to(&[0x80, 0x1a], target).unwrap(), 2);

        let mut buf = [0u8; 16];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x80, 0x1a]);
    }
}
