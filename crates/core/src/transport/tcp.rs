use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use super::{Connection, Listener, ReadOutcome};

/// Backlog bound for a client that stops draining its socket. Past this,
/// the connection is reported as broken and the session is torn down.
const MAX_PENDING_BYTES: usize = 512 * 1024;

/// Non-blocking TCP listener for RTSP control connections.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Listener for TcpAcceptor {
    fn poll_accept(&mut self) -> io::Result<Option<Box<dyn Connection>>> {
        match self.listener.accept() {
            Ok((stream, _)) => Ok(Some(Box::new(TcpConnection::new(stream)?))),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A single RTSP client connection.
///
/// Writes that the kernel cannot take right away are queued and pushed out
/// by [`flush_pending`](Connection::flush_pending) on later ticks, so an
/// interleaved RTP packet is never cut in half.
pub struct TcpConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    pending: Vec<u8>,
}

impl TcpConnection {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer_addr,
            pending: Vec::new(),
        })
    }

    /// Write as much of `data` as the socket accepts right now.
    fn write_some(stream: &mut TcpStream, data: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < data.len() {
            match stream.write(&data[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }
}

impl Connection for TcpConnection {
    fn poll_read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        match self.stream.read(buf) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(ReadOutcome::Empty)
            }
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.flush_pending()?;

        let written = if self.pending.is_empty() {
            Self::write_some(&mut self.stream, data)?
        } else {
            0
        };
        self.pending.extend_from_slice(&data[written..]);

        if self.pending.len() > MAX_PENDING_BYTES {
            tracing::warn!(peer = %self.peer_addr, pending = self.pending.len(), "client not draining, dropping connection");
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "peer is not reading its socket",
            ));
        }

        Ok(data.len())
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let written = Self::write_some(&mut self.stream, &self.pending)?;
            self.pending.drain(..written);
        }
        Ok(())
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn shutdown(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
