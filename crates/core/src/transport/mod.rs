//! Network transport layer for RTSP signaling and RTP media delivery.
//!
//! Everything here is non-blocking: the server loop polls each socket once
//! per tick and never waits on a single client.
//!
//! - **TCP** ([`tcp`]): carries RTSP request/response signaling and, for
//!   interleaved sessions (RFC 2326 §10.12), the RTP packets themselves
//!   using `$` framing.
//!
//! - **UDP** ([`udp`]): one socket per UDP session, bound to the server
//!   RTP port advertised in the SETUP response.
//!
//! The [`Connection`] and [`Listener`] traits are the seam between the
//! protocol core and the sockets; tests drive the core through in-memory
//! implementations.

pub mod tcp;
pub mod udp;

use std::io;
use std::net::SocketAddr;

pub use tcp::{TcpAcceptor, TcpConnection};
pub use udp::RtpSocket;

/// Result of polling a connection for inbound bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the buffer.
    Data(usize),
    /// Nothing available right now.
    Empty,
    /// The peer closed the connection.
    Closed,
}

/// A client control connection polled once per tick.
pub trait Connection: Send {
    /// Copy whatever bytes are available into `buf` without blocking.
    fn poll_read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome>;

    /// Queue `data` for sending. Returns the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Push previously queued bytes towards the peer, without blocking.
    fn flush_pending(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Remote address of the client.
    fn peer_addr(&self) -> SocketAddr;

    /// Close the connection. Errors are ignored; the peer may already be gone.
    fn shutdown(&mut self);
}

/// A listening socket polled once per tick.
pub trait Listener: Send {
    /// Accept one pending connection, if any.
    fn poll_accept(&mut self) -> io::Result<Option<Box<dyn Connection>>>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connections for driving sessions and the multiplexer.

    use std::collections::VecDeque;
    use std::io;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{Connection, Listener, ReadOutcome};

    #[derive(Debug, Default)]
    pub struct MockState {
        pub inbound: VecDeque<u8>,
        pub outbound: Vec<u8>,
        pub peer_closed: bool,
        pub shut_down: bool,
    }

    /// Test-side handle to a [`MockConnection`].
    #[derive(Clone, Default)]
    pub struct MockHandle(pub Arc<Mutex<MockState>>);

    impl MockHandle {
        pub fn push(&self, text: &str) {
            self.0.lock().inbound.extend(text.as_bytes());
        }

        /// Drain everything written by the server so far.
        pub fn take_output(&self) -> Vec<u8> {
            std::mem::take(&mut self.0.lock().outbound)
        }

        pub fn take_text(&self) -> String {
            String::from_utf8_lossy(&self.take_output()).into_owned()
        }

        pub fn close(&self) {
            self.0.lock().peer_closed = true;
        }

        pub fn is_shut_down(&self) -> bool {
            self.0.lock().shut_down
        }
    }

    pub struct MockConnection {
        state: MockHandle,
        peer: SocketAddr,
    }

    impl MockConnection {
        pub fn new() -> (Self, MockHandle) {
            let handle = MockHandle::default();
            let conn = Self {
                state: handle.clone(),
                peer: "127.0.0.1:40000".parse().unwrap(),
            };
            (conn, handle)
        }
    }

    impl Connection for MockConnection {
        fn poll_read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
            let mut state = self.state.0.lock();
            if state.inbound.is_empty() {
                return Ok(if state.peer_closed {
                    ReadOutcome::Closed
                } else {
                    ReadOutcome::Empty
                });
            }
            let n = buf.len().min(state.inbound.len());
            for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
                *slot = byte;
            }
            Ok(ReadOutcome::Data(n))
        }

        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let mut state = self.state.0.lock();
            if state.peer_closed {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            state.outbound.extend_from_slice(data);
            Ok(data.len())
        }

        fn peer_addr(&self) -> SocketAddr {
            self.peer
        }

        fn shutdown(&mut self) {
            self.state.0.lock().shut_down = true;
        }
    }

    /// Listener whose pending queue is fed by the test.
    #[derive(Clone, Default)]
    pub struct MockListener {
        pending: Arc<Mutex<VecDeque<MockConnection>>>,
    }

    impl MockListener {
        /// Queue a new client and return the handle to talk to it.
        pub fn connect(&self) -> MockHandle {
            let (conn, handle) = MockConnection::new();
            self.pending.lock().push_back(conn);
            handle
        }
    }

    impl Listener for MockListener {
        fn poll_accept(&mut self) -> io::Result<Option<Box<dyn Connection>>> {
            Ok(self
                .pending
                .lock()
                .pop_front()
                .map(|c| Box::new(c) as Box<dyn Connection>))
        }
    }
}
