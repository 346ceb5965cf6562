//! TCP sessions with bounded waits.
//!
//! The listener is created through `socket2` so address reuse can be set
//! before binding, then handed over to `std::net`. Sessions are plain
//! blocking [`TcpStream`]s; every send and receive runs against a deadline
//! computed at call entry, so a peer that trickles bytes cannot stretch a
//! single call past the configured timeout.

use crate::Role;
use crate::transport::{Channel, TransportError, TransportResult, TransportStats};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How often a pending accept re-checks the listener.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

fn resolve(addr: &str) -> TransportResult<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|source| TransportError::Resolve {
            addr: addr.to_string(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(TransportError::Resolve {
            addr: addr.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        });
    }

    Ok(addrs)
}

fn check_timeout(timeout: Duration) -> TransportResult<()> {
    if timeout.is_zero() {
        return Err(TransportError::InvalidConfig(
            "timeout must be greater than zero".into(),
        ));
    }
    Ok(())
}

/// Bind and listen on `addr` (backlog 1: one client at a time).
///
/// # Errors
///
/// Returns [`TransportError::Resolve`], [`TransportError::Bind`] or
/// [`TransportError::Listen`].
pub fn setup_server(addr: &str) -> TransportResult<TcpListenerHandle> {
    let addr = resolve(addr)?[0];
    let bind_err = |source: io::Error| TransportError::Bind {
        addr: addr.to_string(),
        source,
    };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(1).map_err(|source| TransportError::Listen {
        addr: addr.to_string(),
        source,
    })?;

    let listener: TcpListener = socket.into();
    let local_addr = listener.local_addr()?;
    debug!(%local_addr, "listening");

    Ok(TcpListenerHandle {
        listener,
        local_addr,
    })
}

/// Listening socket returned by [`setup_server`].
#[derive(Debug)]
pub struct TcpListenerHandle {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpListenerHandle {
    /// Address the listener is bound to (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait at most `timeout` for one client.
    ///
    /// The returned session is in blocking mode with `timeout` applied to
    /// both directions.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`] if nobody connects in time and
    /// [`TransportError::Accept`] for socket failures.
    pub fn accept_connection(&self, timeout: Duration) -> TransportResult<TcpSession> {
        check_timeout(timeout)?;
        self.listener
            .set_nonblocking(true)
            .map_err(TransportError::Accept)?;

        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    stream.set_nonblocking(false).map_err(TransportError::Accept)?;
                    debug!(%peer_addr, "accepted connection");
                    return TcpSession::from_stream(stream, peer_addr, Role::Server, timeout);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout {
                            operation: "accept",
                            timeout,
                        });
                    }
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::Accept(e)),
            }
        }
    }
}

/// Connect to `addr`, trying each resolved address for at most `timeout`.
///
/// # Errors
///
/// Returns [`TransportError::Resolve`], [`TransportError::Connect`] or
/// [`TransportError::Timeout`] (from the last address tried).
pub fn connect(addr: &str, timeout: Duration) -> TransportResult<TcpSession> {
    check_timeout(timeout)?;

    let mut last_err = None;
    for candidate in resolve(addr)? {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => {
                debug!(peer_addr = %candidate, "connected");
                return TcpSession::from_stream(stream, candidate, Role::Client, timeout);
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                trace!(%candidate, "connect timed out");
                last_err = Some(TransportError::Timeout {
                    operation: "connect",
                    timeout,
                });
            }
            Err(source) => {
                trace!(%candidate, error = %source, "connect failed");
                last_err = Some(TransportError::Connect {
                    addr: candidate.to_string(),
                    source,
                });
            }
        }
    }

    Err(last_err.unwrap_or(TransportError::Connect {
        addr: addr.to_string(),
        source: io::Error::from(io::ErrorKind::AddrNotAvailable),
    }))
}

/// One live TCP connection.
///
/// Owned exclusively by the side that created it. Dropping the session
/// tears it down.
#[derive(Debug)]
pub struct TcpSession {
    stream: Option<TcpStream>,
    role: Role,
    peer_addr: SocketAddr,
    timeout: Duration,
    stats: TransportStats,
}

impl TcpSession {
    fn from_stream(
        stream: TcpStream,
        peer_addr: SocketAddr,
        role: Role,
        timeout: Duration,
    ) -> TransportResult<Self> {
        stream.set_nodelay(true)?;

        let mut session = Self {
            stream: Some(stream),
            role,
            peer_addr,
            timeout,
            stats: TransportStats::new(),
        };
        session.set_timeout(timeout)?;
        Ok(session)
    }

    /// Side of the connection this session represents.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Remote address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Currently configured per-call deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether [`Channel::teardown`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn remaining(&self, deadline: Instant, operation: &'static str) -> TransportResult<Duration> {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(TransportError::Timeout {
                operation,
                timeout: self.timeout,
            });
        }
        Ok(left)
    }

    fn map_io(&self, e: io::Error, operation: &'static str) -> TransportError {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout {
                operation,
                timeout: self.timeout,
            },
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => TransportError::ConnectionClosed,
            _ => TransportError::Io(e),
        }
    }

    fn write_fully(&mut self, buf: &[u8]) -> TransportResult<()> {
        let deadline = Instant::now() + self.timeout;
        let mut written = 0;

        while written < buf.len() {
            let left = self.remaining(deadline, "send")?;
            let stream = self.stream.as_mut().ok_or(TransportError::ConnectionClosed)?;
            stream.set_write_timeout(Some(left))?;

            match stream.write(&buf[written..]) {
                Ok(0) => {
                    return Err(TransportError::ShortWrite {
                        written,
                        expected: buf.len(),
                    });
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.map_io(e, "send")),
            }
        }

        Ok(())
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> TransportResult<()> {
        let deadline = Instant::now() + self.timeout;
        let mut filled = 0;

        while filled < buf.len() {
            let left = self.remaining(deadline, "receive")?;
            let stream = self.stream.as_mut().ok_or(TransportError::ConnectionClosed)?;
            stream.set_read_timeout(Some(left))?;

            match stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    trace!(filled, expected = buf.len(), "peer closed mid-read");
                    return Err(TransportError::ConnectionClosed);
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.map_io(e, "receive")),
            }
        }

        Ok(())
    }
}

impl Channel for TcpSession {
    fn send_all(&mut self, buf: &[u8]) -> TransportResult<()> {
        match self.write_fully(buf) {
            Ok(()) => {
                self.stats.record_send(buf.len());
                Ok(())
            }
            Err(e) => {
                self.stats.record_send_error();
                Err(e)
            }
        }
    }

    fn receive_into(&mut self, buf: &mut [u8]) -> TransportResult<()> {
        match self.read_fully(buf) {
            Ok(()) => {
                self.stats.record_recv(buf.len());
                Ok(())
            }
            Err(e) => {
                self.stats.record_recv_error();
                Err(e)
            }
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()> {
        check_timeout(timeout)?;
        let stream = self.stream.as_ref().ok_or(TransportError::ConnectionClosed)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        self.timeout = timeout;
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!(peer_addr = %self.peer_addr, error = %e, "shutdown during teardown failed");
            }
            debug!(peer_addr = %self.peer_addr, role = %self.role, "session torn down");
        }
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

impl Drop for TcpSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
