//! Blocking-style socket over a non-blocking native handle.

use std::{
    io::{Error, ErrorKind, Result},
    net::SocketAddr,
    sync::atomic::{AtomicI32, Ordering},
};

use crate::{
    addr,
    poll::{self, DEFAULT_CHECK_INTERVAL_MS},
    ready::Ready,
    sys::{self, ConnectStart, RawSock, INVALID_SOCK},
};

/// Outcome of a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// The handshake finished; the socket is established.
    Ok,
    /// Connect was issued and is still in flight. Poll for writability and
    /// call [`Socket::connect_check`] to resolve it.
    Trying,
    /// Resolution failed, the handle could not be opened, or the peer
    /// refused.
    Failed,
}

/// A socket owning at most one non-blocking native handle, with a
/// per-instance timeout in milliseconds.
///
/// Connection state is never cached: `connect_check` and friends derive it
/// from the handle and fresh OS queries every time, so it cannot drift out
/// of sync with the kernel's view.
///
/// A timeout of zero (the default) makes every transfer best-effort and
/// non-blocking. The timeout lives in an atomic that the bounded waits
/// re-read each iteration; storing a new value from another thread is the
/// supported way to cancel or extend an in-progress wait. All other
/// operations on one instance must stay on a single thread at a time.
#[derive(Debug)]
pub struct Socket {
    sock: RawSock,
    timeout_ms: AtomicI32,
}

fn not_open() -> Error {
    Error::new(ErrorKind::NotConnected, "socket not open")
}

impl Socket {
    pub fn new() -> Self {
        Self {
            sock: INVALID_SOCK,
            timeout_ms: AtomicI32::new(0),
        }
    }

    fn with_raw(sock: RawSock) -> Self {
        Self {
            sock,
            timeout_ms: AtomicI32::new(0),
        }
    }

    /// Set the timeout for blocking operations, in milliseconds. Zero or
    /// negative means "never wait". Safe to call from another thread while
    /// a wait on this socket is in progress.
    pub fn set_timeout(&self, timeout_ms: i32) {
        self.timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }

    pub fn timeout(&self) -> i32 {
        self.timeout_ms.load(Ordering::Relaxed)
    }

    pub fn is_open(&self) -> bool {
        self.sock != INVALID_SOCK
    }

    /// The raw handle, still owned by this socket.
    pub fn raw(&self) -> RawSock {
        self.sock
    }

    /// Take ownership of `sock`; any previously owned handle is closed.
    pub fn attach(&mut self, sock: RawSock) {
        self.close();
        self.sock = sock;
    }

    /// Hand the raw handle to the caller, who becomes responsible for
    /// closing it. The socket is left closed.
    pub fn detach(&mut self) -> RawSock {
        std::mem::replace(&mut self.sock, INVALID_SOCK)
    }

    /// Idempotent; shuts down both directions and releases the handle.
    pub fn close(&mut self) {
        if self.sock != INVALID_SOCK {
            sys::close(self.sock);
            self.sock = INVALID_SOCK;
        }
    }

    /// Connect to `host:port`, replacing any previously owned handle.
    ///
    /// Returns [`ConnectStatus::Ok`] on an immediately completed
    /// handshake, [`ConnectStatus::Failed`] on a hard failure, and
    /// [`ConnectStatus::Trying`] when the attempt is still in flight:
    /// immediately if the timeout is zero, or after the bounded wait ran
    /// out without a verdict. `Trying` is not a failure; the attempt may
    /// still complete, and the caller decides how long to keep checking.
    pub fn connect(&mut self, host: &str, port: u16) -> ConnectStatus {
        let remote = match addr::resolve(host, port) {
            Ok(remote) => remote,
            Err(err) => {
                log::debug!("resolve [{}] failed: {}", host, err);
                return ConnectStatus::Failed;
            }
        };

        self.close();

        self.sock = match sys::open(&remote, true) {
            Ok(sock) => sock,
            Err(err) => {
                log::debug!("socket() failed: {}", err);
                return ConnectStatus::Failed;
            }
        };

        match sys::start_connect(self.sock, &remote) {
            Ok(ConnectStart::Done) => return ConnectStatus::Ok,
            Ok(ConnectStart::InProgress) => {}
            Err(err) => {
                log::debug!("connect [{}:{}] failed: {}", host, port, err);
                self.close();
                return ConnectStatus::Failed;
            }
        }

        if self.timeout() <= 0 {
            // the caller polls and resolves with connect_check
            return ConnectStatus::Trying;
        }

        match self.wait(Ready::WRITABLE, DEFAULT_CHECK_INTERVAL_MS) {
            Ok(got) if !got.is_empty() => self.connect_check(),
            _ => ConnectStatus::Trying,
        }
    }

    /// Zero-wait probe of an in-flight connect. Never blocks; cheap to
    /// call repeatedly from the caller's own loop.
    ///
    /// Queries the handle's write-readiness and pending error state fresh
    /// each call, distinguishing a completed handshake from a refused one.
    pub fn connect_check(&self) -> ConnectStatus {
        if self.sock == INVALID_SOCK {
            return ConnectStatus::Failed;
        }

        match sys::poll_one(self.sock, Ready::WRITABLE, 0) {
            Ok(got) if got.is_writable() => match sys::take_error(self.sock) {
                Ok(None) => ConnectStatus::Ok,
                Ok(Some(err)) => {
                    log::debug!("connect finished with error: {}", err);
                    ConnectStatus::Failed
                }
                Err(err) => {
                    log::debug!("SO_ERROR query failed: {}", err);
                    ConnectStatus::Failed
                }
            },
            _ => ConnectStatus::Trying,
        }
    }

    /// Bind a TCP listener on `host:port`, replacing any previously owned
    /// handle. Any failure closes the handle; no partial state survives.
    pub fn tcp_listen(&mut self, host: &str, port: u16) -> Result<()> {
        self.open_bound(host, port, true)
    }

    /// Bind a UDP socket on `host:port`, replacing any previously owned
    /// handle. Any failure closes the handle; no partial state survives.
    pub fn udp_bind(&mut self, host: &str, port: u16) -> Result<()> {
        self.open_bound(host, port, false)
    }

    fn open_bound(&mut self, host: &str, port: u16, stream: bool) -> Result<()> {
        let local = addr::resolve(host, port).map_err(|err| {
            log::debug!("resolve [{}] failed: {}", host, err);
            err
        })?;

        self.close();

        self.sock = sys::open(&local, stream).map_err(|err| {
            log::debug!("socket() failed: {}", err);
            err
        })?;

        let bound = sys::set_reuse_addr(self.sock)
            .and_then(|_| sys::bind_addr(self.sock, &local))
            .and_then(|_| {
                if stream {
                    sys::listen_on(self.sock)
                } else {
                    Ok(())
                }
            });

        if let Err(err) = bound {
            log::debug!("bind [{}:{}] failed: {}", host, port, err);
            self.close();
            return Err(err);
        }

        Ok(())
    }

    /// Accept the next pending connection as a brand-new socket owning the
    /// accepted handle (forced non-blocking, timeout zero).
    ///
    /// With a timeout configured, first waits for readability within the
    /// deadline; `Ok(None)` means nothing arrived in time.
    pub fn accept(&self) -> Result<Option<Socket>> {
        if self.sock == INVALID_SOCK {
            log::debug!("accept without a listening socket");
            return Err(not_open());
        }

        if self.timeout() > 0 {
            let got = self.wait(Ready::READABLE, DEFAULT_CHECK_INTERVAL_MS)?;

            if got.is_empty() {
                return Ok(None);
            }
        }

        let conn = match sys::accept_on(self.sock) {
            Ok(conn) => conn,
            Err(err) if poll::is_transient(&err) => return Ok(None),
            Err(err) => {
                log::debug!("accept() failed: {}", err);
                return Err(err);
            }
        };

        if let Err(err) = sys::set_nonblocking(conn) {
            log::debug!("accepted connection set nonblock failed: {}", err);
            sys::close(conn);
            return Err(err);
        }

        Ok(Some(Socket::with_raw(conn)))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        if self.sock == INVALID_SOCK {
            return Err(not_open());
        }

        sys::local_addr_of(self.sock)
    }

    pub fn remote_addr(&self) -> Result<SocketAddr> {
        if self.sock == INVALID_SOCK {
            return Err(not_open());
        }

        sys::peer_addr_of(self.sock)
    }

    /// Send as much of `buf` as the configured timeout allows.
    ///
    /// A full transfer returns `buf.len()`. With a zero timeout this never
    /// blocks and returns whatever one attempt could move, possibly zero.
    /// Otherwise it loops wait-then-send until everything went out or the
    /// deadline passed; a timeout yields the short count so far (zero
    /// included, as a non-error). A hard error is `Err` only when nothing
    /// was sent yet, else the partial count achieved before it.
    pub fn send(&self, buf: &[u8]) -> Result<usize> {
        if self.sock == INVALID_SOCK {
            return Err(not_open());
        }

        let mut sent = 0;

        match sys::send_on(self.sock, buf) {
            Ok(n) if n == buf.len() => return Ok(n),
            Ok(n) => sent = n,
            Err(err) if poll::is_transient(&err) => {}
            Err(err) => return Err(err),
        }

        if self.timeout() <= 0 {
            return Ok(sent);
        }

        while sent < buf.len() {
            match self.wait(Ready::WRITABLE, DEFAULT_CHECK_INTERVAL_MS) {
                Ok(got) if got.is_empty() => return Ok(sent),
                Ok(_) => {}
                Err(err) => return if sent == 0 { Err(err) } else { Ok(sent) },
            }

            match sys::send_on(self.sock, &buf[sent..]) {
                Ok(n) => sent += n,
                Err(err) if poll::is_transient(&err) => {}
                Err(err) => return if sent == 0 { Err(err) } else { Ok(sent) },
            }
        }

        Ok(sent)
    }

    /// Receive at least `min_len` bytes into `buf`, never more than
    /// `buf.len()`.
    ///
    /// With a zero timeout this never blocks. Otherwise it loops
    /// wait-then-receive until `min_len` is gathered or the deadline
    /// passes; a timeout yields the short count so far as a non-error. An
    /// orderly peer close is `Err` only when nothing was gathered yet;
    /// "data then close" simply ends the loop with what arrived.
    pub fn recv(&self, buf: &mut [u8], min_len: usize) -> Result<usize> {
        if self.sock == INVALID_SOCK {
            return Err(not_open());
        }

        let min_len = min_len.min(buf.len());
        let mut got_len = 0;

        match sys::recv_on(self.sock, buf) {
            Ok(n) if n >= min_len => return Ok(n),
            Ok(0) => return Err(Error::new(ErrorKind::UnexpectedEof, "peer closed")),
            Ok(n) => got_len = n,
            Err(err) if poll::is_transient(&err) => {}
            Err(err) => return Err(err),
        }

        if self.timeout() <= 0 {
            return Ok(got_len);
        }

        while got_len < min_len {
            match self.wait(Ready::READABLE, DEFAULT_CHECK_INTERVAL_MS) {
                Ok(got) if got.is_empty() => return Ok(got_len),
                Ok(_) => {}
                Err(err) => return if got_len == 0 { Err(err) } else { Ok(got_len) },
            }

            match sys::recv_on(self.sock, &mut buf[got_len..]) {
                Ok(0) => {
                    return if got_len == 0 {
                        Err(Error::new(ErrorKind::UnexpectedEof, "peer closed"))
                    } else {
                        Ok(got_len)
                    };
                }
                Ok(n) => got_len += n,
                Err(err) if poll::is_transient(&err) => {}
                Err(err) => return if got_len == 0 { Err(err) } else { Ok(got_len) },
            }
        }

        Ok(got_len)
    }

    /// Send one datagram to `host:port`.
    ///
    /// Datagrams are atomic: at most one retry after one bounded wait,
    /// nothing is accumulated. `Ok(None)` means the deadline passed before
    /// the datagram could be handed to the OS.
    pub fn send_to(&self, buf: &[u8], host: &str, port: u16) -> Result<Option<usize>> {
        if self.sock == INVALID_SOCK {
            return Err(not_open());
        }

        let remote = addr::resolve(host, port).map_err(|err| {
            log::debug!("resolve [{}] failed: {}", host, err);
            err
        })?;

        match sys::send_to_on(self.sock, buf, &remote) {
            Ok(n) => return Ok(Some(n)),
            Err(err) if poll::is_transient(&err) => {}
            Err(err) => return Err(err),
        }

        if self.timeout() <= 0 {
            return Ok(None);
        }

        if self.wait(Ready::WRITABLE, DEFAULT_CHECK_INTERVAL_MS)?.is_empty() {
            return Ok(None);
        }

        match sys::send_to_on(self.sock, buf, &remote) {
            Ok(n) => Ok(Some(n)),
            Err(err) if poll::is_transient(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Receive one datagram and its sender. Same single-retry contract as
    /// [`send_to`](Socket::send_to); `Ok(None)` means nothing arrived
    /// within the deadline.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        if self.sock == INVALID_SOCK {
            return Err(not_open());
        }

        match sys::recv_from_on(self.sock, buf) {
            Ok((n, peer)) => return Ok(Some((n, require_peer(peer)?))),
            Err(err) if poll::is_transient(&err) => {}
            Err(err) => return Err(err),
        }

        if self.timeout() <= 0 {
            return Ok(None);
        }

        if self.wait(Ready::READABLE, DEFAULT_CHECK_INTERVAL_MS)?.is_empty() {
            return Ok(None);
        }

        match sys::recv_from_on(self.sock, buf) {
            Ok((n, peer)) => Ok(Some((n, require_peer(peer)?))),
            Err(err) if poll::is_transient(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Wait until the socket reports any of `want`, the configured timeout
    /// elapses (`Ok(Ready::EMPTY)`), or a hard error occurs.
    ///
    /// Each OS wait is capped at `check_interval_ms` and the timeout field
    /// re-read in between, so another thread mutating it takes effect with
    /// bounded latency.
    pub fn wait(&self, want: Ready, check_interval_ms: i32) -> Result<Ready> {
        if self.sock == INVALID_SOCK {
            return Err(not_open());
        }

        poll::wait(self.sock, want, &self.timeout_ms, check_interval_ms)
    }
}

fn require_peer(peer: Option<SocketAddr>) -> Result<SocketAddr> {
    peer.ok_or_else(|| Error::new(ErrorKind::InvalidData, "recvfrom returned no peer address"))
}

impl Default for Socket {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}
