//! Raw socket calls, unix flavor: readiness waits go through `poll(2)`.

use std::{
    io::{Error, ErrorKind, Result},
    mem::size_of,
    net::SocketAddr,
    ptr::null_mut,
};

use errno::{errno, set_errno};
use libc::{c_int, c_void, nfds_t, pollfd, sockaddr, sockaddr_storage, socklen_t};
use os_socketaddr::OsSocketAddr;

use crate::ready::Ready;

/// Native socket handle.
pub type RawSock = c_int;

/// Sentinel for "no handle owned".
pub const INVALID_SOCK: RawSock = -1;

fn last_error() -> Error {
    let e = errno();

    set_errno(e);

    Error::from_raw_os_error(e.0)
}

/// Open a non-blocking handle for the family of `addr`.
pub(crate) fn open(addr: &SocketAddr, stream: bool) -> Result<RawSock> {
    let ty = if stream {
        libc::SOCK_STREAM
    } else {
        libc::SOCK_DGRAM
    };

    let sock = unsafe {
        match addr {
            SocketAddr::V4(_) => libc::socket(libc::AF_INET, ty, 0),
            SocketAddr::V6(_) => libc::socket(libc::AF_INET6, ty, 0),
        }
    };

    if sock < 0 {
        return Err(last_error());
    }

    if let Err(err) = set_nonblocking(sock) {
        close(sock);
        return Err(err);
    }

    Ok(sock)
}

pub(crate) fn set_nonblocking(sock: RawSock) -> Result<()> {
    unsafe {
        let flags = libc::fcntl(sock, libc::F_GETFL);

        if flags < 0 {
            return Err(last_error());
        }

        if libc::fcntl(sock, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(last_error());
        }
    }

    Ok(())
}

/// Required here for fast listener restarts; windows reuses by default.
pub(crate) fn set_reuse_addr(sock: RawSock) -> Result<()> {
    let on: c_int = 1;

    if unsafe {
        libc::setsockopt(
            sock,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &on as *const c_int as *const c_void,
            size_of::<c_int>() as socklen_t,
        )
    } < 0
    {
        return Err(last_error());
    }

    Ok(())
}

pub(crate) fn bind_addr(sock: RawSock, addr: &SocketAddr) -> Result<()> {
    let addr: OsSocketAddr = (*addr).into();

    if unsafe { libc::bind(sock, addr.as_ptr(), addr.len()) } < 0 {
        return Err(last_error());
    }

    Ok(())
}

pub(crate) fn listen_on(sock: RawSock) -> Result<()> {
    if unsafe { libc::listen(sock, libc::SOMAXCONN) } < 0 {
        return Err(last_error());
    }

    Ok(())
}

pub(crate) enum ConnectStart {
    Done,
    InProgress,
}

pub(crate) fn start_connect(sock: RawSock, addr: &SocketAddr) -> Result<ConnectStart> {
    let addr: OsSocketAddr = (*addr).into();

    if unsafe { libc::connect(sock, addr.as_ptr(), addr.len()) } >= 0 {
        return Ok(ConnectStart::Done);
    }

    let e = errno();

    set_errno(e);

    if e.0 == libc::EINPROGRESS {
        Ok(ConnectStart::InProgress)
    } else {
        Err(Error::from_raw_os_error(e.0))
    }
}

pub(crate) fn accept_on(sock: RawSock) -> Result<RawSock> {
    let conn = unsafe { libc::accept(sock, null_mut(), null_mut()) };

    if conn < 0 {
        return Err(last_error());
    }

    Ok(conn)
}

/// Graceful shutdown of both directions, then release. Errors are ignored;
/// the handle is gone either way.
pub(crate) fn close(sock: RawSock) {
    unsafe {
        libc::shutdown(sock, libc::SHUT_RDWR);
        libc::close(sock);
    }
}

pub(crate) fn send_on(sock: RawSock, buf: &[u8]) -> Result<usize> {
    let n = unsafe { libc::send(sock, buf.as_ptr() as *const c_void, buf.len(), 0) };

    if n < 0 {
        return Err(last_error());
    }

    Ok(n as usize)
}

pub(crate) fn recv_on(sock: RawSock, buf: &mut [u8]) -> Result<usize> {
    let n = unsafe { libc::recv(sock, buf.as_mut_ptr() as *mut c_void, buf.len(), 0) };

    if n < 0 {
        return Err(last_error());
    }

    Ok(n as usize)
}

pub(crate) fn send_to_on(sock: RawSock, buf: &[u8], addr: &SocketAddr) -> Result<usize> {
    let addr: OsSocketAddr = (*addr).into();

    let n = unsafe {
        libc::sendto(
            sock,
            buf.as_ptr() as *const c_void,
            buf.len(),
            0,
            addr.as_ptr(),
            addr.len(),
        )
    };

    if n < 0 {
        return Err(last_error());
    }

    Ok(n as usize)
}

pub(crate) fn recv_from_on(sock: RawSock, buf: &mut [u8]) -> Result<(usize, Option<SocketAddr>)> {
    let mut storage = [0u8; size_of::<sockaddr_storage>()];
    let mut len = storage.len() as socklen_t;

    let n = unsafe {
        libc::recvfrom(
            sock,
            buf.as_mut_ptr() as *mut c_void,
            buf.len(),
            0,
            storage.as_mut_ptr() as *mut sockaddr,
            &mut len,
        )
    };

    if n < 0 {
        return Err(last_error());
    }

    let peer =
        unsafe { OsSocketAddr::copy_from_raw(storage.as_ptr() as *const sockaddr, len) }.into_addr();

    Ok((n as usize, peer))
}

fn name_of(
    sock: RawSock,
    query: unsafe extern "C" fn(c_int, *mut sockaddr, *mut socklen_t) -> c_int,
) -> Result<SocketAddr> {
    let mut storage = [0u8; size_of::<sockaddr_storage>()];
    let mut len = storage.len() as socklen_t;

    if unsafe { query(sock, storage.as_mut_ptr() as *mut sockaddr, &mut len) } < 0 {
        return Err(last_error());
    }

    unsafe { OsSocketAddr::copy_from_raw(storage.as_ptr() as *const sockaddr, len) }
        .into_addr()
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "unsupported address family"))
}

pub(crate) fn local_addr_of(sock: RawSock) -> Result<SocketAddr> {
    name_of(sock, libc::getsockname)
}

pub(crate) fn peer_addr_of(sock: RawSock) -> Result<SocketAddr> {
    name_of(sock, libc::getpeername)
}

/// Pending socket error (`SO_ERROR`); `Ok(None)` means the last async
/// operation finished clean.
pub(crate) fn take_error(sock: RawSock) -> Result<Option<Error>> {
    let mut err: c_int = 0;
    let mut len = size_of::<c_int>() as socklen_t;

    if unsafe {
        libc::getsockopt(
            sock,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut c_int as *mut c_void,
            &mut len,
        )
    } < 0
    {
        return Err(last_error());
    }

    if err == 0 {
        Ok(None)
    } else {
        Ok(Some(Error::from_raw_os_error(err)))
    }
}

fn events_of(want: Ready) -> libc::c_short {
    let mut events = 0;

    if want.is_readable() {
        events |= libc::POLLIN;
    }
    if want.is_writable() {
        events |= libc::POLLOUT;
    }

    events
}

fn ready_of(revents: libc::c_short) -> Ready {
    // error conditions surface through both directions so the caller's
    // next transfer attempt observes the failure
    let failed = revents & (libc::POLLERR | libc::POLLHUP) != 0;

    let mut got = Ready::EMPTY;

    if failed || revents & libc::POLLIN != 0 {
        got |= Ready::READABLE;
    }
    if failed || revents & libc::POLLOUT != 0 {
        got |= Ready::WRITABLE;
    }

    got
}

/// One bounded `poll(2)` call on a single socket. No retry loop here; the
/// deadline loop lives above in [`poll`](crate::poll).
pub(crate) fn poll_one(sock: RawSock, want: Ready, timeout_ms: i32) -> Result<Ready> {
    let mut pfd = pollfd {
        fd: sock,
        events: events_of(want),
        revents: 0,
    };

    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };

    if ret < 0 {
        return Err(last_error());
    }

    if ret == 0 {
        return Ok(Ready::EMPTY);
    }

    Ok(ready_of(pfd.revents) & want)
}

/// One bounded `poll(2)` call over a batch; the result is aligned with
/// `entries`. The set is sized dynamically, there is no fixed batch cap.
pub(crate) fn poll_many(entries: &[(RawSock, Ready)], timeout_ms: i32) -> Result<Vec<Ready>> {
    let mut fds: Vec<pollfd> = entries
        .iter()
        .map(|&(sock, want)| pollfd {
            fd: sock,
            events: events_of(want),
            revents: 0,
        })
        .collect();

    let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as nfds_t, timeout_ms) };

    if ret < 0 {
        return Err(last_error());
    }

    Ok(entries
        .iter()
        .zip(&fds)
        .map(|(&(_, want), pfd)| {
            if ret == 0 {
                Ready::EMPTY
            } else {
                ready_of(pfd.revents) & want
            }
        })
        .collect())
}
