//! Raw socket calls, windows flavor: readiness waits go through winsock
//! `select`, with the except set folded into writability so failed
//! connects surface the same way as on unix.

use std::{
    io::{Error, ErrorKind, Result},
    mem::{size_of, zeroed},
    net::SocketAddr,
    ptr::null_mut,
};

use once_cell::sync::Lazy;
use os_socketaddr::OsSocketAddr;
use winapi::um::winsock2::{
    fd_set, timeval, u_long, WSAGetLastError, WSAStartup, FD_SETSIZE, FIONBIO, INVALID_SOCKET,
    SD_BOTH, SOCKET, SOCKET_ERROR, SOCK_DGRAM, SOCK_STREAM, SOL_SOCKET, SOMAXCONN, SO_ERROR,
    WSADATA, WSAEWOULDBLOCK,
};

use crate::ready::Ready;

/// Native socket handle.
pub type RawSock = SOCKET;

/// Sentinel for "no handle owned".
pub const INVALID_SOCK: RawSock = INVALID_SOCKET;

// Winsock refuses every call until WSAStartup has run once per process.
static WSA: Lazy<i32> = Lazy::new(|| unsafe {
    let mut data: WSADATA = zeroed();

    WSAStartup(0x0202, &mut data)
});

fn last_error() -> Error {
    Error::from_raw_os_error(unsafe { WSAGetLastError() })
}

/// Open a non-blocking handle for the family of `addr`.
pub(crate) fn open(addr: &SocketAddr, stream: bool) -> Result<RawSock> {
    if *WSA != 0 {
        return Err(Error::new(ErrorKind::Other, "WSAStartup failed"));
    }

    let ty = if stream { SOCK_STREAM } else { SOCK_DGRAM };

    let sock = unsafe {
        match addr {
            SocketAddr::V4(_) => winapi::um::winsock2::socket(winapi::shared::ws2def::AF_INET, ty, 0),
            SocketAddr::V6(_) => {
                winapi::um::winsock2::socket(winapi::shared::ws2def::AF_INET6, ty, 0)
            }
        }
    };

    if sock == INVALID_SOCKET {
        return Err(last_error());
    }

    if let Err(err) = set_nonblocking(sock) {
        close(sock);
        return Err(err);
    }

    Ok(sock)
}

pub(crate) fn set_nonblocking(sock: RawSock) -> Result<()> {
    let mut nb: u_long = 1;

    if unsafe { winapi::um::winsock2::ioctlsocket(sock, FIONBIO, &mut nb) } == SOCKET_ERROR {
        return Err(last_error());
    }

    Ok(())
}

/// No-op here: windows reuses listener addresses by default.
pub(crate) fn set_reuse_addr(_sock: RawSock) -> Result<()> {
    Ok(())
}

pub(crate) fn bind_addr(sock: RawSock, addr: &SocketAddr) -> Result<()> {
    let addr: OsSocketAddr = (*addr).into();

    if unsafe { winapi::um::winsock2::bind(sock, addr.as_ptr().cast(), addr.len() as i32) }
        == SOCKET_ERROR
    {
        return Err(last_error());
    }

    Ok(())
}

pub(crate) fn listen_on(sock: RawSock) -> Result<()> {
    if unsafe { winapi::um::winsock2::listen(sock, SOMAXCONN) } == SOCKET_ERROR {
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

    if unsafe { winapi::um::winsock2::connect(sock, addr.as_ptr().cast(), addr.len() as i32) }
        != SOCKET_ERROR
    {
        return Ok(ConnectStart::Done);
    }

    let code = unsafe { WSAGetLastError() };

    if code == WSAEWOULDBLOCK {
        Ok(ConnectStart::InProgress)
    } else {
        Err(Error::from_raw_os_error(code))
    }
}

pub(crate) fn accept_on(sock: RawSock) -> Result<RawSock> {
    let conn = unsafe { winapi::um::winsock2::accept(sock, null_mut(), null_mut()) };

    if conn == INVALID_SOCKET {
        return Err(last_error());
    }

    Ok(conn)
}

/// Graceful shutdown of both directions, then release. Errors are ignored;
/// the handle is gone either way.
pub(crate) fn close(sock: RawSock) {
    unsafe {
        winapi::um::winsock2::shutdown(sock, SD_BOTH);
        winapi::um::winsock2::closesocket(sock);
    }
}

pub(crate) fn send_on(sock: RawSock, buf: &[u8]) -> Result<usize> {
    let n = unsafe {
        winapi::um::winsock2::send(sock, buf.as_ptr().cast(), buf.len() as i32, 0)
    };

    if n == SOCKET_ERROR {
        return Err(last_error());
    }

    Ok(n as usize)
}

pub(crate) fn recv_on(sock: RawSock, buf: &mut [u8]) -> Result<usize> {
    let n = unsafe {
        winapi::um::winsock2::recv(sock, buf.as_mut_ptr().cast(), buf.len() as i32, 0)
    };

    if n == SOCKET_ERROR {
        return Err(last_error());
    }

    Ok(n as usize)
}

pub(crate) fn send_to_on(sock: RawSock, buf: &[u8], addr: &SocketAddr) -> Result<usize> {
    let addr: OsSocketAddr = (*addr).into();

    let n = unsafe {
        winapi::um::winsock2::sendto(
            sock,
            buf.as_ptr().cast(),
            buf.len() as i32,
            0,
            addr.as_ptr().cast(),
            addr.len() as i32,
        )
    };

    if n == SOCKET_ERROR {
        return Err(last_error());
    }

    Ok(n as usize)
}

pub(crate) fn recv_from_on(sock: RawSock, buf: &mut [u8]) -> Result<(usize, Option<SocketAddr>)> {
    let mut storage = [0u8; 128];
    let mut len = storage.len() as i32;

    let n = unsafe {
        winapi::um::winsock2::recvfrom(
            sock,
            buf.as_mut_ptr().cast(),
            buf.len() as i32,
            0,
            storage.as_mut_ptr().cast(),
            &mut len,
        )
    };

    if n == SOCKET_ERROR {
        return Err(last_error());
    }

    let peer =
        unsafe { OsSocketAddr::copy_from_raw(storage.as_ptr().cast(), len) }.into_addr();

    Ok((n as usize, peer))
}

fn name_of(
    sock: RawSock,
    query: unsafe extern "system" fn(
        SOCKET,
        *mut winapi::shared::ws2def::SOCKADDR,
        *mut i32,
    ) -> i32,
) -> Result<SocketAddr> {
    let mut storage = [0u8; 128];
    let mut len = storage.len() as i32;

    if unsafe { query(sock, storage.as_mut_ptr().cast(), &mut len) } == SOCKET_ERROR {
        return Err(last_error());
    }

    unsafe { OsSocketAddr::copy_from_raw(storage.as_ptr().cast(), len) }
        .into_addr()
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "unsupported address family"))
}

pub(crate) fn local_addr_of(sock: RawSock) -> Result<SocketAddr> {
    name_of(sock, winapi::um::winsock2::getsockname)
}

pub(crate) fn peer_addr_of(sock: RawSock) -> Result<SocketAddr> {
    name_of(sock, winapi::um::winsock2::getpeername)
}

/// Pending socket error (`SO_ERROR`); `Ok(None)` means the last async
/// operation finished clean.
pub(crate) fn take_error(sock: RawSock) -> Result<Option<Error>> {
    let mut err: i32 = 0;
    let mut len = size_of::<i32>() as i32;

    if unsafe {
        winapi::um::winsock2::getsockopt(
            sock,
            SOL_SOCKET,
            SO_ERROR,
            (&mut err as *mut i32).cast(),
            &mut len,
        )
    } == SOCKET_ERROR
    {
        return Err(last_error());
    }

    if err == 0 {
        Ok(None)
    } else {
        Ok(Some(Error::from_raw_os_error(err)))
    }
}

fn fd_set_push(set: &mut fd_set, sock: SOCKET) {
    set.fd_array[set.fd_count as usize] = sock;
    set.fd_count += 1;
}

fn fd_set_has(set: &fd_set, sock: SOCKET) -> bool {
    set.fd_array[..set.fd_count as usize].contains(&sock)
}

fn timeval_of(timeout_ms: i32) -> timeval {
    timeval {
        tv_sec: timeout_ms / 1000,
        tv_usec: (timeout_ms % 1000) * 1000,
    }
}

fn select_once(entries: &[(RawSock, Ready)], timeout_ms: i32) -> Result<Vec<Ready>> {
    if entries.len() > FD_SETSIZE {
        // hard winsock limit; the caller gets an explicit error instead of
        // silently dropped sockets
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "wait batch exceeds FD_SETSIZE",
        ));
    }

    let mut rset: fd_set = unsafe { zeroed() };
    let mut wset: fd_set = unsafe { zeroed() };
    let mut eset: fd_set = unsafe { zeroed() };

    for &(sock, want) in entries {
        if want.is_readable() {
            fd_set_push(&mut rset, sock);
        }
        if want.is_writable() {
            fd_set_push(&mut wset, sock);
            fd_set_push(&mut eset, sock);
        }
    }

    if rset.fd_count == 0 && wset.fd_count == 0 && eset.fd_count == 0 {
        // select rejects empty sets; sleeping out the slice keeps the
        // level-style timeout contract instead
        std::thread::sleep(std::time::Duration::from_millis(timeout_ms.max(0) as u64));

        return Ok(vec![Ready::EMPTY; entries.len()]);
    }

    let tv = timeval_of(timeout_ms);

    let ret = unsafe {
        winapi::um::winsock2::select(0, &mut rset, &mut wset, &mut eset, &tv)
    };

    if ret == SOCKET_ERROR {
        return Err(last_error());
    }

    Ok(entries
        .iter()
        .map(|&(sock, want)| {
            let mut got = Ready::EMPTY;

            if ret > 0 {
                if want.is_readable() && fd_set_has(&rset, sock) {
                    got |= Ready::READABLE;
                }
                if want.is_writable() && (fd_set_has(&wset, sock) || fd_set_has(&eset, sock)) {
                    got |= Ready::WRITABLE;
                }
            }

            got
        })
        .collect())
}

/// One bounded `select` call on a single socket. No retry loop here; the
/// deadline loop lives above in [`poll`](crate::poll).
pub(crate) fn poll_one(sock: RawSock, want: Ready, timeout_ms: i32) -> Result<Ready> {
    Ok(select_once(&[(sock, want)], timeout_ms)?[0])
}

/// One bounded `select` call over a batch; the result is aligned with
/// `entries`. Bounded by the winsock `FD_SETSIZE` platform limit.
pub(crate) fn poll_many(entries: &[(RawSock, Ready)], timeout_ms: i32) -> Result<Vec<Ready>> {
    select_once(entries, timeout_ms)
}
