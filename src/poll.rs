//! Bounded readiness waits: one socket or a whole batch, with a deadline
//! that tolerates the tick counter wrapping and the timeout being changed
//! by another thread while the wait is in progress.

use std::{
    io::{Error, ErrorKind, Result},
    sync::atomic::{AtomicI32, Ordering},
};

use crate::{
    deadline::Deadline,
    ready::Ready,
    socket::Socket,
    sys::{self, RawSock, INVALID_SOCK},
    tick::tick,
};

/// Upper bound for a single OS-level wait. Keeping each wait short is what
/// bounds the latency of observing a timeout mutation from another thread.
pub const DEFAULT_CHECK_INTERVAL_MS: i32 = 250;

pub(crate) fn is_transient(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

/// Wait until `sock` reports any of `want`, the timeout elapses
/// (`Ok(Ready::EMPTY)`), or a hard error occurs.
///
/// `timeout_ms` is re-sampled every iteration; a concurrent store shifts
/// the deadline by the difference. `check_interval_ms <= 0` falls back to
/// the timeout itself.
pub(crate) fn wait(
    sock: RawSock,
    want: Ready,
    timeout_ms: &AtomicI32,
    check_interval_ms: i32,
) -> Result<Ready> {
    let timeout = timeout_ms.load(Ordering::Relaxed);
    let mut deadline = Deadline::start(tick(), timeout);

    // a negative timeout would turn the cap below into a negative OS wait,
    // which poll treats as "block forever"
    let check_interval_ms = if check_interval_ms <= 0 {
        timeout.max(0)
    } else {
        check_interval_ms
    };

    loop {
        let mut diff = deadline.remaining(tick(), timeout_ms.load(Ordering::Relaxed));

        if diff < 0 {
            return Ok(Ready::EMPTY);
        }

        if diff > check_interval_ms {
            diff = check_interval_ms;
        }

        match sys::poll_one(sock, want, diff) {
            Ok(got) if got.is_empty() => continue,
            Ok(got) => return Ok(got),
            Err(err) if is_transient(&err) => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Wait on a batch of sockets at once, each with its own wanted mask,
/// bounded by a shared deadline cell.
///
/// The cell is owned by the caller and may be shortened (cooperative
/// cancellation) or extended by any thread while the wait is in progress.
/// Sockets without an open handle are skipped when building the wait set
/// but keep a cleared entry in `ready`, so closing one member does not
/// invalidate the call for the rest.
///
/// Returns the number of sockets with nonzero readiness; `Ok(0)` on
/// timeout, with every entry cleared. Mismatched slice lengths are an
/// `InvalidInput` error.
pub fn wait_many(
    sockets: &[&Socket],
    want: &[Ready],
    ready: &mut [Ready],
    timeout_ms: &AtomicI32,
    check_interval_ms: i32,
) -> Result<usize> {
    if sockets.len() != want.len() || sockets.len() != ready.len() {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "sockets, want and ready must have equal lengths",
        ));
    }

    for slot in ready.iter_mut() {
        *slot = Ready::EMPTY;
    }

    let timeout = timeout_ms.load(Ordering::Relaxed);
    let mut deadline = Deadline::start(tick(), timeout);

    let check_interval_ms = if check_interval_ms <= 0 {
        timeout.max(0)
    } else {
        check_interval_ms
    };

    loop {
        let mut diff = deadline.remaining(tick(), timeout_ms.load(Ordering::Relaxed));

        if diff < 0 {
            return Ok(0);
        }

        if diff > check_interval_ms {
            diff = check_interval_ms;
        }

        // rebuilt every iteration: a member may have been closed since
        let mut entries = Vec::with_capacity(sockets.len());
        let mut index = Vec::with_capacity(sockets.len());

        for (i, sk) in sockets.iter().enumerate() {
            if sk.raw() == INVALID_SOCK {
                continue;
            }

            entries.push((sk.raw(), want[i]));
            index.push(i);
        }

        let fired = match sys::poll_many(&entries, diff) {
            Ok(fired) => fired,
            Err(err) if is_transient(&err) => continue,
            Err(err) => return Err(err),
        };

        let mut count = 0;

        for (&slot, got) in index.iter().zip(fired) {
            ready[slot] = got;

            if !got.is_empty() {
                count += 1;
            }
        }

        if count > 0 {
            return Ok(count);
        }
    }
}
