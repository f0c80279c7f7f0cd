/// Absolute deadline over the wrapping millisecond tick counter.
///
/// Keeps the timeout value it was computed from, so a concurrent change of
/// that timeout shifts the deadline by the difference instead of restarting
/// the whole wait. All arithmetic is wrapping `u32`; the counter wrapping
/// past zero mid-wait cancels out in the subtraction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    end: u32,
    timeout_ms: i32,
}

impl Deadline {
    pub(crate) fn start(now: u32, timeout_ms: i32) -> Self {
        let timeout_ms = timeout_ms.max(0);

        Self {
            end: now.wrapping_add(timeout_ms as u32),
            timeout_ms,
        }
    }

    /// Milliseconds left at `now`, after re-sampling the live timeout.
    /// Negative means the deadline has passed.
    pub(crate) fn remaining(&mut self, now: u32, timeout_ms: i32) -> i32 {
        let timeout_ms = timeout_ms.max(0);

        if timeout_ms != self.timeout_ms {
            self.end = self
                .end
                .wrapping_sub(self.timeout_ms as u32)
                .wrapping_add(timeout_ms as u32);
            self.timeout_ms = timeout_ms;
        }

        self.end.wrapping_sub(now) as i32
    }
}
