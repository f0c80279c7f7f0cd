use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Readiness mask over {readable, writable}.
///
/// Pure value; [`Ready::EMPTY`] is both "nothing requested" and the
/// timeout result of a bounded wait.
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ready(u8);

impl Ready {
    pub const EMPTY: Ready = Ready(0);
    pub const READABLE: Ready = Ready(1);
    pub const WRITABLE: Ready = Ready(2);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }
}

impl BitOr for Ready {
    type Output = Ready;

    fn bitor(self, rhs: Ready) -> Ready {
        Ready(self.0 | rhs.0)
    }
}

impl BitOrAssign for Ready {
    fn bitor_assign(&mut self, rhs: Ready) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Ready {
    type Output = Ready;

    fn bitand(self, rhs: Ready) -> Ready {
        Ready(self.0 & rhs.0)
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (false, false) => write!(f, "Ready()"),
            (true, false) => write!(f, "Ready(readable)"),
            (false, true) => write!(f, "Ready(writable)"),
            (true, true) => write!(f, "Ready(readable|writable)"),
        }
    }
}
