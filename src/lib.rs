#![doc = include_str!("../README.md")]

pub mod addr;

mod deadline;
mod poll;
mod ready;
mod socket;
mod tick;

#[cfg_attr(target_family = "unix", path = "sys_unix.rs")]
#[cfg_attr(target_family = "windows", path = "sys_windows.rs")]
mod sys;

pub use poll::{wait_many, DEFAULT_CHECK_INTERVAL_MS};
pub use ready::Ready;
pub use socket::{ConnectStatus, Socket};
pub use sys::{RawSock, INVALID_SOCK};
pub use tick::tick;
