//! Privileged node-local image lifecycle: the `setupRoot` UDI builder,
//! the `shifter` launcher's privilege drop and exec, and `unsetupRoot`
//! teardown, built on the shared [`syscall::Syscall`] boundary so the
//! whole sequence is testable without root.

pub mod container;
pub mod credentials;
pub mod error;
pub mod hooks;
pub mod launcher;
pub mod nodespec;
pub mod rootfs;
pub mod site_env;
pub mod syscall;
pub mod teardown;

pub use error::{Result, ShifterError};
