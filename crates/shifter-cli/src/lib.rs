//! Shared glue for the three privileged entry points (`setupRoot`,
//! `unsetupRoot`, `shifter`). Each binary is a thin `main` over
//! [`libshifter`]/the component crates; this module holds only what all
//! three repeat: logging setup, config-file location, and the mapping from
//! a failed [`anyhow::Result`] to a process exit code.

pub mod common;
