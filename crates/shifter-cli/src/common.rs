use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::unistd::{geteuid, Uid};

/// Compiled-in location of the site configuration file. Overridable via
/// `SHIFTER_CONFIG_FILE` for test harnesses and site operators who stage
/// config outside the default prefix, falling back to a compiled default
/// when unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/shifter.conf";

/// Initializes the process-wide `tracing` subscriber. Writes to stderr
/// only — these binaries are short-lived and setuid, not long-running
/// services with a journald or file-sink target. Level is controlled by
/// `RUST_LOG`, defaulting to `warn` so a healthy run is silent.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Resolves the site configuration file path: `SHIFTER_CONFIG_FILE` if
/// set, otherwise the compiled-in default.
pub fn config_path() -> PathBuf {
    std::env::var_os("SHIFTER_CONFIG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Parses the site configuration with `=` as the key/value delimiter
/// (tabular auxiliaries such as the image manifest use `:` instead,
/// parsed directly by `shifter-image`).
pub fn load_config(path: &Path) -> Result<shifter_config::Config> {
    shifter_config::Config::parse(path, '=')
        .with_context(|| format!("failed to load site configuration from {path:?}"))
}

/// Enforces that the calling process is effectively root, the precondition
/// every privileged entry point shares before it touches any mount or
/// chroot operation.
pub fn require_effective_root() -> Result<()> {
    if geteuid() != Uid::from_raw(0) {
        anyhow::bail!("must run with effective uid 0 (is this binary installed setuid-root?)");
    }
    Ok(())
}

/// `main`'s standard shape for all three binaries: run `body`, print any
/// error's full chain to stderr, and translate to one of two exit codes
/// (0 success, 1 generic failure — finer-grained error taxonomy is
/// conveyed through the message, not distinct process exit codes).
pub fn run_and_exit(body: impl FnOnce() -> Result<()>) -> ! {
    match body() {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1)
        }
    }
}
