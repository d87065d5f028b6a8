//! `shifter [--image=type:id] [--volume=spec] [--] <command>...` — the
//! privileged launcher (C6). On success the process image is replaced by
//! `<command>`; this `main` only returns on failure.
//!
//! `--image`/`--volume` are accepted for interface compatibility with the
//! WLM wrappers' published contract (`SHIFTER_IMAGE`, `SHIFTER_VOLUME`),
//! but the launcher itself never stages mounts — `setupRoot` already did
//! that and wrote the commit record this binary checks for. They are
//! parsed and otherwise ignored.

use anyhow::{bail, Result};
use clap::Parser;

use libshifter::launcher::{self, LaunchRequest};
use libshifter::syscall::LinuxSyscall;
use shifter_cli::common;

#[derive(Parser, Debug)]
#[command(name = "shifter", version, about = "Enter a committed UDI and exec the user's command")]
struct Opts {
    /// `type:id`, published by the WLM wrapper; not consumed here.
    #[arg(long = "image")]
    image: Option<String>,

    /// `src:dst[:flags]`, published by the WLM wrapper; not consumed here.
    #[arg(long = "volume")]
    volume: Option<String>,

    /// The command to exec inside the UDI.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

fn main() {
    common::init_logging();
    common::run_and_exit(body);
}

fn body() -> Result<()> {
    let opts = Opts::parse();
    if let Some(image) = &opts.image {
        tracing::debug!(image, "ignoring --image, already applied by setupRoot");
    }
    if let Some(volume) = &opts.volume {
        tracing::debug!(volume, "ignoring --volume, already applied by setupRoot");
    }

    let config = common::load_config(&common::config_path())?;
    let request = LaunchRequest { argv: opts.command };

    match launcher::launch(&config, &request, &LinuxSyscall) {
        Ok(never) => match never {},
        Err(err) => bail!("shifter launcher failed: {err}"),
    }
}
