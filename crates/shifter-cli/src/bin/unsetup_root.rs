//! `unsetupRoot` — tears the UDI down (C7) in reverse mount order and
//! removes the commit sentinel. No arguments. Exit 0 on `Absent`;
//! idempotent, so re-running it against an already-torn-down mount point
//! is itself a success.

use anyhow::{Context, Result};

use libshifter::container::{ShifterConfig, UdiState};
use libshifter::syscall::LinuxSyscall;
use libshifter::teardown;
use shifter_cli::common;
use shifter_mounts::MountInventory;

fn main() {
    common::init_logging();
    common::run_and_exit(body);
}

fn body() -> Result<()> {
    common::require_effective_root()?;

    let config = common::load_config(&common::config_path())?;

    let cache_files = match ShifterConfig::read(&config.udi_mount_point) {
        Ok(commit) => commit.per_node_cache_files,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read commit record before teardown, proceeding without cache-file list");
            Vec::new()
        }
    };

    let inventory = MountInventory::from_proc().context("failed to read /proc/self/mounts")?;
    let report = teardown::run(&config.udi_mount_point, inventory, &cache_files, &LinuxSyscall);

    for warning in &report.warnings {
        tracing::warn!(path = %warning.path.display(), message = %warning.message, "teardown warning");
    }

    if !UdiState::observe(&config.udi_mount_point).can_begin_staging() {
        anyhow::bail!(
            "UDI at {:?} is not fully torn down after {} warning(s)",
            config.udi_mount_point,
            report.warnings.len()
        );
    }

    tracing::info!(udi_mount_point = %config.udi_mount_point.display(), unmounted = report.unmounted.len(), "UDI torn down");
    Ok(())
}
