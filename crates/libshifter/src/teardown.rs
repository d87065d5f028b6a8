//! UDI teardown (`unsetupRoot`, C7). Unmounts everything staged under a
//! mount point in reverse order, cleans up per-node-cache backing files,
//! removes the skeleton directories, and deletes the commit sentinel.
//! Idempotent: re-running on an already-torn-down mount point is a no-op
//! success.

use std::path::{Path, PathBuf};

use nix::mount::MntFlags;

use shifter_mounts::{MountInventory, SortOrder};

use crate::container::ShifterConfig;
use crate::syscall::Syscall;

const SKELETON_SUBDIRS: &[&str] = &[
    "var/spool",
    "var/run",
    "var",
    "proc",
    "sys",
    "dev",
    "tmp",
    "etc",
];

/// A non-fatal problem encountered while tearing down; teardown keeps
/// going so the node ends up as clean as possible.
#[derive(Debug)]
pub struct TeardownWarning {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct TeardownReport {
    pub unmounted: Vec<PathBuf>,
    pub warnings: Vec<TeardownWarning>,
}

/// Tears down `udi_mount_point`, given a mount inventory snapshot (from
/// [`shifter_mounts::MountInventory::from_proc`]) and the cache files the
/// commit record named.
pub fn run(
    udi_mount_point: &Path,
    mut inventory: MountInventory,
    cache_files: &[PathBuf],
    syscall: &dyn Syscall,
) -> TeardownReport {
    let mut report = TeardownReport::default();

    inventory.sort(SortOrder::Reverse);
    let targets: Vec<PathBuf> = inventory
        .entries_under(udi_mount_point)
        .map(Path::to_path_buf)
        .collect();

    for target in targets {
        match unmount_one(&target, syscall) {
            Ok(()) => report.unmounted.push(target),
            Err(message) => report.warnings.push(TeardownWarning { path: target, message }),
        }
    }

    for cache_file in cache_files {
        if let Err(e) = std::fs::remove_file(cache_file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                report.warnings.push(TeardownWarning {
                    path: cache_file.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    for subdir in SKELETON_SUBDIRS {
        let path = udi_mount_point.join(subdir);
        if let Err(e) = std::fs::remove_dir(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                report.warnings.push(TeardownWarning { path, message: e.to_string() });
            }
        }
    }

    if let Err(e) = ShifterConfig::remove(udi_mount_point) {
        report.warnings.push(TeardownWarning {
            path: crate::container::sentinel_path(udi_mount_point),
            message: e.to_string(),
        });
    }

    report
}

fn unmount_one(target: &Path, syscall: &dyn Syscall) -> Result<(), String> {
    match syscall.umount2(target, MntFlags::empty()) {
        Ok(()) => Ok(()),
        Err(first_err) => match syscall.umount2(target, MntFlags::MNT_DETACH) {
            Ok(()) => Ok(()),
            Err(second_err) => Err(format!("{first_err}; retry with MNT_DETACH: {second_err}")),
        },
    }
}
