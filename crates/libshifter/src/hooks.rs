//! MPI/GPU activation scripts (`setupRoot` step 8). Each hook is a fixed
//! argv external command; a `;` sentinel stands in for an argument slot
//! the caller left empty, matching the shell-script contract these
//! scripts were written against.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::error::{Result, ShifterError};

const EMPTY_SLOT: &str = ";";
const HOOK_TIMEOUT: Duration = Duration::from_secs(120);

fn slot(opt: Option<&str>) -> String {
    opt.filter(|s| !s.is_empty()).unwrap_or(EMPTY_SLOT).to_string()
}

/// Runs `/bin/bash <udiRootPath>/bin/activate_mpi_support.sh udi_mount_point
/// site_resources mpi_shared_libs mpi_dependency_libs verbose-flag`.
pub fn run_mpi_hook(
    udi_root_path: &Path,
    udi_mount_point: &Path,
    site_resources: &Path,
    mpi_shared_libs: Option<&Path>,
    mpi_dependency_libs: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    let script = udi_root_path.join("bin/activate_mpi_support.sh");
    let args = [
        udi_mount_point.to_string_lossy().into_owned(),
        site_resources.to_string_lossy().into_owned(),
        slot(mpi_shared_libs.map(|p| p.to_string_lossy()).as_deref()),
        slot(mpi_dependency_libs.map(|p| p.to_string_lossy()).as_deref()),
        verbose_flag(verbose),
    ];
    run_hook("activate_mpi_support", &script, &args)
}

/// Runs `/bin/bash activate_gpu_support.sh gpu_ids udi_mount_point
/// site_resources verbose-flag`.
pub fn run_gpu_hook(
    udi_root_path: &Path,
    gpu_ids: &[String],
    udi_mount_point: &Path,
    site_resources: &Path,
    verbose: bool,
) -> Result<()> {
    let script = udi_root_path.join("bin/activate_gpu_support.sh");
    let args = [
        gpu_ids.join(","),
        udi_mount_point.to_string_lossy().into_owned(),
        site_resources.to_string_lossy().into_owned(),
        verbose_flag(verbose),
    ];
    run_hook("activate_gpu_support", &script, &args)
}

fn verbose_flag(verbose: bool) -> String {
    if verbose {
        "verbose-on".to_string()
    } else {
        "verbose-off".to_string()
    }
}

fn run_hook(name: &str, script: &Path, args: &[String]) -> Result<()> {
    let mut command = Command::new("/bin/bash");
    command
        .arg(script)
        .args(args)
        .env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|source| ShifterError::Io { path: script.to_path_buf(), source })?;

    let (sender, receiver) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        let res = child.wait_with_output();
        let _ = sender.send(res);
    });

    match receiver.recv_timeout(HOOK_TIMEOUT) {
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(output)) => Err(ShifterError::HookFailed {
            name: name.to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        }),
        Ok(Err(source)) => Err(ShifterError::Io {
            path: script.to_path_buf(),
            source,
        }),
        Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(ShifterError::HookTimeout(name.to_string())),
        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
            Err(ShifterError::HookTimeout(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slot_renders_as_semicolon_sentinel() {
        assert_eq!(slot(None), ";");
        assert_eq!(slot(Some("")), ";");
        assert_eq!(slot(Some("/opt/libs")), "/opt/libs");
    }

    #[test]
    fn verbose_flag_renders_known_tokens() {
        assert_eq!(verbose_flag(true), "verbose-on");
        assert_eq!(verbose_flag(false), "verbose-off");
    }
}
