//! Privileged launcher (`shifter`, C6). Runs while euid=0, drops
//! privileges permanently, and replaces the process image with the
//! user's command — in that order, with no window where user-controlled
//! data can influence execution before the drop completes.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use nix::unistd::chdir;

use shifter_config::Config;

use crate::container::UdiState;
use crate::credentials::{CallerIdentity, EnvSnapshot};
use crate::error::{Result, ShifterError};
use crate::site_env;
use crate::syscall::{Syscall, SyscallError};

/// `shifter [--] <command>…`, already split by the CLI layer.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub argv: Vec<String>,
}

/// Runs the nine ordered steps of the launcher. Returns only on failure —
/// success ends in `execve`, which never returns to the caller.
pub fn launch(config: &Config, request: &LaunchRequest, syscall: &dyn Syscall) -> Result<std::convert::Infallible> {
    if !UdiState::observe(&config.udi_mount_point).can_enter() {
        return Err(ShifterError::AlreadyCommitted(config.udi_mount_point.clone()));
    }

    // Step 1.
    let env_snapshot = EnvSnapshot::capture();

    // Step 2.
    let identity = CallerIdentity::capture()
        .map_err(ShifterError::PrivilegeDropFailed)?
        .validate_for_launch()?;

    // Step 3.
    EnvSnapshot::clear_process_env();

    // Step 4: `config` is already parsed by the caller; `udi_mount_point`
    // is read off it directly.
    let udi_mount_point = config.udi_mount_point.clone();

    // Step 4.5: site-administrator environment policy, applied to the
    // captured snapshot before it's restored for the final exec.
    let final_env = site_env::apply(&config.site_env, env_snapshot.vars)?;

    // Step 5.
    let saved_cwd = std::env::current_dir().ok();
    chdir("/").map_err(|errno| ShifterError::ChrootFailed(SyscallError::Chdir(PathBuf::from("/"), errno)))?;

    // Step 6.
    syscall.chroot(&udi_mount_point).map_err(ShifterError::ChrootFailed)?;

    // Step 7.
    identity.drop_privileges(syscall)?;

    // Step 8.
    restore_cwd(saved_cwd.as_deref());

    // Step 9.
    exec(request, &final_env)
}

fn restore_cwd(saved: Option<&Path>) {
    let candidates: Vec<PathBuf> = [saved.map(Path::to_path_buf), Some(PathBuf::from("/tmp")), Some(PathBuf::from("/"))]
        .into_iter()
        .flatten()
        .collect();
    for candidate in candidates {
        if chdir(&candidate).is_ok() {
            return;
        }
    }
}

fn exec(request: &LaunchRequest, env: &[(String, String)]) -> Result<std::convert::Infallible> {
    let argv: Vec<CString> = request
        .argv
        .iter()
        .map(|a| CString::new(a.as_bytes()).unwrap_or_default())
        .collect();
    let envp: Vec<CString> = env
        .iter()
        .map(|(k, v)| CString::new(format!("{k}={v}").into_bytes()).unwrap_or_default())
        .collect();

    let path = argv.first().cloned().unwrap_or_default();
    match nix::unistd::execve(&path, &argv, &envp) {
        Ok(never) => match never {},
        Err(errno) => Err(ShifterError::Syscall(SyscallError::Exec(errno))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ShifterConfig;
    use crate::syscall::TestSyscall;
    use nix::unistd::{Gid, Uid};

    fn base_config(udi_mount_point: PathBuf) -> Config {
        Config {
            udi_mount_point,
            loop_mount_point: PathBuf::from("/var/udiMount"),
            udi_root_path: PathBuf::from("/opt/shifter"),
            image_base_path: PathBuf::from("/images"),
            etc_path: PathBuf::from("/opt/shifter/etc"),
            ssh_path: PathBuf::from("/opt/shifter/ssh"),
            kmod_base_path: PathBuf::from("/opt/shifter/kmod"),
            kmod_cache_file: PathBuf::from("/opt/shifter/kmod/cache"),
            site_resources: PathBuf::from("/opt/shifter/site"),
            root_fs_type: "tmpfs".to_string(),
            allow_local_chroot: false,
            site_fs: vec![],
            site_env: vec![],
            image_gateway_url_list: vec![],
            system_identifier: "test".to_string(),
            node_context_prefix: String::new(),
            batch_type: String::new(),
            gpu_support: shifter_config::GpuSupport::default(),
            mpi_support: shifter_config::MpiSupport::default(),
        }
    }

    #[test]
    fn refuses_to_enter_an_uncommitted_udi() {
        let dir = tempfile::tempdir().unwrap();
        let config = base_config(dir.path().join("udi"));
        let syscall = TestSyscall::default();
        let request = LaunchRequest { argv: vec!["/bin/true".to_string()] };
        assert!(matches!(
            launch(&config, &request, &syscall),
            Err(ShifterError::AlreadyCommitted(_))
        ));
    }

    #[test]
    fn caller_identity_precondition_is_enforced_before_chroot() {
        let dir = tempfile::tempdir().unwrap();
        let udi = dir.path().join("udi");
        std::fs::create_dir_all(udi.join("var")).unwrap();
        ShifterConfig {
            image_identifier: "abc".to_string(),
            image_type: "id".to_string(),
            volumes: vec![],
            site_fs: vec![],
            uid: 1000,
            gid: 1000,
            created_epoch: 0,
            per_node_cache_files: vec![],
        }
        .write(&udi)
        .unwrap();

        let identity = CallerIdentity {
            uid: Uid::from_raw(1000),
            gid: Gid::from_raw(1000),
            supplementary: vec![],
            euid: Uid::from_raw(1000),
            egid: Gid::from_raw(0),
        };
        assert!(identity.validate_for_launch().is_err());
    }
}
