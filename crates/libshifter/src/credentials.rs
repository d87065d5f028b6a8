//! Caller identity capture and the privilege-drop precondition checks
//! shared by the launcher (C6) and, for the pre-flight step, the UDI
//! builder (C5).

use nix::unistd::{getegid, geteuid, getgid, getgroups, getuid, Gid, Uid};

use crate::error::{Result, ShifterError, SyscallError};
use crate::syscall::Syscall;

/// The caller's identity as observed before any privilege transition.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub uid: Uid,
    pub gid: Gid,
    pub supplementary: Vec<Gid>,
    pub euid: Uid,
    pub egid: Gid,
}

impl CallerIdentity {
    /// Reads the real/effective ids and supplementary group list of the
    /// current process.
    pub fn capture() -> std::result::Result<Self, SyscallError> {
        let uid = getuid();
        let gid = getgid();
        let euid = geteuid();
        let egid = getegid();
        let supplementary = getgroups().map_err(SyscallError::SetGroups)?;
        Ok(CallerIdentity {
            uid,
            gid,
            supplementary,
            euid,
            egid,
        })
    }

    /// Enforces the launcher's precondition: effectively root, but the
    /// real uid/gid are an unprivileged user. Any zero-valued
    /// supplementary group is rewritten to the caller's primary gid — a
    /// caller can never retain root in its supplementary list.
    pub fn validate_for_launch(mut self) -> Result<Self> {
        if self.euid != Uid::from_raw(0) || self.egid != Gid::from_raw(0) {
            return Err(ShifterError::PrivilegeDropFailed(SyscallError::SetResUid(
                nix::errno::Errno::EPERM,
            )));
        }
        if self.uid == Uid::from_raw(0) || self.gid == Gid::from_raw(0) {
            return Err(ShifterError::PrivilegeDropFailed(SyscallError::SetResUid(
                nix::errno::Errno::EPERM,
            )));
        }
        for g in self.supplementary.iter_mut() {
            if *g == Gid::from_raw(0) {
                *g = self.gid;
            }
        }
        Ok(self)
    }

    /// Performs the permanent drop: `setgroups` then `setresgid` then
    /// `setresuid`, in that strict order (setgroups needs the process to
    /// still hold its privileged gid).
    pub fn drop_privileges(&self, syscall: &dyn Syscall) -> Result<()> {
        syscall
            .set_groups(&self.supplementary)
            .map_err(ShifterError::PrivilegeDropFailed)?;
        syscall
            .set_id(self.uid, self.gid)
            .map_err(ShifterError::PrivilegeDropFailed)?;
        Ok(())
    }
}

/// A captured copy of the process environment, taken before it is
/// cleared for the duration of privileged work and restored only into
/// the argv/envp passed to the final `execve`.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    pub vars: Vec<(String, String)>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        EnvSnapshot {
            vars: std::env::vars().collect(),
        }
    }

    pub fn clear_process_env() {
        for (k, _) in std::env::vars() {
            std::env::remove_var(k);
        }
    }
}
