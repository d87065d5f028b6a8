//! Every privileged kernel operation the core needs, behind one trait so
//! the staging, launch, and teardown logic can be exercised against a
//! recording test double instead of requiring root in CI.

pub mod linux;
pub mod test;

use nix::mount::{MntFlags, MsFlags};
use nix::unistd::{Gid, Uid};
use std::path::Path;

pub use linux::LinuxSyscall;
pub use test::TestSyscall;

#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    #[error("mount {source:?} -> {target:?} failed: {errno}")]
    Mount {
        source: Option<std::path::PathBuf>,
        target: std::path::PathBuf,
        errno: nix::errno::Errno,
    },
    #[error("umount2 {target:?} failed: {errno}")]
    Umount {
        target: std::path::PathBuf,
        errno: nix::errno::Errno,
    },
    #[error("chroot {0:?} failed: {1}")]
    Chroot(std::path::PathBuf, nix::errno::Errno),
    #[error("mknod {0:?} failed: {1}")]
    Mknod(std::path::PathBuf, nix::errno::Errno),
    #[error("symlink {0:?} -> {1:?} failed: {2}")]
    Symlink(std::path::PathBuf, std::path::PathBuf, nix::errno::Errno),
    #[error("chown {0:?} failed: {1}")]
    Chown(std::path::PathBuf, nix::errno::Errno),
    #[error("setgroups failed: {0}")]
    SetGroups(nix::errno::Errno),
    #[error("setresgid failed: {0}")]
    SetResGid(nix::errno::Errno),
    #[error("setresuid failed: {0}")]
    SetResUid(nix::errno::Errno),
    #[error("unshare failed: {0}")]
    Unshare(nix::errno::Errno),
    #[error("sethostname failed: {0}")]
    SetHostname(nix::errno::Errno),
    #[error("chdir {0:?} failed: {1}")]
    Chdir(std::path::PathBuf, nix::errno::Errno),
    #[error("execve failed: {0}")]
    Exec(nix::errno::Errno),
}

pub type Result<T> = std::result::Result<T, SyscallError>;

/// Kernel operations mutated by the UDI builder, launcher, and teardown.
/// Implementors are expected to be zero-sized or otherwise cheap to
/// construct; state lives in the caller.
pub trait Syscall {
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()>;

    fn umount2(&self, target: &Path, flags: MntFlags) -> Result<()>;

    fn chroot(&self, path: &Path) -> Result<()>;

    fn mknod(&self, path: &Path, mode: nix::sys::stat::SFlag, perm: nix::sys::stat::Mode, dev: u64) -> Result<()>;

    fn symlink(&self, original: &Path, link: &Path) -> Result<()>;

    fn chown(&self, path: &Path, owner: Option<Uid>, group: Option<Gid>) -> Result<()>;

    fn set_groups(&self, groups: &[Gid]) -> Result<()>;

    fn set_id(&self, uid: Uid, gid: Gid) -> Result<()>;

    fn unshare(&self, flags: nix::sched::CloneFlags) -> Result<()>;

    fn set_hostname(&self, hostname: &str) -> Result<()>;
}
