use std::path::Path;

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::sys::stat::{mknod, Mode, SFlag};
use nix::unistd::{self, sethostname, Gid, Uid};

use super::{Result, Syscall, SyscallError};

/// Production implementation backed directly by `nix`'s syscall wrappers.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxSyscall;

impl Syscall for LinuxSyscall {
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        mount(source, target, fstype, flags, data).map_err(|errno| SyscallError::Mount {
            source: source.map(Path::to_path_buf),
            target: target.to_path_buf(),
            errno,
        })
    }

    fn umount2(&self, target: &Path, flags: MntFlags) -> Result<()> {
        umount2(target, flags).map_err(|errno| SyscallError::Umount {
            target: target.to_path_buf(),
            errno,
        })
    }

    fn chroot(&self, path: &Path) -> Result<()> {
        unistd::chroot(path).map_err(|errno| SyscallError::Chroot(path.to_path_buf(), errno))
    }

    fn mknod(&self, path: &Path, mode: SFlag, perm: Mode, dev: u64) -> Result<()> {
        mknod(path, mode, perm, dev).map_err(|errno| SyscallError::Mknod(path.to_path_buf(), errno))
    }

    fn symlink(&self, original: &Path, link: &Path) -> Result<()> {
        std::os::unix::fs::symlink(original, link).map_err(|io_err| {
            let errno = nix::errno::Errno::from_raw(io_err.raw_os_error().unwrap_or(0));
            SyscallError::Symlink(original.to_path_buf(), link.to_path_buf(), errno)
        })
    }

    fn chown(&self, path: &Path, owner: Option<Uid>, group: Option<Gid>) -> Result<()> {
        unistd::chown(path, owner, group)
            .map_err(|errno| SyscallError::Chown(path.to_path_buf(), errno))
    }

    fn set_groups(&self, groups: &[Gid]) -> Result<()> {
        unistd::setgroups(groups).map_err(SyscallError::SetGroups)
    }

    /// `setresgid` before `setresuid`: dropping gid first while still
    /// privileged, uid last so the process can no longer change gid
    /// afterwards.
    fn set_id(&self, uid: Uid, gid: Gid) -> Result<()> {
        unistd::setresgid(gid, gid, gid).map_err(SyscallError::SetResGid)?;
        unistd::setresuid(uid, uid, uid).map_err(SyscallError::SetResUid)?;
        Ok(())
    }

    fn unshare(&self, flags: CloneFlags) -> Result<()> {
        unshare(flags).map_err(SyscallError::Unshare)
    }

    fn set_hostname(&self, hostname: &str) -> Result<()> {
        sethostname(hostname).map_err(SyscallError::SetHostname)
    }
}
