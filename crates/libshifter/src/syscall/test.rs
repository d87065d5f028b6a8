use std::cell::RefCell;
use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags};
use nix::sched::CloneFlags;
use nix::sys::stat::{Mode, SFlag};
use nix::unistd::{Gid, Uid};

use super::{Result, Syscall};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountCall {
    pub source: Option<PathBuf>,
    pub target: PathBuf,
    pub fstype: Option<String>,
    pub flags: MsFlags,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UmountCall {
    pub target: PathBuf,
    pub flags: MntFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetIdCall {
    pub uid: Uid,
    pub gid: Gid,
}

/// Records every call made through it so tests can assert on ordering and
/// arguments without touching the real kernel. `call_order` records the
/// name of each operation in the sequence it was invoked, so tests can
/// assert ordering across different operation kinds (e.g. "unshare
/// happens before the first mount"), which the per-kind vectors below
/// can't show on their own.
#[derive(Default)]
pub struct TestSyscall {
    pub mounts: RefCell<Vec<MountCall>>,
    pub umounts: RefCell<Vec<UmountCall>>,
    pub chroots: RefCell<Vec<PathBuf>>,
    pub chowns: RefCell<Vec<PathBuf>>,
    pub symlinks: RefCell<Vec<(PathBuf, PathBuf)>>,
    pub groups: RefCell<Vec<Vec<Gid>>>,
    pub set_id_calls: RefCell<Vec<SetIdCall>>,
    pub hostnames: RefCell<Vec<String>>,
    pub unshares: RefCell<Vec<CloneFlags>>,
    pub call_order: RefCell<Vec<&'static str>>,
}

impl Syscall for TestSyscall {
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        self.mounts.borrow_mut().push(MountCall {
            source: source.map(Path::to_path_buf),
            target: target.to_path_buf(),
            fstype: fstype.map(str::to_string),
            flags,
            data: data.map(str::to_string),
        });
        self.call_order.borrow_mut().push("mount");
        Ok(())
    }

    fn umount2(&self, target: &Path, flags: MntFlags) -> Result<()> {
        self.umounts.borrow_mut().push(UmountCall {
            target: target.to_path_buf(),
            flags,
        });
        self.call_order.borrow_mut().push("umount2");
        Ok(())
    }

    fn chroot(&self, path: &Path) -> Result<()> {
        self.chroots.borrow_mut().push(path.to_path_buf());
        self.call_order.borrow_mut().push("chroot");
        Ok(())
    }

    fn mknod(&self, _path: &Path, _mode: SFlag, _perm: Mode, _dev: u64) -> Result<()> {
        self.call_order.borrow_mut().push("mknod");
        Ok(())
    }

    fn symlink(&self, original: &Path, link: &Path) -> Result<()> {
        self.symlinks
            .borrow_mut()
            .push((original.to_path_buf(), link.to_path_buf()));
        self.call_order.borrow_mut().push("symlink");
        Ok(())
    }

    fn chown(&self, path: &Path, _owner: Option<Uid>, _group: Option<Gid>) -> Result<()> {
        self.chowns.borrow_mut().push(path.to_path_buf());
        self.call_order.borrow_mut().push("chown");
        Ok(())
    }

    fn set_groups(&self, groups: &[Gid]) -> Result<()> {
        self.groups.borrow_mut().push(groups.to_vec());
        self.call_order.borrow_mut().push("set_groups");
        Ok(())
    }

    fn set_id(&self, uid: Uid, gid: Gid) -> Result<()> {
        self.set_id_calls.borrow_mut().push(SetIdCall { uid, gid });
        self.call_order.borrow_mut().push("set_id");
        Ok(())
    }

    fn unshare(&self, flags: CloneFlags) -> Result<()> {
        self.unshares.borrow_mut().push(flags);
        self.call_order.borrow_mut().push("unshare");
        Ok(())
    }

    fn set_hostname(&self, hostname: &str) -> Result<()> {
        self.hostnames.borrow_mut().push(hostname.to_string());
        self.call_order.borrow_mut().push("set_hostname");
        Ok(())
    }
}
