//! UDI builder (`setupRoot`, C5): mounts a root filesystem at the site's
//! `udi_mount_point`, overlays identity files, applies site and user
//! mounts, runs MPI/GPU hooks, and commits the result.

use std::path::{Path, PathBuf};

use nix::mount::MsFlags;

use shifter_config::Config;
use shifter_image::{ImageDescriptor, ImageType, ManifestRecord};
use shifter_mounts::MountInventory;
use shifter_volume::VolumeMap;

use crate::container::{ShifterConfig, UdiState};
use crate::error::{Result, ShifterError};
use crate::hooks;
use crate::nodespec::{self, NodeSpecEntry};
use crate::syscall::Syscall;

const SKELETON_SUBDIRS: &[&str] = &["etc", "var", "var/spool", "var/run", "proc", "sys", "dev", "tmp"];

/// Everything `setupRoot`'s CLI surface accepts.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub descriptor: ImageDescriptor,
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub ssh_pubkey: Option<String>,
    pub node_spec: Option<String>,
    pub volume_spec: Option<String>,
}

/// Best-effort rollback guard: unless [`StagingTransaction::commit`] is
/// called, dropping this runs teardown's reverse-unmount sequence over
/// whatever was staged so far.
pub struct StagingTransaction<'a> {
    udi_mount_point: PathBuf,
    inventory: MountInventory,
    cache_files: Vec<PathBuf>,
    syscall: &'a dyn Syscall,
    committed: bool,
}

impl<'a> StagingTransaction<'a> {
    pub fn new(udi_mount_point: PathBuf, syscall: &'a dyn Syscall) -> Self {
        StagingTransaction {
            udi_mount_point,
            inventory: MountInventory::new(),
            cache_files: Vec::new(),
            syscall,
            committed: false,
        }
    }

    pub fn inventory_mut(&mut self) -> &mut MountInventory {
        &mut self.inventory
    }

    pub fn record_cache_file(&mut self, path: PathBuf) {
        self.cache_files.push(path);
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl<'a> Drop for StagingTransaction<'a> {
    fn drop(&mut self) {
        if !self.committed {
            let inventory = std::mem::take(&mut self.inventory);
            let report = crate::teardown::run(&self.udi_mount_point, inventory, &self.cache_files, self.syscall);
            for warning in report.warnings {
                tracing::warn!(path = %warning.path.display(), message = %warning.message, "teardown warning during staging rollback");
            }
        }
    }
}

/// Runs the full nine-step build. Returns the commit record on success;
/// on any failure before step 9, the `StagingTransaction` it owns rolls
/// back automatically when this function returns (it is never committed).
pub fn build(
    config: &Config,
    manifest: &ManifestRecord,
    request: &BuildRequest,
    syscall: &dyn Syscall,
) -> Result<ShifterConfig> {
    // Step 1: pre-flight.
    if request.uid == 0 || request.gid == 0 {
        return Err(ShifterError::PrivilegeDropFailed(
            crate::syscall::SyscallError::SetResUid(nix::errno::Errno::EPERM),
        ));
    }
    manifest.check_acl(request.uid, request.gid)?;

    if UdiState::observe(&config.udi_mount_point) != UdiState::Absent {
        return Err(ShifterError::AlreadyCommitted(config.udi_mount_point.clone()));
    }

    let mut txn = StagingTransaction::new(config.udi_mount_point.clone(), syscall);

    // Step 2: namespace preparation. Unshare into a fresh mount namespace
    // first, then make `/` propagation private in it, so every bind
    // mount issued below stays invisible to the host.
    syscall.unshare(nix::sched::CloneFlags::CLONE_NEWNS)?;
    syscall.mount(None, Path::new("/"), None, MsFlags::MS_PRIVATE | MsFlags::MS_REC, None)?;

    // Step 3: root mount + skeleton.
    syscall.mount(
        None,
        &config.udi_mount_point,
        Some(config.root_fs_type.as_str()),
        MsFlags::empty(),
        None,
    )?;
    for subdir in SKELETON_SUBDIRS {
        let path = config.udi_mount_point.join(subdir);
        std::fs::create_dir_all(&path).map_err(|source| ShifterError::Io { path, source })?;
    }
    let site_resources_dir = config.udi_mount_point.join(
        config
            .site_resources
            .strip_prefix("/")
            .unwrap_or(&config.site_resources),
    );
    std::fs::create_dir_all(&site_resources_dir)
        .map_err(|source| ShifterError::Io { path: site_resources_dir, source })?;

    // Step 4: image bind, then flip read-only with the remount trick.
    let image_root = image_root_path(config, &request.descriptor)?;
    let image_dest = config.udi_mount_point.join("image");
    std::fs::create_dir_all(&image_dest).map_err(|source| ShifterError::Io { path: image_dest.clone(), source })?;
    bind_mount(syscall, txn.inventory_mut(), &image_root, &image_dest, MsFlags::empty())?;
    syscall.mount(
        None,
        &image_dest,
        None,
        MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_BIND,
        None,
    )?;

    // Step 5: identity overlay.
    let node_spec: Vec<NodeSpecEntry> = match &request.node_spec {
        Some(spec) => nodespec::parse(spec)?,
        None => Vec::new(),
    };
    write_identity_files(config, request, &node_spec)?;

    // Step 6: site mounts.
    for entry in &config.site_fs {
        let dest = config.udi_mount_point.join(entry.path.strip_prefix("/").unwrap_or(&entry.path));
        std::fs::create_dir_all(&dest).map_err(|source| ShifterError::Io { path: dest.clone(), source })?;
        let flags = site_fs_mount_flags(entry.flags);
        bind_mount(syscall, txn.inventory_mut(), &entry.path, &dest, flags)?;
        if entry.flags.contains(shifter_config::site::SiteFsFlags::READ_ONLY) {
            syscall.mount(None, &dest, None, MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_BIND, None)?;
        }
    }

    // Step 7: user volumes.
    let site_fs_paths: Vec<PathBuf> = config.site_fs.iter().map(|e| e.path.clone()).collect();
    let volumes = match &request.volume_spec {
        Some(spec) => VolumeMap::parse(spec, &site_fs_paths)?,
        None => VolumeMap::default(),
    };
    for entry in &volumes.entries {
        let dest = config
            .udi_mount_point
            .join(entry.destination.strip_prefix("/").unwrap_or(&entry.destination));
        std::fs::create_dir_all(&dest).map_err(|source| ShifterError::Io { path: dest.clone(), source })?;

        if entry.flags.contains(shifter_volume::VolumeFlags::PER_NODE_CACHE) {
            let cache_file = allocate_per_node_cache(config, &entry.cache)?;
            txn.record_cache_file(cache_file.clone());
            bind_mount(syscall, txn.inventory_mut(), &cache_file, &dest, MsFlags::empty())?;
        } else {
            let flags = volume_mount_flags(entry.flags);
            bind_mount(syscall, txn.inventory_mut(), &entry.source, &dest, flags)?;
            if entry.flags.contains(shifter_volume::VolumeFlags::READ_ONLY) {
                syscall.mount(None, &dest, None, MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_BIND, None)?;
            }
        }
    }

    // Step 8: hooks.
    if config.gpu_support.enabled {
        hooks::run_gpu_hook(
            &config.udi_root_path,
            &config.gpu_support.device_ids,
            &config.udi_mount_point,
            &config.site_resources,
            false,
        )?;
    }
    if config.mpi_support.enabled {
        hooks::run_mpi_hook(
            &config.udi_root_path,
            &config.udi_mount_point,
            &config.site_resources,
            config.mpi_support.shared_libs_path.as_deref(),
            config.mpi_support.dependency_libs_path.as_deref(),
            false,
        )?;
    }

    // Step 9: commit.
    let commit = ShifterConfig {
        image_identifier: request.descriptor.identifier.clone(),
        image_type: request.descriptor.image_type.as_str().to_string(),
        volumes: volumes.entries.iter().map(|e| e.destination.to_string_lossy().into_owned()).collect(),
        site_fs: config.site_fs.iter().map(|e| e.path.to_string_lossy().into_owned()).collect(),
        uid: request.uid,
        gid: request.gid,
        created_epoch: chrono::Utc::now().timestamp(),
        per_node_cache_files: txn.cache_files.clone(),
    };
    commit
        .write(&config.udi_mount_point)
        .map_err(|source| ShifterError::Io { path: config.udi_mount_point.clone(), source })?;

    txn.commit();
    Ok(commit)
}

fn image_root_path(config: &Config, descriptor: &ImageDescriptor) -> Result<PathBuf> {
    match descriptor.image_type {
        ImageType::Local => Ok(PathBuf::from(&descriptor.identifier)),
        _ => Ok(config.image_base_path.join(&descriptor.identifier).join("rootfs")),
    }
}

fn bind_mount(
    syscall: &dyn Syscall,
    inventory: &mut MountInventory,
    source: &Path,
    dest: &Path,
    flags: MsFlags,
) -> Result<()> {
    if matches!(inventory.insert(dest), shifter_mounts::InsertOutcome::Duplicate) {
        return Ok(());
    }
    syscall.mount(Some(source), dest, None, MsFlags::MS_BIND | flags, None)?;
    Ok(())
}

fn site_fs_mount_flags(flags: shifter_config::site::SiteFsFlags) -> MsFlags {
    use shifter_config::site::SiteFsFlags as F;
    let mut out = MsFlags::empty();
    if flags.contains(F::RECURSIVE) {
        out |= MsFlags::MS_REC;
    }
    if flags.contains(F::SLAVE) {
        out |= MsFlags::MS_SLAVE;
    }
    if flags.contains(F::PRIVATE) {
        out |= MsFlags::MS_PRIVATE;
    }
    out
}

fn volume_mount_flags(flags: shifter_volume::VolumeFlags) -> MsFlags {
    use shifter_volume::VolumeFlags as F;
    let mut out = MsFlags::empty();
    if flags.contains(F::RECURSIVE) {
        out |= MsFlags::MS_REC;
    }
    if flags.contains(F::SLAVE) {
        out |= MsFlags::MS_SLAVE;
    }
    if flags.contains(F::PRIVATE) {
        out |= MsFlags::MS_PRIVATE;
    }
    out
}

fn allocate_per_node_cache(
    config: &Config,
    attrs: &Option<shifter_volume::PerNodeCacheAttrs>,
) -> Result<PathBuf> {
    let attrs = attrs.clone().unwrap_or_default();
    let token = fastrand::u64(..);
    let name = attrs
        .unique_cache_name
        .clone()
        .unwrap_or_else(|| format!("pnc-{token:x}"));
    let cache_dir = config.udi_mount_point.join("var/cache");
    std::fs::create_dir_all(&cache_dir).map_err(|source| ShifterError::Io { path: cache_dir.clone(), source })?;
    let cache_file = cache_dir.join(name);
    let size = attrs.size_bytes.unwrap_or(1 << 20);
    let file = std::fs::File::create(&cache_file)
        .map_err(|source| ShifterError::Io { path: cache_file.clone(), source })?;
    file.set_len(size)
        .map_err(|source| ShifterError::Io { path: cache_file.clone(), source })?;
    Ok(cache_file)
}

/// Generates `/etc/{passwd,group,nsswitch.conf,hosts}` from the site's
/// templates under `etc_path`, appending the entry for the target user
/// computed from `-u/-U/-G/-s`. A template missing
/// from `etc_path` falls back to a minimal root-only default rather than
/// failing the build — `etc_path` itself is a required, validated
/// directory, but the individual files under it are site-optional.
fn write_identity_files(config: &Config, request: &BuildRequest, node_spec: &[NodeSpecEntry]) -> Result<()> {
    let etc_dir = config.udi_mount_point.join("etc");

    let mut passwd = read_template(&config.etc_path, "passwd", "root:x:0:0:root:/root:/bin/bash\n");
    passwd.push_str(&format!(
        "{}:x:{}:{}:{}:/home/{}:/bin/bash\n",
        request.username, request.uid, request.gid, request.username, request.username
    ));
    write_file(&etc_dir.join("passwd"), &passwd)?;

    let mut group = read_template(&config.etc_path, "group", "root:x:0:\n");
    group.push_str(&format!("{}:x:{}:\n", request.username, request.gid));
    write_file(&etc_dir.join("group"), &group)?;

    let nsswitch = read_template(
        &config.etc_path,
        "nsswitch.conf",
        "passwd: files\ngroup: files\nhosts: files dns\n",
    );
    write_file(&etc_dir.join("nsswitch.conf"), &nsswitch)?;

    let mut hosts = String::from("127.0.0.1 localhost\n");
    for line in nodespec::render_hosts_lines(node_spec, "127.0.0.1") {
        hosts.push_str(&line);
        hosts.push('\n');
    }
    write_file(&etc_dir.join("hosts"), &hosts)?;

    write_ssh_files(config, &etc_dir, request)?;

    Ok(())
}

/// Reads `etc_path/name`, returning `default` if the template doesn't
/// exist.
fn read_template(etc_path: &Path, name: &str, default: &str) -> String {
    match std::fs::read_to_string(etc_path.join(name)) {
        Ok(contents) => contents,
        Err(_) => default.to_string(),
    }
}

/// Copies sshd host keys / config material staged under `ssh_path` into
/// the UDI's `/etc/ssh`, then writes `authorized_keys` for the caller's
/// pubkey if one was supplied. `ssh_path` mirrors `udiRootPath/sshd` in
/// the original configuration, a flat directory of files meant to be
/// dropped into the container's `/etc/ssh` verbatim.
fn write_ssh_files(config: &Config, etc_dir: &Path, request: &BuildRequest) -> Result<()> {
    let ssh_dir = etc_dir.join("ssh");
    std::fs::create_dir_all(&ssh_dir).map_err(|source| ShifterError::Io { path: ssh_dir.clone(), source })?;

    if let Ok(read_dir) = std::fs::read_dir(&config.ssh_path) {
        for entry in read_dir.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name() else { continue };
            std::fs::copy(&path, ssh_dir.join(name))
                .map_err(|source| ShifterError::Io { path: path.clone(), source })?;
        }
    }

    if let Some(pubkey) = &request.ssh_pubkey {
        write_file(&ssh_dir.join("authorized_keys"), pubkey)?;
    }

    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|source| ShifterError::Io { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::TestSyscall;
    use shifter_image::{ImageDescriptor, ImageType};

    fn base_config(udi_mount_point: PathBuf, image_base_path: PathBuf, site_resources: PathBuf) -> Config {
        Config {
            udi_mount_point,
            loop_mount_point: PathBuf::from("/var/udiMount"),
            udi_root_path: PathBuf::from("/opt/shifter"),
            image_base_path,
            etc_path: PathBuf::from("/opt/shifter/etc"),
            ssh_path: PathBuf::from("/opt/shifter/ssh"),
            kmod_base_path: PathBuf::from("/opt/shifter/kmod"),
            kmod_cache_file: PathBuf::from("/opt/shifter/kmod/cache"),
            site_resources,
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
    fn rejects_root_uid_or_gid() {
        let dir = tempfile::tempdir().unwrap();
        let config = base_config(
            dir.path().join("udi"),
            dir.path().join("images"),
            dir.path().join("site"),
        );
        let manifest = ManifestRecord::default();
        let syscall = TestSyscall::default();
        let request = BuildRequest {
            descriptor: ImageDescriptor::new(ImageType::Id, "abc123"),
            username: "user".to_string(),
            uid: 0,
            gid: 1000,
            ssh_pubkey: None,
            node_spec: None,
            volume_spec: None,
        };
        assert!(build(&config, &manifest, &request, &syscall).is_err());
    }

    #[test]
    fn refuses_to_stage_over_existing_commit() {
        let dir = tempfile::tempdir().unwrap();
        let udi = dir.path().join("udi");
        std::fs::create_dir_all(udi.join("var")).unwrap();
        ShifterConfig {
            image_identifier: "existing".to_string(),
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

        let config = base_config(udi, dir.path().join("images"), dir.path().join("site"));
        let manifest = ManifestRecord::default();
        let syscall = TestSyscall::default();
        let request = BuildRequest {
            descriptor: ImageDescriptor::new(ImageType::Id, "abc123"),
            username: "user".to_string(),
            uid: 1000,
            gid: 1000,
            ssh_pubkey: None,
            node_spec: None,
            volume_spec: None,
        };
        assert!(matches!(
            build(&config, &manifest, &request, &syscall),
            Err(ShifterError::AlreadyCommitted(_))
        ));
    }

    #[test]
    fn successful_build_commits_and_records_site_fs_bind_mounts() {
        let dir = tempfile::tempdir().unwrap();
        let udi = dir.path().join("udi");
        let mut config = base_config(udi, dir.path().join("images"), dir.path().join("site"));
        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        config.site_fs = vec![shifter_config::SiteFsEntry {
            path: scratch.clone(),
            flags: shifter_config::site::SiteFsFlags::empty(),
        }];

        let manifest = ManifestRecord::default();
        let syscall = TestSyscall::default();
        let request = BuildRequest {
            descriptor: ImageDescriptor::new(ImageType::Id, "abc123"),
            username: "user".to_string(),
            uid: 1000,
            gid: 1000,
            ssh_pubkey: Some("ssh-rsa AAAA".to_string()),
            node_spec: Some("nid00001/1".to_string()),
            volume_spec: None,
        };

        let commit = build(&config, &manifest, &request, &syscall).unwrap();
        assert_eq!(commit.uid, 1000);
        assert_eq!(UdiState::observe(&config.udi_mount_point), UdiState::Committed);
        assert!(syscall
            .mounts
            .borrow()
            .iter()
            .any(|m| m.source.as_deref() == Some(scratch.as_path())));
    }

    #[test]
    fn unshares_mount_namespace_before_any_bind_mount() {
        let dir = tempfile::tempdir().unwrap();
        let udi = dir.path().join("udi");
        let config = base_config(udi, dir.path().join("images"), dir.path().join("site"));

        let manifest = ManifestRecord::default();
        let syscall = TestSyscall::default();
        let request = BuildRequest {
            descriptor: ImageDescriptor::new(ImageType::Id, "abc123"),
            username: "user".to_string(),
            uid: 1000,
            gid: 1000,
            ssh_pubkey: None,
            node_spec: None,
            volume_spec: None,
        };

        build(&config, &manifest, &request, &syscall).unwrap();

        let unshares = syscall.unshares.borrow();
        assert_eq!(unshares.len(), 1);
        assert_eq!(unshares[0], nix::sched::CloneFlags::CLONE_NEWNS);
        assert!(!syscall.mounts.borrow().is_empty(), "build should still issue mounts after unsharing");

        let call_order = syscall.call_order.borrow();
        let unshare_pos = call_order.iter().position(|c| *c == "unshare").unwrap();
        let first_mount_pos = call_order.iter().position(|c| *c == "mount").unwrap();
        assert!(
            unshare_pos < first_mount_pos,
            "unshare must happen before the first bind mount, got order {call_order:?}"
        );
    }

    #[test]
    fn identity_overlay_uses_site_templates_and_ssh_material() {
        let dir = tempfile::tempdir().unwrap();
        let etc_path = dir.path().join("etc-templates");
        let ssh_path = dir.path().join("sshd");
        std::fs::create_dir_all(&etc_path).unwrap();
        std::fs::create_dir_all(&ssh_path).unwrap();
        std::fs::write(etc_path.join("passwd"), "root:x:0:0:root:/root:/bin/bash\ndaemon:x:1:1::/:/bin/false\n")
            .unwrap();
        std::fs::write(ssh_path.join("ssh_host_rsa_key.pub"), "ssh-rsa HOSTKEY\n").unwrap();

        let mut config = base_config(dir.path().join("udi"), dir.path().join("images"), dir.path().join("site"));
        config.etc_path = etc_path;
        config.ssh_path = ssh_path;

        let manifest = ManifestRecord::default();
        let syscall = TestSyscall::default();
        let request = BuildRequest {
            descriptor: ImageDescriptor::new(ImageType::Id, "abc123"),
            username: "user".to_string(),
            uid: 1000,
            gid: 1000,
            ssh_pubkey: Some("ssh-rsa AAAA".to_string()),
            node_spec: None,
            volume_spec: None,
        };
        build(&config, &manifest, &request, &syscall).unwrap();

        let etc_dir = config.udi_mount_point.join("etc");
        let passwd = std::fs::read_to_string(etc_dir.join("passwd")).unwrap();
        assert!(passwd.contains("daemon:x:1:1::/:/bin/false"));
        assert!(passwd.contains("user:x:1000:1000:user:/home/user:/bin/bash"));

        let host_key = std::fs::read_to_string(etc_dir.join("ssh/ssh_host_rsa_key.pub")).unwrap();
        assert_eq!(host_key, "ssh-rsa HOSTKEY\n");
        let authorized_keys = std::fs::read_to_string(etc_dir.join("ssh/authorized_keys")).unwrap();
        assert_eq!(authorized_keys, "ssh-rsa AAAA");
    }
}
