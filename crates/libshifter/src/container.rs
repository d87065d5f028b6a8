//! The UDI lifecycle state machine and the on-disk commit record
//! (`var/shifterConfig.json`) that backs it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// `Absent → Staging → Committed → TearingDown → Absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdiState {
    Absent,
    Staging,
    Committed,
    TearingDown,
}

impl UdiState {
    /// Inspects a mount point for the commit sentinel to recover the
    /// current state without any other bookkeeping.
    pub fn observe(udi_mount_point: &Path) -> UdiState {
        if sentinel_path(udi_mount_point).exists() {
            UdiState::Committed
        } else {
            UdiState::Absent
        }
    }

    /// Only `Committed` may host the privileged launcher entering the tree.
    pub fn can_enter(self) -> bool {
        matches!(self, UdiState::Committed)
    }

    /// `setupRoot` refuses to stage over an existing commit.
    pub fn can_begin_staging(self) -> bool {
        matches!(self, UdiState::Absent)
    }
}

pub fn sentinel_path(udi_mount_point: &Path) -> PathBuf {
    udi_mount_point.join("var/shifterConfig.json")
}

/// The commit record written at the end of a successful `setupRoot` run:
/// exactly what was staged, so `unsetupRoot` and any external reader can
/// reconstruct it without re-deriving anything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShifterConfig {
    pub image_identifier: String,
    pub image_type: String,
    pub volumes: Vec<String>,
    pub site_fs: Vec<String>,
    pub uid: u32,
    pub gid: u32,
    pub created_epoch: i64,
    pub per_node_cache_files: Vec<PathBuf>,
}

impl ShifterConfig {
    pub fn write(&self, udi_mount_point: &Path) -> std::io::Result<()> {
        let path = sentinel_path(udi_mount_point);
        let encoded = serde_json::to_string_pretty(self)?;
        std::fs::write(path, encoded)
    }

    pub fn read(udi_mount_point: &Path) -> std::io::Result<ShifterConfig> {
        let path = sentinel_path(udi_mount_point);
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(std::io::Error::from)
    }

    pub fn remove(udi_mount_point: &Path) -> std::io::Result<()> {
        let path = sentinel_path(udi_mount_point);
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_when_sentinel_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(UdiState::observe(dir.path()), UdiState::Absent);
        assert!(UdiState::Absent.can_begin_staging());
        assert!(!UdiState::Absent.can_enter());
    }

    #[test]
    fn committed_when_sentinel_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("var")).unwrap();
        let config = ShifterConfig {
            image_identifier: "abc123".to_string(),
            image_type: "id".to_string(),
            volumes: vec![],
            site_fs: vec![],
            uid: 1000,
            gid: 1000,
            created_epoch: 0,
            per_node_cache_files: vec![],
        };
        config.write(dir.path()).unwrap();
        assert_eq!(UdiState::observe(dir.path()), UdiState::Committed);
        assert!(UdiState::Committed.can_enter());
        assert!(!UdiState::Committed.can_begin_staging());

        let read_back = ShifterConfig::read(dir.path()).unwrap();
        assert_eq!(read_back, config);

        ShifterConfig::remove(dir.path()).unwrap();
        assert_eq!(UdiState::observe(dir.path()), UdiState::Absent);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        ShifterConfig::remove(dir.path()).unwrap();
        ShifterConfig::remove(dir.path()).unwrap();
    }
}
