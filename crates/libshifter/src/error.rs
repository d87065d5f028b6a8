use std::path::PathBuf;

use crate::syscall::SyscallError;

/// Aggregates every taxonomy kind the core can surface, each wrapping the
/// originating crate's own error type.
#[derive(Debug, thiserror::Error)]
pub enum ShifterError {
    #[error(transparent)]
    InsecureConfig(#[from] shifter_config::ConfigError),

    #[error(transparent)]
    InvalidVolumeMap(#[from] shifter_volume::VolumeMapError),

    #[error(transparent)]
    InvalidImageDescriptor(#[from] shifter_image::ImageError),

    #[error(transparent)]
    Syscall(#[from] SyscallError),

    #[error(transparent)]
    MountInventory(#[from] shifter_mounts::MountInventoryError),

    #[error("invalid node-spec token {token:?}: {reason}")]
    InvalidNodeSpec { token: String, reason: String },

    #[error("UDI already committed at {0:?}")]
    AlreadyCommitted(PathBuf),

    #[error("hook {name:?} exited with status {exit_code}")]
    HookFailed { name: String, exit_code: i32 },

    #[error("hook {0:?} timed out")]
    HookTimeout(String),

    #[error("siteEnv source directive for {0:?} failed")]
    SiteEnvSourceFailed(PathBuf),

    #[error("siteEnv source directive for {0:?} timed out")]
    SiteEnvSourceTimeout(PathBuf),

    #[error("privilege drop failed: {0}")]
    PrivilegeDropFailed(SyscallError),

    #[error("chroot failed: {0}")]
    ChrootFailed(SyscallError),

    #[error("i/o error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ShifterError>;
