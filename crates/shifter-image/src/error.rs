use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("invalid image descriptor {descriptor:?}: {reason}")]
    InvalidImageDescriptor { descriptor: String, reason: String },

    #[error("local chroot images are not permitted by site configuration")]
    LocalChrootDisallowed,

    #[error("image gateway unavailable for {descriptor:?}")]
    GatewayUnavailable { descriptor: String },

    #[error("failed to read manifest {path:?}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: shifter_config::ConfigError,
    },

    #[error("manifest {path:?} is missing required field {field:?}")]
    MissingField { path: PathBuf, field: String },

    #[error("uid {uid} / gid {gid} denied by image ACL")]
    AclDenied { uid: u32, gid: u32 },
}

pub type Result<T> = std::result::Result<T, ImageError>;
