#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum VolumeMapError {
    #[error("invalid volume map entry {entry:?}: {reason}")]
    InvalidVolumeMap { entry: String, reason: String },
}

pub type Result<T> = std::result::Result<T, VolumeMapError>;
