use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{path}:{line}: unknown configuration key {key:?}")]
    UnknownKey {
        path: PathBuf,
        line: usize,
        key: String,
    },
    #[error("{path}:{line}: malformed configuration line: {reason}")]
    MalformedConfig {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("insecure configuration: {path:?} {reason}")]
    InsecureConfig { path: PathBuf, reason: String },
    #[error("failed to read configuration file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
