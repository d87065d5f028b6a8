use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MpiSupport {
    pub enabled: bool,
    pub shared_libs_path: Option<PathBuf>,
    pub dependency_libs_path: Option<PathBuf>,
}
