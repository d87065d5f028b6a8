use path_clean::PathClean;
use std::path::{Path, PathBuf};

/// Collapses `//` runs and trailing `/`, without resolving `..`
/// lexically out of existence — callers that must reject `..` do so
/// before calling this.
pub fn clean_path(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    PathBuf::from(input)
        .clean()
        .to_string_lossy()
        .into_owned()
}

pub fn contains_parent_segment(raw: &str) -> bool {
    Path::new(raw)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_d_clean_path() {
        assert_eq!(clean_path("////usr/lib64///"), "/usr/lib64");
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path(""), "");
    }

    #[test]
    fn detects_parent_segment() {
        assert!(contains_parent_segment("/a/../b"));
        assert!(!contains_parent_segment("/a/b"));
    }
}
