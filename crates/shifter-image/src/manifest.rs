use std::path::{Path, PathBuf};

use shifter_config::line_reader::{self, Entry};

use crate::error::{ImageError, Result};

/// An image record as loaded from `image_base_path/<id>/shifter_imagemanifest.txt`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestRecord {
    pub entrypoint: Vec<String>,
    pub workdir: PathBuf,
    pub env: Vec<(String, String)>,
    pub user_acl: Vec<u32>,
    pub group_acl: Vec<u32>,
    pub status: String,
    pub last_pull_epoch: u64,
    pub tag_list: Vec<String>,
}

impl ManifestRecord {
    /// Reads the manifest at `path` with the tabular `:` delimiter, the
    /// same `KEY<delim>VALUE` grammar the site configuration uses.
    pub fn load(path: &Path) -> Result<ManifestRecord> {
        let entries =
            line_reader::read_entries(path, ':').map_err(|source| ImageError::Manifest {
                path: path.to_path_buf(),
                source,
            })?;

        let mut record = ManifestRecord::default();
        let mut workdir = None;

        for e in &entries {
            apply_entry(&mut record, &mut workdir, e, path)?;
        }

        record.workdir = workdir.unwrap_or_else(|| PathBuf::from("/"));
        Ok(record)
    }

    /// `true` when this uid/gid is permitted; an empty ACL list allows
    /// everyone.
    pub fn acl_permits(&self, uid: u32, gid: u32) -> bool {
        (self.user_acl.is_empty() || self.user_acl.contains(&uid))
            && (self.group_acl.is_empty() || self.group_acl.contains(&gid))
    }

    /// Like [`ManifestRecord::acl_permits`] but returns the pre-flight
    /// error `setupRoot` surfaces on denial.
    pub fn check_acl(&self, uid: u32, gid: u32) -> Result<()> {
        if self.acl_permits(uid, gid) {
            Ok(())
        } else {
            Err(ImageError::AclDenied { uid, gid })
        }
    }
}

fn apply_entry(
    record: &mut ManifestRecord,
    workdir: &mut Option<PathBuf>,
    e: &Entry,
    path: &Path,
) -> Result<()> {
    match e.key.as_str() {
        "ENTRYPOINT" => {
            record.entrypoint = e.value.split_whitespace().map(str::to_string).collect();
        }
        "WORKDIR" => *workdir = Some(PathBuf::from(&e.value)),
        "ENV" => {
            let (k, v) = e.value.split_once('=').ok_or_else(|| ImageError::Manifest {
                path: path.to_path_buf(),
                source: shifter_config::ConfigError::MalformedConfig {
                    path: path.to_path_buf(),
                    line: e.line,
                    reason: format!("ENV entry {:?} is missing '='", e.value),
                },
            })?;
            record.env.push((k.to_string(), v.to_string()));
        }
        "USERACL" => record.user_acl.push(parse_numeric_id(e, path)?),
        "GROUPACL" => record.group_acl.push(parse_numeric_id(e, path)?),
        "STATUS" => record.status = e.value.clone(),
        "LASTPULL" => {
            record.last_pull_epoch = e.value.parse().map_err(|_| ImageError::Manifest {
                path: path.to_path_buf(),
                source: shifter_config::ConfigError::MalformedConfig {
                    path: path.to_path_buf(),
                    line: e.line,
                    reason: format!("LASTPULL value {:?} is not a number", e.value),
                },
            })?;
        }
        "TAG" => record.tag_list.push(e.value.clone()),
        unknown => {
            tracing::warn!(key = unknown, line = e.line, "unrecognized manifest key");
        }
    }
    Ok(())
}

fn parse_numeric_id(e: &Entry, path: &Path) -> Result<u32> {
    e.value.parse().map_err(|_| ImageError::Manifest {
        path: path.to_path_buf(),
        source: shifter_config::ConfigError::MalformedConfig {
            path: path.to_path_buf(),
            line: e.line,
            reason: format!("{} value {:?} is not numeric", e.key, e.value),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_repeated_keys() {
        let f = write_tmp(
            "ENTRYPOINT: /bin/sh -c\nWORKDIR: /root\nENV: PATH=/usr/bin\nENV: HOME=/root\n\
             USERACL: 1000\nUSERACL: 1001\nGROUPACL: 100\nSTATUS: READY\nLASTPULL: 1700000000\n\
             TAG: latest\nTAG: stable\n",
        );
        let m = ManifestRecord::load(f.path()).unwrap();
        assert_eq!(m.entrypoint, vec!["/bin/sh", "-c"]);
        assert_eq!(m.workdir, PathBuf::from("/root"));
        assert_eq!(
            m.env,
            vec![
                ("PATH".to_string(), "/usr/bin".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ]
        );
        assert_eq!(m.user_acl, vec![1000, 1001]);
        assert_eq!(m.group_acl, vec![100]);
        assert_eq!(m.status, "READY");
        assert_eq!(m.last_pull_epoch, 1_700_000_000);
        assert_eq!(m.tag_list, vec!["latest", "stable"]);
    }

    #[test]
    fn empty_acl_allows_everyone() {
        let f = write_tmp("ENTRYPOINT: /bin/sh\n");
        let m = ManifestRecord::load(f.path()).unwrap();
        assert!(m.check_acl(1000, 1000).is_ok());
    }

    #[test]
    fn nonempty_acl_denies_other_uids() {
        let f = write_tmp("ENTRYPOINT: /bin/sh\nUSERACL: 1000\n");
        let m = ManifestRecord::load(f.path()).unwrap();
        assert!(m.check_acl(1000, 1).is_ok());
        assert!(matches!(
            m.check_acl(2000, 1),
            Err(ImageError::AclDenied { uid: 2000, gid: 1 })
        ));
    }

    #[test]
    fn missing_workdir_defaults_to_root() {
        let f = write_tmp("ENTRYPOINT: /bin/sh\n");
        let m = ManifestRecord::load(f.path()).unwrap();
        assert_eq!(m.workdir, PathBuf::from("/"));
    }
}
