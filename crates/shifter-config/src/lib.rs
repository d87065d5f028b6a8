//! Site configuration parser and ownership/permission enforcement. Every
//! other component of the Shifter node-local image lifecycle is built on
//! top of the [`Config`] this crate produces.

pub mod error;
pub mod gpu;
pub mod line_reader;
pub mod mpi;
pub mod site;

use std::path::{Path, PathBuf};

use nix::sys::stat::lstat;
use nix::unistd::{Gid, Uid};

pub use error::{ConfigError, Result};
pub use gpu::GpuSupport;
pub use mpi::MpiSupport;
pub use site::{SiteEnvDirective, SiteFsEntry};

/// Immutable site configuration record, parsed once per invocation of any
/// of the three Shifter binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub udi_mount_point: PathBuf,
    pub loop_mount_point: PathBuf,
    pub udi_root_path: PathBuf,
    pub image_base_path: PathBuf,
    pub etc_path: PathBuf,
    pub ssh_path: PathBuf,
    pub kmod_base_path: PathBuf,
    pub kmod_cache_file: PathBuf,
    pub site_resources: PathBuf,
    pub root_fs_type: String,
    pub allow_local_chroot: bool,
    pub site_fs: Vec<SiteFsEntry>,
    pub site_env: Vec<SiteEnvDirective>,
    pub image_gateway_url_list: Vec<String>,
    pub system_identifier: String,
    pub node_context_prefix: String,
    pub batch_type: String,
    pub gpu_support: GpuSupport,
    pub mpi_support: MpiSupport,
}

/// Paths every implementor of `Config` expects to exist and be locked down,
/// with the loader's field name for error messages. `udi_mount_point` is
/// excluded deliberately: it is the parent into which UDIs get mounted, not
/// a template or binary tree.
const SECURED_PATH_FIELDS: &[&str] = &[
    "loopMount",
    "udiRootPath",
    "imagePath",
    "etcPath",
    "sshPath",
    "kmodBasePath",
    "kmodCacheFile",
    "siteResources",
];

#[derive(Default)]
struct Builder {
    udi_mount_point: Option<PathBuf>,
    loop_mount_point: Option<PathBuf>,
    udi_root_path: Option<PathBuf>,
    image_base_path: Option<PathBuf>,
    etc_path: Option<PathBuf>,
    ssh_path: Option<PathBuf>,
    kmod_base_path: Option<PathBuf>,
    kmod_cache_file: Option<PathBuf>,
    site_resources: Option<PathBuf>,
    root_fs_type: Option<String>,
    allow_local_chroot: bool,
    site_fs: Vec<SiteFsEntry>,
    site_env: Vec<SiteEnvDirective>,
    image_gateway_url_list: Vec<String>,
    system_identifier: Option<String>,
    node_context_prefix: Option<String>,
    batch_type: Option<String>,
    mpi_support: MpiSupport,
}

fn parse_bool(path: &Path, line: usize, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::MalformedConfig {
            path: path.to_path_buf(),
            line,
            reason: format!("{other:?} is not a recognized boolean"),
        }),
    }
}

impl Config {
    /// Parses `path` as a `KEY<delim>VALUE` configuration file, then
    /// validates every security-sensitive path field before returning. A
    /// failure at either stage discards the partially-built record.
    pub fn parse(path: &Path, delim: char) -> Result<Config> {
        let entries = line_reader::read_entries(path, delim)?;
        let mut b = Builder::default();

        for e in &entries {
            match e.key.as_str() {
                "udiMount" => b.udi_mount_point = Some(PathBuf::from(&e.value)),
                "loopMount" => b.loop_mount_point = Some(PathBuf::from(&e.value)),
                "udiRootPath" => b.udi_root_path = Some(PathBuf::from(&e.value)),
                "imagePath" => b.image_base_path = Some(PathBuf::from(&e.value)),
                "etcPath" => b.etc_path = Some(PathBuf::from(&e.value)),
                "sshPath" => b.ssh_path = Some(PathBuf::from(&e.value)),
                "kmodBasePath" => b.kmod_base_path = Some(PathBuf::from(&e.value)),
                "kmodCacheFile" => b.kmod_cache_file = Some(PathBuf::from(&e.value)),
                "siteResources" => b.site_resources = Some(PathBuf::from(&e.value)),
                "rootfsType" => b.root_fs_type = Some(e.value.clone()),
                "allowLocalChroot" => {
                    b.allow_local_chroot = parse_bool(path, e.line, &e.value)?
                }
                "siteFs" => {
                    for tok in e.value.split_whitespace() {
                        let entry = SiteFsEntry::parse(tok).ok_or_else(|| {
                            ConfigError::MalformedConfig {
                                path: path.to_path_buf(),
                                line: e.line,
                                reason: format!("invalid siteFs entry {tok:?}"),
                            }
                        })?;
                        b.site_fs.push(entry);
                    }
                }
                "siteEnv" => {
                    for tok in e.value.split_whitespace() {
                        let directive = SiteEnvDirective::parse(tok).ok_or_else(|| {
                            ConfigError::MalformedConfig {
                                path: path.to_path_buf(),
                                line: e.line,
                                reason: format!("invalid siteEnv directive {tok:?}"),
                            }
                        })?;
                        b.site_env.push(directive);
                    }
                }
                "imageGateway" => b.image_gateway_url_list.push(e.value.clone()),
                "system" => b.system_identifier = Some(e.value.clone()),
                "nodeContextPrefix" => b.node_context_prefix = Some(e.value.clone()),
                "batchType" => b.batch_type = Some(e.value.clone()),
                "mpiSupport" => b.mpi_support.enabled = parse_bool(path, e.line, &e.value)?,
                "mpiSharedLibs" => b.mpi_support.shared_libs_path = Some(PathBuf::from(&e.value)),
                "mpiDependencyLibs" => {
                    b.mpi_support.dependency_libs_path = Some(PathBuf::from(&e.value))
                }
                unknown => {
                    tracing::warn!(key = unknown, line = e.line, "unrecognized configuration key");
                    return Err(ConfigError::UnknownKey {
                        path: path.to_path_buf(),
                        line: e.line,
                        key: unknown.to_string(),
                    });
                }
            }
        }

        let missing = |field: &str| ConfigError::MalformedConfig {
            path: path.to_path_buf(),
            line: 0,
            reason: format!("required key {field:?} was never set"),
        };

        let config = Config {
            udi_mount_point: b.udi_mount_point.ok_or_else(|| missing("udiMount"))?,
            loop_mount_point: b.loop_mount_point.ok_or_else(|| missing("loopMount"))?,
            udi_root_path: b.udi_root_path.ok_or_else(|| missing("udiRootPath"))?,
            image_base_path: b.image_base_path.ok_or_else(|| missing("imagePath"))?,
            etc_path: b.etc_path.ok_or_else(|| missing("etcPath"))?,
            ssh_path: b.ssh_path.ok_or_else(|| missing("sshPath"))?,
            kmod_base_path: b.kmod_base_path.ok_or_else(|| missing("kmodBasePath"))?,
            kmod_cache_file: b
                .kmod_cache_file
                .ok_or_else(|| missing("kmodCacheFile"))?,
            site_resources: b.site_resources.ok_or_else(|| missing("siteResources"))?,
            root_fs_type: b.root_fs_type.ok_or_else(|| missing("rootfsType"))?,
            allow_local_chroot: b.allow_local_chroot,
            site_fs: b.site_fs,
            site_env: b.site_env,
            image_gateway_url_list: b.image_gateway_url_list,
            system_identifier: b.system_identifier.unwrap_or_default(),
            node_context_prefix: b.node_context_prefix.unwrap_or_default(),
            batch_type: b.batch_type.unwrap_or_default(),
            gpu_support: GpuSupport::detect(),
            mpi_support: b.mpi_support,
        };

        config.validate_paths()?;
        Ok(config)
    }

    /// Enforces the invariant that every security-sensitive path must
    /// exist, be owned by root, and not be group- or world-writable.
    fn validate_paths(&self) -> Result<()> {
        let named: [(&str, &Path); 8] = [
            ("loopMount", &self.loop_mount_point),
            ("udiRootPath", &self.udi_root_path),
            ("imagePath", &self.image_base_path),
            ("etcPath", &self.etc_path),
            ("sshPath", &self.ssh_path),
            ("kmodBasePath", &self.kmod_base_path),
            ("kmodCacheFile", &self.kmod_cache_file),
            ("siteResources", &self.site_resources),
        ];
        debug_assert_eq!(named.len(), SECURED_PATH_FIELDS.len());

        for (field, path) in named {
            validate_secure_path(field, path)?;
        }
        for entry in &self.site_fs {
            validate_secure_path("siteFs", &entry.path)?;
        }
        Ok(())
    }
}

fn validate_secure_path(field: &str, path: &Path) -> Result<()> {
    let st = lstat(path).map_err(|errno| ConfigError::InsecureConfig {
        path: path.to_path_buf(),
        reason: format!("{field} does not exist or is inaccessible: {errno}"),
    })?;

    if Uid::from_raw(st.st_uid) != Uid::from_raw(0) || Gid::from_raw(st.st_gid) != Gid::from_raw(0)
    {
        return Err(ConfigError::InsecureConfig {
            path: path.to_path_buf(),
            reason: format!("{field} is not owned by root:root"),
        });
    }

    // S_IWGRP | S_IWOTH
    if st.st_mode & 0o022 != 0 {
        return Err(ConfigError::InsecureConfig {
            path: path.to_path_buf(),
            reason: format!("{field} is group- or world-writable"),
        });
    }

    Ok(())
}
