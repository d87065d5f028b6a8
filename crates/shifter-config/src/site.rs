use std::path::PathBuf;

bitflags::bitflags! {
    /// Flags annotating a site-administrator-declared filesystem bind. A
    /// restricted subset of the user volume-map flag vocabulary (no
    /// per-node-cache or overlay — those only make sense for user volumes).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SiteFsFlags: u8 {
        const READ_ONLY = 0b0001;
        const RECURSIVE = 0b0010;
        const SLAVE     = 0b0100;
        const PRIVATE   = 0b1000;
    }
}

impl SiteFsFlags {
    pub fn parse(tokens: &str) -> Option<Self> {
        let mut flags = SiteFsFlags::empty();
        for tok in tokens.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            flags |= match tok {
                "ro" => SiteFsFlags::READ_ONLY,
                "rec" => SiteFsFlags::RECURSIVE,
                "slave" => SiteFsFlags::SLAVE,
                "private" => SiteFsFlags::PRIVATE,
                _ => return None,
            };
        }
        Some(flags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteFsEntry {
    pub path: PathBuf,
    pub flags: SiteFsFlags,
}

impl SiteFsEntry {
    /// Parses one whitespace-separated token of a `siteFs` value, of the
    /// form `/host/path` or `/host/path:flag1,flag2`.
    pub fn parse(token: &str) -> Option<Self> {
        let mut parts = token.splitn(2, ':');
        let path = parts.next()?.trim();
        if path.is_empty() || !path.starts_with('/') {
            return None;
        }
        let flags = match parts.next() {
            Some(flag_str) => SiteFsFlags::parse(flag_str)?,
            None => SiteFsFlags::empty(),
        };
        Some(SiteFsEntry {
            path: PathBuf::from(path),
            flags,
        })
    }
}

/// A directive modifying the launched process's environment before
/// `execve`, sourced from the `siteEnv` configuration key. Order of
/// directives in the config file is preserved and significant: later
/// directives for the same key win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteEnvDirective {
    Set(String, String),
    Prepend(String, String),
    Append(String, String),
    Unset(String),
    Source(PathBuf),
}

impl SiteEnvDirective {
    /// Parses one `siteEnv` value token, of the form `verb:key=value` (or
    /// `verb:path` for `source`, `unset:key` for `unset`).
    pub fn parse(token: &str) -> Option<Self> {
        let (verb, rest) = token.split_once(':')?;
        match verb {
            "set" => {
                let (k, v) = rest.split_once('=')?;
                Some(SiteEnvDirective::Set(k.to_string(), v.to_string()))
            }
            "prepend" => {
                let (k, v) = rest.split_once('=')?;
                Some(SiteEnvDirective::Prepend(k.to_string(), v.to_string()))
            }
            "append" => {
                let (k, v) = rest.split_once('=')?;
                Some(SiteEnvDirective::Append(k.to_string(), v.to_string()))
            }
            "unset" => Some(SiteEnvDirective::Unset(rest.to_string())),
            "source" => Some(SiteEnvDirective::Source(PathBuf::from(rest))),
            _ => None,
        }
    }
}
