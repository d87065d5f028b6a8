//! User volume-map grammar, validation, and signature. Parses the
//! `-v`/`--volume` argument of `setupRoot`.

pub mod error;
mod path;

use std::path::{Path, PathBuf};

pub use error::{Result, VolumeMapError};
pub use path::clean_path;

const RESERVED_DESTINATIONS: &[&str] = &["/etc", "/var", "/proc", "/sys", "/dev", "/tmp", "/"];

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VolumeFlags: u8 {
        const READ_ONLY      = 0b0000_0001;
        const RECURSIVE      = 0b0000_0010;
        const SLAVE          = 0b0000_0100;
        const PRIVATE        = 0b0000_1000;
        const PER_NODE_CACHE = 0b0001_0000;
        const OVERLAY        = 0b0010_0000;
    }
}

/// Attributes of a `perNodeCache=...` flag token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PerNodeCacheAttrs {
    pub fs_type: Option<String>,
    pub size_bytes: Option<u64>,
    pub block_size: Option<u64>,
    pub method: Option<String>,
    pub unique_cache_name: Option<String>,
}

/// The closed vocabulary of `perNodeCache=key=value;...` attribute names,
/// shared with [`find_entry_boundary`]'s lookahead so the nested grammar
/// is recognized consistently in both places.
const PNC_ATTR_KEYS: &[&str] = &["fsType", "sizeBytes", "blockSize", "method", "uniqueCacheName"];

impl PerNodeCacheAttrs {
    fn set(&mut self, key: &str, value: &str) -> bool {
        match key {
            "fsType" => self.fs_type = Some(value.to_string()),
            "sizeBytes" => self.size_bytes = value.parse().ok(),
            "blockSize" => self.block_size = value.parse().ok(),
            "method" => self.method = Some(value.to_string()),
            "uniqueCacheName" => self.unique_cache_name = Some(value.to_string()),
            _ => return false,
        }
        true
    }

    /// Re-serializes in a fixed, canonical key order regardless of the
    /// order the site/user supplied them in.
    fn serialize(&self) -> String {
        let mut parts = Vec::new();
        if let Some(v) = &self.fs_type {
            parts.push(format!("fsType={v}"));
        }
        if let Some(v) = self.size_bytes {
            parts.push(format!("sizeBytes={v}"));
        }
        if let Some(v) = self.block_size {
            parts.push(format!("blockSize={v}"));
        }
        if let Some(v) = &self.method {
            parts.push(format!("method={v}"));
        }
        if let Some(v) = &self.unique_cache_name {
            parts.push(format!("uniqueCacheName={v}"));
        }
        parts.join(";")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeEntry {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub flags: VolumeFlags,
    pub cache: Option<PerNodeCacheAttrs>,
}

impl VolumeEntry {
    fn serialize(&self) -> String {
        let mut s = format!(
            "{}:{}",
            self.source.display(),
            self.destination.display()
        );
        let tokens = self.flag_tokens();
        if !tokens.is_empty() {
            s.push(':');
            s.push_str(&tokens.join(","));
        }
        s
    }

    fn flag_tokens(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        if self.flags.contains(VolumeFlags::READ_ONLY) {
            tokens.push("ro".to_string());
        }
        if self.flags.contains(VolumeFlags::RECURSIVE) {
            tokens.push("rec".to_string());
        }
        if self.flags.contains(VolumeFlags::SLAVE) {
            tokens.push("slave".to_string());
        }
        if self.flags.contains(VolumeFlags::PRIVATE) {
            tokens.push("private".to_string());
        }
        if self.flags.contains(VolumeFlags::PER_NODE_CACHE) {
            let attrs = self.cache.clone().unwrap_or_default();
            tokens.push(format!("perNodeCache={}", attrs.serialize()));
        }
        if self.flags.contains(VolumeFlags::OVERLAY) {
            tokens.push("overlay".to_string());
        }
        tokens
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeMap {
    pub entries: Vec<VolumeEntry>,
}

impl VolumeMap {
    /// Parses `input` against the volume-map grammar, validating each
    /// destination as it's produced. `site_fs_paths` are additional
    /// reserved prefixes (the site's declared bind mounts) a destination
    /// must not conflict with.
    pub fn parse(input: &str, site_fs_paths: &[PathBuf]) -> Result<VolumeMap> {
        let mut entries = Vec::new();
        let mut rest = input;

        while !rest.is_empty() {
            let boundary = find_entry_boundary(rest);
            let entry_text = &rest[..boundary];
            let entry = parse_entry(entry_text, &entries, site_fs_paths)?;
            entries.push(entry);

            rest = &rest[boundary..];
            if let Some(stripped) = rest.strip_prefix(';') {
                rest = stripped;
            } else {
                break;
            }
        }

        Ok(VolumeMap { entries })
    }

    /// Deterministic string `src1:dst1:flags1;src2:dst2:flags2;…`, flags
    /// re-serialized in canonical order.
    pub fn signature(&self) -> String {
        self.entries
            .iter()
            .map(VolumeEntry::serialize)
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Finds the index of the top-level `;` that ends the current entry (or
/// the input's length if there isn't one). A `;` embedded inside a
/// `perNodeCache=...` flag token's `key=value;key=value` list does not
/// count, but that list uses the very same separator as the one between
/// entries, so the nested state can't be exited on a fixed delimiter
/// alone: each `;` encountered while inside `perNodeCache=` is resolved by
/// looking ahead — if what follows is itself a `key=value` pair from the
/// closed attribute vocabulary, the `;` is part of the nested list and
/// consumed; otherwise it's the entry separator and ends the scan there.
/// A `,` always closes the nested state, since that's where the
/// surrounding comma-separated flag list resumes.
fn find_entry_boundary(s: &str) -> usize {
    const MARKER: &str = "perNodeCache=";
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut in_pnc = false;

    while i < bytes.len() {
        if !in_pnc && s[i..].starts_with(MARKER) {
            in_pnc = true;
            i += MARKER.len();
            continue;
        }
        match bytes[i] {
            b',' if in_pnc => {
                in_pnc = false;
                i += 1;
            }
            b';' if in_pnc => {
                if starts_with_pnc_attr_pair(&s[i + 1..]) {
                    i += 1;
                } else {
                    in_pnc = false;
                    return i;
                }
            }
            b';' => return i,
            _ => i += 1,
        }
    }
    s.len()
}

/// Whether `rest` begins with a `key=value` pair whose key is one of the
/// closed `perNodeCache` attribute names — the lookahead
/// [`find_entry_boundary`] uses to tell a nested attribute separator from
/// the entry separator, since both are `;`.
fn starts_with_pnc_attr_pair(rest: &str) -> bool {
    let token_end = rest.find([';', ',']).unwrap_or(rest.len());
    match rest[..token_end].split_once('=') {
        Some((key, _)) => PNC_ATTR_KEYS.contains(&key),
        None => false,
    }
}

fn parse_entry(
    text: &str,
    existing: &[VolumeEntry],
    site_fs_paths: &[PathBuf],
) -> Result<VolumeEntry> {
    let invalid = |reason: &str| VolumeMapError::InvalidVolumeMap {
        entry: text.to_string(),
        reason: reason.to_string(),
    };

    let mut parts = text.splitn(3, ':');
    let source = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| invalid("missing source"))?;
    let destination = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("missing destination"))?;
    let flags_str = parts.next().unwrap_or("");

    let dest_path = validate_destination(destination, existing, site_fs_paths)
        .map_err(|_| invalid("destination reserved, relative, or conflicting"))?;

    let (flags, cache) = parse_flags(flags_str).map_err(|reason| invalid(&reason))?;

    Ok(VolumeEntry {
        source: PathBuf::from(source),
        destination: dest_path,
        flags,
        cache,
    })
}

fn validate_destination(
    raw: &str,
    existing: &[VolumeEntry],
    site_fs_paths: &[PathBuf],
) -> std::result::Result<PathBuf, ()> {
    if !raw.starts_with('/') {
        return Err(());
    }
    if path::contains_parent_segment(raw) {
        return Err(());
    }

    let cleaned = path::clean_path(raw);
    let cleaned_path = PathBuf::from(&cleaned);

    for reserved in RESERVED_DESTINATIONS {
        let reserved_path = Path::new(reserved);
        if cleaned_path == reserved_path || cleaned_path.starts_with(reserved_path) {
            return Err(());
        }
    }

    for prior in existing {
        if cleaned_path == prior.destination || cleaned_path.starts_with(&prior.destination) {
            return Err(());
        }
    }

    for site_path in site_fs_paths {
        if cleaned_path == *site_path || cleaned_path.starts_with(site_path) {
            return Err(());
        }
    }

    Ok(cleaned_path)
}

fn parse_flags(s: &str) -> std::result::Result<(VolumeFlags, Option<PerNodeCacheAttrs>), String> {
    let mut flags = VolumeFlags::empty();
    let mut cache = None;

    for tok in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if let Some(rest) = tok.strip_prefix("perNodeCache=") {
            flags |= VolumeFlags::PER_NODE_CACHE;
            let mut attrs = PerNodeCacheAttrs::default();
            for pair in rest.split(';').filter(|p| !p.is_empty()) {
                let (k, v) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("malformed perNodeCache attribute {pair:?}"))?;
                if !attrs.set(k, v) {
                    return Err(format!("unknown perNodeCache attribute {k:?}"));
                }
            }
            cache = Some(attrs);
            continue;
        }
        flags |= match tok {
            "ro" => VolumeFlags::READ_ONLY,
            "rec" => VolumeFlags::RECURSIVE,
            "slave" => VolumeFlags::SLAVE,
            "private" => VolumeFlags::PRIVATE,
            "overlay" => VolumeFlags::OVERLAY,
            other => return Err(format!("unknown flag {other:?}")),
        };
    }

    Ok((flags, cache))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn scenario_c_basic_parse() {
        let map = VolumeMap::parse("/scratch:/data;/home:/home:ro", &[]).unwrap();
        assert_eq!(map.entries.len(), 2);
        assert!(map.entries[1].flags.contains(VolumeFlags::READ_ONLY));
        assert_eq!(map.signature(), "/scratch:/data;/home:/home:ro");
    }

    #[test]
    fn scenario_c_reserved_destination_rejected() {
        let err = VolumeMap::parse("/scratch:/etc", &[]).unwrap_err();
        assert!(matches!(err, VolumeMapError::InvalidVolumeMap { .. }));
    }

    #[test]
    fn per_node_cache_semicolons_do_not_split_entry() {
        let map = VolumeMap::parse(
            "/scratch:/burst:perNodeCache=fsType=ext4;sizeBytes=1048576;/home:/home:ro",
            &[],
        )
        .unwrap();
        assert_eq!(map.entries.len(), 2);
        let cache = map.entries[0].cache.as_ref().unwrap();
        assert_eq!(cache.fs_type.as_deref(), Some("ext4"));
        assert_eq!(cache.size_bytes, Some(1048576));
        assert!(map.entries[1].flags.contains(VolumeFlags::READ_ONLY));
    }

    #[test]
    fn relative_destination_rejected() {
        let err = VolumeMap::parse("/scratch:data", &[]).unwrap_err();
        assert!(matches!(err, VolumeMapError::InvalidVolumeMap { .. }));
    }

    #[test]
    fn parent_segment_rejected() {
        let err = VolumeMap::parse("/scratch:/data/../etc", &[]).unwrap_err();
        assert!(matches!(err, VolumeMapError::InvalidVolumeMap { .. }));
    }

    #[test]
    fn conflicting_with_site_fs_rejected() {
        let site = vec![PathBuf::from("/opt/site")];
        let err = VolumeMap::parse("/scratch:/opt/site/sub", &site).unwrap_err();
        assert!(matches!(err, VolumeMapError::InvalidVolumeMap { .. }));
    }

    #[test]
    fn duplicate_destination_within_request_rejected() {
        let err = VolumeMap::parse("/a:/data;/b:/data", &[]).unwrap_err();
        assert!(matches!(err, VolumeMapError::InvalidVolumeMap { .. }));
    }

    quickcheck! {
        fn round_trip(names: Vec<String>) -> bool {
            let safe: Vec<String> = names
                .into_iter()
                .map(|n| n.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>())
                .filter(|n| !n.is_empty())
                .take(4)
                .collect();
            if safe.is_empty() {
                return true;
            }
            let input = safe
                .iter()
                .enumerate()
                .map(|(i, n)| format!("/src{i}/{n}:/dst{i}/{n}"))
                .collect::<Vec<_>>()
                .join(";");
            let first = match VolumeMap::parse(&input, &[]) {
                Ok(m) => m,
                Err(_) => return true,
            };
            let sig = first.signature();
            let second = VolumeMap::parse(&sig, &[]).unwrap();
            first == second
        }
    }
}
