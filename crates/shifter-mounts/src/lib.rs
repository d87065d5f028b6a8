//! Mount-point inventory. An ordered, de-duplicated set of absolute paths
//! with a tri-state sort tag, built by reading `/proc/self/mounts` and
//! consulted by the UDI builder and teardown so they never issue the same
//! bind mount twice and can unmount everything they staged in reverse
//! order.

use std::cmp::Ordering;
use std::fs;
use std::io::{self, BufRead};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum MountInventoryError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed mount table line: {0:?}")]
    MalformedLine(String),
}

type Result<T> = std::result::Result<T, MountInventoryError>;

/// Sort state of a [`MountInventory`]: `{UNSORTED, FORWARD, REVERSE}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Unsorted,
    Forward,
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Added,
    Duplicate,
}

fn path_cmp(a: &Path, b: &Path) -> Ordering {
    a.as_os_str().as_bytes().cmp(b.as_os_str().as_bytes())
}

/// Ordered sequence of absolute mount-point paths, no duplicates.
#[derive(Debug, Clone, Default)]
pub struct MountInventory {
    entries: Vec<PathBuf>,
    sort: SortOrder,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Unsorted
    }
}

impl MountInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `/proc/self/mounts`, taking the second whitespace-separated
    /// field of each line (the mount point), and inserts each into a fresh
    /// inventory. This is a snapshot: mounts added to the namespace after
    /// the read started may be missed.
    pub fn from_proc() -> Result<Self> {
        let path = Path::new("/proc/self/mounts");
        let file = fs::File::open(path).map_err(|source| MountInventoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(io::BufReader::new(file))
    }

    /// Parses an already-open reader in `/proc/self/mounts` format. Exposed
    /// separately so tests don't need a real mount namespace.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut inv = Self::new();
        for line in reader.lines() {
            let line = line.map_err(|source| MountInventoryError::Io {
                path: PathBuf::from("/proc/self/mounts"),
                source,
            })?;
            let mount_point = line
                .split_whitespace()
                .nth(1)
                .ok_or_else(|| MountInventoryError::MalformedLine(line.clone()))?;
            inv.insert(Path::new(mount_point));
        }
        Ok(inv)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sort_order(&self) -> SortOrder {
        self.sort
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(PathBuf::as_path)
    }

    /// Inserts `path`, maintaining the current sort state. The first insert
    /// into an empty, unsorted inventory establishes `FORWARD` order; later
    /// inserts into an already-sorted inventory are positioned with a
    /// truncated insertion sort (the new element is appended, then bubbled
    /// back into place) rather than a full re-sort.
    pub fn insert(&mut self, path: &Path) -> InsertOutcome {
        if self.find(path).is_some() {
            return InsertOutcome::Duplicate;
        }

        self.entries.push(path.to_path_buf());

        if self.entries.len() == 1 && self.sort == SortOrder::Unsorted {
            self.sort = SortOrder::Forward;
            return InsertOutcome::Added;
        }

        match self.sort {
            SortOrder::Forward | SortOrder::Reverse => self.bubble_last_into_place(),
            SortOrder::Unsorted => self.sort(SortOrder::Forward),
        }

        InsertOutcome::Added
    }

    fn bubble_last_into_place(&mut self) {
        let order = self.sort;
        let mut i = self.entries.len() - 1;
        while i > 0 {
            let cmp = Self::compare(order, &self.entries[i - 1], &self.entries[i]);
            if cmp == Ordering::Greater {
                self.entries.swap(i - 1, i);
                i -= 1;
            } else {
                break;
            }
        }
    }

    fn compare(order: SortOrder, a: &Path, b: &Path) -> Ordering {
        match order {
            SortOrder::Forward => path_cmp(a, b),
            SortOrder::Reverse => path_cmp(a, b).reverse(),
            SortOrder::Unsorted => path_cmp(a, b),
        }
    }

    /// Removes `path` if present, preserving the relative order of the
    /// remaining entries. Returns whether anything was removed.
    pub fn remove(&mut self, path: &Path) -> bool {
        match self.find(path) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Looks up `path`: binary search when sorted, linear scan otherwise.
    pub fn find(&self, path: &Path) -> Option<usize> {
        match self.sort {
            SortOrder::Forward => self
                .entries
                .binary_search_by(|p| path_cmp(p, path))
                .ok(),
            SortOrder::Reverse => self
                .entries
                .binary_search_by(|p| path_cmp(p, path).reverse())
                .ok(),
            SortOrder::Unsorted => self.entries.iter().position(|p| p.as_path() == path),
        }
    }

    /// Returns the entry with the given prefix that sorts first under the
    /// inventory's current order: the lexicographically smallest match in
    /// `FORWARD` order, the largest in `REVERSE` order. Documented as O(n);
    /// a modified binary search is a valid future upgrade.
    pub fn find_starts_with(&self, prefix: &str) -> Option<&Path> {
        if prefix.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|p| p.as_os_str().as_bytes().starts_with(prefix.as_bytes()))
            .map(PathBuf::as_path)
    }

    /// Returns every entry for which `base` is a strict prefix, in the
    /// inventory's current order. Used by teardown to select the mounts
    /// that belong to one UDI.
    pub fn entries_under<'a>(&'a self, base: &'a Path) -> impl Iterator<Item = &'a Path> + 'a {
        self.iter().filter(move |p| is_strict_prefix(base, p))
    }

    /// Transitions the sort state: `UNSORTED` → sorted is a full sort;
    /// flipping between `FORWARD` and `REVERSE` is an in-place reversal.
    pub fn sort(&mut self, order: SortOrder) {
        if order == SortOrder::Unsorted || self.sort == order {
            return;
        }

        if self.sort == SortOrder::Unsorted {
            self.entries
                .sort_by(|a, b| Self::compare(order, a, b));
        } else {
            self.entries.reverse();
        }
        self.sort = order;
    }
}

fn is_strict_prefix(base: &Path, candidate: &Path) -> bool {
    if candidate == base {
        return false;
    }
    candidate.starts_with(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn scenario_a_insert_sequence() {
        let mut inv = MountInventory::new();
        for p in ["/a/b/c", "/c/b/a", "/b/c/a"] {
            inv.insert(Path::new(p));
        }
        assert_eq!(inv.sort_order(), SortOrder::Forward);
        let got: Vec<_> = inv.iter().map(|p| p.to_string_lossy().to_string()).collect();
        assert_eq!(got, vec!["/a/b/c", "/b/c/a", "/c/b/a"]);
        assert_eq!(inv.len(), 3);

        assert!(inv.remove(Path::new("/b/c/a")));
        let got: Vec<_> = inv.iter().map(|p| p.to_string_lossy().to_string()).collect();
        assert_eq!(got, vec!["/a/b/c", "/c/b/a"]);
        assert_eq!(inv.len(), 2);
    }

    #[test]
    fn scenario_b_find_starts_with() {
        let mut inv = MountInventory::new();
        for p in ["abbbcd", "abcd", "abcde", "abctuv", "abdec"] {
            inv.insert(Path::new(p));
        }
        assert_eq!(inv.sort_order(), SortOrder::Forward);
        assert_eq!(
            inv.find_starts_with("abc").unwrap().to_str().unwrap(),
            "abcd"
        );

        inv.sort(SortOrder::Reverse);
        assert_eq!(
            inv.find_starts_with("ab").unwrap().to_str().unwrap(),
            "abdec"
        );
    }

    #[test]
    fn duplicate_insert_rejected() {
        let mut inv = MountInventory::new();
        assert_eq!(inv.insert(Path::new("/a")), InsertOutcome::Added);
        assert_eq!(inv.insert(Path::new("/a")), InsertOutcome::Duplicate);
        assert_eq!(inv.len(), 1);
    }

    #[test]
    fn sort_flip_idempotence() {
        let mut inv = MountInventory::new();
        for p in ["/z", "/a", "/m", "/b"] {
            inv.insert(Path::new(p));
        }
        inv.sort(SortOrder::Forward);
        let once: Vec<_> = inv.iter().map(Path::to_path_buf).collect();

        inv.sort(SortOrder::Forward);
        inv.sort(SortOrder::Reverse);
        inv.sort(SortOrder::Forward);
        let twice: Vec<_> = inv.iter().map(Path::to_path_buf).collect();

        assert_eq!(once, twice);
    }

    #[test]
    fn entries_under_is_strict_prefix() {
        let mut inv = MountInventory::new();
        for p in ["/mnt/udi", "/mnt/udi/etc", "/mnt/udiX", "/mnt"] {
            inv.insert(Path::new(p));
        }
        let under: Vec<_> = inv
            .entries_under(Path::new("/mnt/udi"))
            .map(Path::to_path_buf)
            .collect();
        assert_eq!(under, vec![PathBuf::from("/mnt/udi/etc")]);
    }

    #[test]
    fn from_reader_takes_second_field_and_dedupes() {
        let data = "none /proc proc rw 0 0\nnone /proc proc rw 0 0\ntmpfs /tmp tmpfs rw 0 0\n";
        let inv = MountInventory::from_reader(data.as_bytes()).unwrap();
        assert_eq!(inv.len(), 2);
    }

    quickcheck! {
        fn forward_sort_is_monotonic_and_complete(paths: Vec<String>) -> bool {
            let mut inv = MountInventory::new();
            let mut unique = std::collections::BTreeSet::new();
            for p in &paths {
                let p = format!("/{}", p.replace('\0', ""));
                if unique.insert(p.clone()) {
                    inv.insert(Path::new(&p));
                }
            }
            inv.sort(SortOrder::Forward);
            let got: Vec<_> = inv.iter().map(|p| p.to_path_buf()).collect();
            let sorted_ok = got.windows(2).all(|w| path_cmp(&w[0], &w[1]) != Ordering::Greater);
            sorted_ok && got.len() == unique.len()
        }
    }
}
