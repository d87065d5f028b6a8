//! A small line-oriented `KEY<delim>VALUE` reader, shared between the main
//! site configuration (delim `=`) and tabular auxiliary files such as the
//! image manifest (delim `:`).

use std::fs;
use std::path::Path;

use crate::error::{ConfigError, Result};

/// One logical (post-continuation-join) line of a config-style file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// 1-indexed line number of the first physical line this entry started on.
    pub line: usize,
    pub key: String,
    pub value: String,
}

/// Reads `path`, stripping `#`-comments, joining trailing-`\` continuation
/// lines with a single space, and splitting each logical line on the first
/// occurrence of `delim`. Blank logical lines are skipped. Lines with no
/// `delim` at all are reported as `MalformedConfig`.
pub fn read_entries(path: &Path, delim: char) -> Result<Vec<Entry>> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut entries = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, physical) in raw.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = physical.trim_end();

        let (start_line, mut joined) = match pending.take() {
            Some((start, mut acc)) => {
                acc.push(' ');
                acc.push_str(trimmed.trim_start());
                (start, acc)
            }
            None => (line_no, trimmed.to_string()),
        };

        if let Some(stripped) = joined.strip_suffix('\\') {
            joined = stripped.to_string();
            pending = Some((start_line, joined));
            continue;
        }

        let content = joined.trim();
        if content.is_empty() || content.starts_with('#') {
            continue;
        }

        match content.split_once(delim) {
            Some((key, value)) => entries.push(Entry {
                line: start_line,
                key: key.trim().to_string(),
                value: value.trim().to_string(),
            }),
            None => {
                return Err(ConfigError::MalformedConfig {
                    path: path.to_path_buf(),
                    line: start_line,
                    reason: format!("no {delim:?} delimiter found"),
                })
            }
        }
    }

    if let Some((start, _)) = pending {
        return Err(ConfigError::MalformedConfig {
            path: path.to_path_buf(),
            line: start,
            reason: "file ends with a dangling line continuation".to_string(),
        });
    }

    Ok(entries)
}
