//! The `-N <node-spec>` mini-format: space-separated `host/k` tokens,
//! each expanding to `k` repeated `<ip> <host>` lines in `/etc/hosts`.

use crate::error::{ShifterError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpecEntry {
    pub host: String,
    pub task_slots: u32,
}

/// Parses the full space-separated node-spec argument.
pub fn parse(spec: &str) -> Result<Vec<NodeSpecEntry>> {
    spec.split_whitespace().map(parse_token).collect()
}

fn parse_token(token: &str) -> Result<NodeSpecEntry> {
    let invalid = |reason: &str| ShifterError::InvalidNodeSpec {
        token: token.to_string(),
        reason: reason.to_string(),
    };

    let (host, slots) = token.split_once('/').ok_or_else(|| invalid("missing '/k' suffix"))?;
    if host.is_empty() {
        return Err(invalid("empty hostname"));
    }
    let task_slots: u32 = slots.parse().map_err(|_| invalid("slot count is not a positive integer"))?;
    if task_slots == 0 {
        return Err(invalid("slot count must be positive"));
    }

    Ok(NodeSpecEntry {
        host: host.to_string(),
        task_slots,
    })
}

/// Renders the parsed node-spec into `/etc/hosts` lines, one per task
/// slot, addressed at `ip` (the loopback address is the common case for a
/// single-node job).
pub fn render_hosts_lines(entries: &[NodeSpecEntry], ip: &str) -> Vec<String> {
    entries
        .iter()
        .flat_map(|e| std::iter::repeat(format!("{ip} {}", e.host)).take(e.task_slots as usize))
        .collect()
}
