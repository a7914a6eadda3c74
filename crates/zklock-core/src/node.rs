//! Candidate node naming.
//!
//! A candidate is a child of the lock path named `read-<seq>` or
//! `write-<seq>`, where `<seq>` is the decimal sequence number appended by
//! the coordination service. Ordering between candidates uses the sequence
//! number only; the prefix never participates.

use std::fmt;

/// Kind of access a candidate requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Shared access.
    Read,
    /// Exclusive access.
    Write,
}

impl NodeKind {
    /// Name prefix including the separator.
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Read => "read-",
            Self::Write => "write-",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Parsed candidate node name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateNode {
    /// Node name as listed under the lock path.
    pub name: String,
    /// Requested access.
    pub kind: NodeKind,
    /// Service-assigned sequence number.
    pub seq: u64,
}

impl CandidateNode {
    /// Parse a child name. Returns `None` for names outside the scheme.
    pub fn parse(name: &str) -> Option<Self> {
        let (kind, digits) = if let Some(rest) = name.strip_prefix(NodeKind::Read.prefix()) {
            (NodeKind::Read, rest)
        } else if let Some(rest) = name.strip_prefix(NodeKind::Write.prefix()) {
            (NodeKind::Write, rest)
        } else {
            return None;
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let seq = digits.parse().ok()?;

        Some(Self { name: name.to_string(), kind, seq })
    }

    /// Parse the last segment of a full node path.
    pub fn from_path(path: &str) -> Option<Self> {
        Self::parse(path.rsplit('/').next().unwrap_or(path))
    }
}

/// Candidates among `children`, sorted ascending by sequence number.
///
/// Children that do not follow the naming scheme are dropped.
pub fn sibling_set<S: AsRef<str>>(children: &[S]) -> Vec<CandidateNode> {
    let mut siblings: Vec<_> = children
        .iter()
        .filter_map(|name| {
            let parsed = CandidateNode::parse(name.as_ref());
            if parsed.is_none() {
                tracing::debug!(child = name.as_ref(), "ignoring foreign child");
            }
            parsed
        })
        .collect();
    siblings.sort_by_key(|node| node.seq);
    siblings
}
