//! Index declarations and lifecycle states.

use serde::{Deserialize, Serialize};

use crate::record::KeyPath;

/// Default HyperLogLog precision for distinct-approximation indexes
/// (2^14 registers, roughly 0.8% standard error).
pub const DEFAULT_DISTINCT_PRECISION: u8 = 14;

/// Which adjacency rows a graph index materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphDirection {
    /// Rows keyed by the from-node: `from / edge / to`.
    Outgoing,
    /// Rows keyed by the to-node: `to / edge / from`.
    Incoming,
    /// Both row families.
    Undirected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexKind {
    Scalar,
    Count,
    Sum,
    Min,
    Max,
    Average,
    Distinct {
        precision: u8,
    },
    Bitmap,
    Graph {
        direction: GraphDirection,
        edge_path: KeyPath,
    },
    TimeWindowLeaderboard {
        /// Window width in seconds.
        window: u64,
        /// How many windows to retain per group.
        window_count: u32,
        /// How many leading key paths form the group tuple.
        group_by: usize,
    },
}

/// Lifecycle stage of an index.
///
/// New indexes come up `Disabled`, are switched to `WriteOnly` while being
/// backfilled, and serve reads only once `Readable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IndexState {
    Disabled,
    WriteOnly,
    #[default]
    Readable,
}

impl IndexState {
    pub fn should_maintain(&self) -> bool {
        !matches!(self, IndexState::Disabled)
    }

    pub fn is_readable(&self) -> bool {
        matches!(self, IndexState::Readable)
    }

    pub fn to_byte(self) -> u8 {
        match self {
            IndexState::Disabled => 0,
            IndexState::WriteOnly => 1,
            IndexState::Readable => 2,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(IndexState::Disabled),
            1 => Some(IndexState::WriteOnly),
            2 => Some(IndexState::Readable),
            _ => None,
        }
    }
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IndexState::Disabled => "disabled",
            IndexState::WriteOnly => "write-only",
            IndexState::Readable => "readable",
        };
        write!(f, "{name}")
    }
}

/// Static declaration of one index over a record type.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescriptor {
    pub name: String,
    pub kind: IndexKind,
    /// Fields extracted to form the index value tuple, in order. Aggregate
    /// kinds treat the trailing path as the aggregated value and the leading
    /// paths as the group; graph kinds use `[from, to]`.
    pub key_paths: Vec<KeyPath>,
    pub unique: bool,
    /// State assumed when no persisted state entry exists yet.
    pub initial_state: IndexState,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>, kind: IndexKind, key_paths: Vec<KeyPath>) -> Self {
        Self {
            name: name.into(),
            kind,
            key_paths,
            unique: false,
            initial_state: IndexState::default(),
        }
    }

    pub fn scalar(name: impl Into<String>, key_paths: Vec<KeyPath>) -> Self {
        Self::new(name, IndexKind::Scalar, key_paths)
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_initial_state(mut self, state: IndexState) -> Self {
        self.initial_state = state;
        self
    }

    /// The group/value split used by aggregate kinds: every path but the
    /// last forms the group, the last is the aggregated value.
    pub fn group_paths(&self) -> &[KeyPath] {
        let len = self.key_paths.len();
        &self.key_paths[..len.saturating_sub(1)]
    }

    pub fn value_path(&self) -> Option<KeyPath> {
        self.key_paths.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(!IndexState::Disabled.should_maintain());
        assert!(IndexState::WriteOnly.should_maintain());
        assert!(IndexState::Readable.should_maintain());

        assert!(!IndexState::Disabled.is_readable());
        assert!(!IndexState::WriteOnly.is_readable());
        assert!(IndexState::Readable.is_readable());
    }

    #[test]
    fn test_state_byte_roundtrip() {
        for state in [
            IndexState::Disabled,
            IndexState::WriteOnly,
            IndexState::Readable,
        ] {
            assert_eq!(IndexState::from_byte(state.to_byte()), Some(state));
        }
        assert_eq!(IndexState::from_byte(9), None);
    }

    #[test]
    fn test_group_value_split() {
        let descriptor = IndexDescriptor::new(
            "amount_by_category",
            IndexKind::Sum,
            vec!["category", "amount"],
        );
        assert_eq!(descriptor.group_paths(), &["category"]);
        assert_eq!(descriptor.value_path(), Some("amount"));
    }
}
