use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether an enumerated entry holds content or has children.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// A leaf holding stored bytes.
    File,
    /// An interior node with at least one descendant leaf.
    Directory,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Directory => f.write_str("dir"),
        }
    }
}

/// One immediate child of an enumerated path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    /// The final path segment.
    pub name: String,
    pub kind: EntryKind,
}

impl Entry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }

    /// Returns `true` if the entry holds content rather than children.
    pub fn is_leaf(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Capacity snapshot of the storage namespace.
///
/// Values are not transactionally consistent with concurrent mutations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceStats {
    /// Total capacity in bytes.
    pub total: u64,
    /// Available bytes.
    pub free: u64,
}

impl SpaceStats {
    /// Bytes currently in use.
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_constructors() {
        assert!(Entry::file("a").is_leaf());
        assert!(!Entry::directory("b").is_leaf());
        assert_eq!(format!("{}", EntryKind::Directory), "dir");
    }

    #[test]
    fn used_space_saturates() {
        let stats = SpaceStats { total: 100, free: 30 };
        assert_eq!(stats.used(), 70);
        let odd = SpaceStats { total: 10, free: 20 };
        assert_eq!(odd.used(), 0);
    }
}
