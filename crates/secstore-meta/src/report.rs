use std::fmt;

use secstore_types::{MetaDigest, StoragePath};

/// Outcome of comparing tracked metadata with actual backend content.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Root digest held by the meta table.
    pub expected_root: MetaDigest,
    /// Root digest recomputed from the backend.
    pub actual_root: MetaDigest,
    /// Leaves whose content no longer matches the recorded digest.
    pub modified: Vec<StoragePath>,
    /// Leaves recorded in the table but absent from the backend.
    pub missing: Vec<StoragePath>,
    /// Leaves present in the backend but unknown to the table.
    pub unexpected: Vec<StoragePath>,
}

impl IntegrityReport {
    /// Returns `true` if the backend matches the table exactly.
    pub fn is_clean(&self) -> bool {
        self.expected_root == self.actual_root
            && self.modified.is_empty()
            && self.missing.is_empty()
            && self.unexpected.is_empty()
    }

    /// Total number of discrepancies.
    pub fn issue_count(&self) -> usize {
        self.modified.len() + self.missing.len() + self.unexpected.len()
    }
}

impl fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "clean (root {})", self.expected_root.short_hex());
        }
        write!(
            f,
            "{} issue(s): {} modified, {} missing, {} unexpected (expected {}, actual {})",
            self.issue_count(),
            self.modified.len(),
            self.missing.len(),
            self.unexpected.len(),
            self.expected_root.short_hex(),
            self.actual_root.short_hex(),
        )
    }
}
