use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use secstore_types::MetaDigest;

/// Notification that the metadata was rebuilt after a restore.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreEvent {
    /// Sequence number, starting at 1 for each coordinator.
    pub id: u64,
    /// Namespace digest after the rebuild.
    pub digest: MetaDigest,
    /// Leaves covered by the rebuilt digest.
    pub leaf_count: usize,
    pub completed_at: DateTime<Utc>,
}

impl RestoreEvent {
    pub fn new(id: u64, digest: MetaDigest, leaf_count: usize) -> Self {
        Self {
            id,
            digest,
            leaf_count,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_timestamp() {
        let event = RestoreEvent::new(3, MetaDigest::null(), 0);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"id\":3"));
        let back: RestoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
