use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What a mutation does when it arrives during a metadata rebuild.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPolicy {
    /// Wait for the rebuild to finish.
    #[default]
    Block,
    /// Fail immediately with `Unavailable`.
    Fail,
}

/// Tuning for a [`PathStore`](crate::PathStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub rebuild_policy: RebuildPolicy,
    /// Journal the meta table into the reserved subtree.
    pub persist_meta: bool,
    /// Compare the loaded journal with backend content when opening.
    pub verify_on_open: bool,
    /// Refuse to open on a verification mismatch instead of rebuilding.
    pub strict_integrity: bool,
    /// Longest a mutation waits for an overlapping subtree to be released.
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            rebuild_policy: RebuildPolicy::Block,
            persist_meta: true,
            verify_on_open: true,
            strict_integrity: false,
            lock_timeout: Duration::from_secs(30),
        }
    }
}

impl StoreConfig {
    /// No journal and no open-time verification; for scratch stores.
    pub fn ephemeral() -> Self {
        Self {
            persist_meta: false,
            verify_on_open: false,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert_eq!(c.rebuild_policy, RebuildPolicy::Block);
        assert_eq!(c.lock_timeout, Duration::from_secs(30));
        assert!(c.persist_meta);
        assert!(c.verify_on_open);
        assert!(!c.strict_integrity);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: StoreConfig = serde_json::from_str(r#"{"rebuild_policy":"fail"}"#).unwrap();
        assert_eq!(c.rebuild_policy, RebuildPolicy::Fail);
        assert!(c.persist_meta);
    }
}
