//! Bulk moves of whole catalog entries to new root folders.
//!
//! The catalog's move command returns before the files have moved, so
//! completion is confirmed by polling until the entry's old folder is gone.
//! Items run strictly one after another and the first failure stops the
//! batch.

mod coordinator;
mod types;

use serde::{Deserialize, Serialize};

pub use coordinator::BulkMoveCoordinator;
pub use types::{BatchState, BulkMoveError, CompletedMove, FailedMove, MoveItem, MoveStatus};

/// Bulk move configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkMoveConfig {
    /// How often to check whether a moved folder is gone (default: 5s).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up on one item after this long (default: 2h).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_timeout_ms() -> u64 {
    2 * 60 * 60 * 1000
}

impl Default for BulkMoveConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BulkMoveConfig::default();
        assert_eq!(config.poll_interval_ms, 5_000);
        assert_eq!(config.timeout_ms, 7_200_000);
    }

    #[test]
    fn test_move_item_deserialization() {
        let item: MoveItem = serde_json::from_str(
            r#"{"media_id": 7, "app_type": "sonarr", "destination_path": "/mnt/shows"}"#,
        )
        .unwrap();
        assert_eq!(item.app_type, crate::store::AppType::Sonarr);
        assert!(item.plex_ref_key.is_none());
    }
}
