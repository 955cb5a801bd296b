pub mod bulk_move;
pub mod cleanup;
pub mod config;
pub mod eviction;
pub mod library;
pub mod metrics;
pub mod operator;
pub mod remote;
pub mod run_lock;
pub mod scanner;
pub mod scheduler;
pub mod staging;
pub mod store;
pub mod testing;
pub mod torrent_client;

pub use bulk_move::{BulkMoveCoordinator, BulkMoveError, MoveItem, MoveStatus};
pub use cleanup::{CleanupBoundary, CleanupError, CleanupGuard, CleanupReport};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use eviction::{EvictionSummary, SeedboxSpaceController};
pub use library::{Catalogs, LibraryCatalog, MediaServer};
pub use operator::{Operator, OperatorError};
pub use remote::{RemoteConnector, RemoteSession};
pub use run_lock::{RunLockError, RunLocks};
pub use scanner::{CompletionScanner, ScanReport};
pub use scheduler::{JobOutcome, PeriodicJob, Scheduler, SchedulerStatus};
pub use staging::{StagingProcessor, StagingReport};
pub use store::{open_state_store, StateStore, StoreError, TorrentRecord, TorrentStatus};
pub use torrent_client::{TorrentClient, TorrentClientError};
