use std::sync::Arc;

use seedsync_core::{
    BulkMoveCoordinator, CompletionScanner, Config, Operator, SanitizedConfig, Scheduler,
    SeedboxSpaceController, StagingProcessor, StateStore,
};

/// Shared application state
pub struct AppState {
    config: Config,
    store: Arc<dyn StateStore>,
    scanner: Arc<CompletionScanner>,
    staging: Arc<StagingProcessor>,
    eviction: Arc<SeedboxSpaceController>,
    operator: Operator,
    bulk_move: BulkMoveCoordinator,
    scheduler: Arc<Scheduler>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        store: Arc<dyn StateStore>,
        scanner: Arc<CompletionScanner>,
        staging: Arc<StagingProcessor>,
        eviction: Arc<SeedboxSpaceController>,
        operator: Operator,
        bulk_move: BulkMoveCoordinator,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            config,
            store,
            scanner,
            staging,
            eviction,
            operator,
            bulk_move,
            scheduler,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    pub fn scanner(&self) -> &CompletionScanner {
        &self.scanner
    }

    pub fn staging(&self) -> &StagingProcessor {
        &self.staging
    }

    pub fn eviction(&self) -> &SeedboxSpaceController {
        &self.eviction
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn bulk_move(&self) -> &BulkMoveCoordinator {
        &self.bulk_move
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}
