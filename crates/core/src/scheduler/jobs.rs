use async_trait::async_trait;

use crate::eviction::SeedboxSpaceController;
use crate::scanner::CompletionScanner;
use crate::staging::StagingProcessor;

use super::{JobOutcome, PeriodicJob};

#[async_trait]
impl PeriodicJob for CompletionScanner {
    fn name(&self) -> &'static str {
        "scanner"
    }

    async fn run_once(&self) -> JobOutcome {
        let report = self.run().await;
        JobOutcome::from_errors(report.skipped_locked, &report.errors)
    }
}

#[async_trait]
impl PeriodicJob for StagingProcessor {
    fn name(&self) -> &'static str {
        "staging"
    }

    async fn run_once(&self) -> JobOutcome {
        let report = self.run().await;
        JobOutcome::from_errors(report.skipped_locked, &report.errors)
    }
}

#[async_trait]
impl PeriodicJob for SeedboxSpaceController {
    fn name(&self) -> &'static str {
        "eviction"
    }

    async fn run_once(&self) -> JobOutcome {
        let summary = self.run().await;
        JobOutcome::from_errors(summary.skipped_locked, &summary.errors)
    }
}
