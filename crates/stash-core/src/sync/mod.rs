//! Offline-first sync engine.

mod apply;
mod deferred;
mod orchestrator;
mod pending_log;

pub use deferred::{DeferredReconciliationQueue, ReconcileConfig, ReconcileReport};
pub use orchestrator::{
    DrainReport, OrchestratorConfig, SyncOrchestrator, SyncOutcome, SyncReport,
};
pub use pending_log::PendingOperationLog;
