//! Staged architecture search over a directory-backed experiment ledger.

pub mod ledger;
pub mod orchestrator;
pub mod record;
pub mod selector;

pub use ledger::{ExperimentLedger, IndexEntry, experiment_dir};
pub use orchestrator::{
    LaunchFailure, LaunchOutcome, LaunchRequest, RunSummary, SearchOrchestrator,
};
pub use record::{ExperimentRecord, HyperParams, VersionId};
pub use selector::{RankedVersion, select_best};
