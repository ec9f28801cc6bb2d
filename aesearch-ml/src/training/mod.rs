//! Training interface: the collaborator trait and the metrics it reports.

pub mod metrics;
pub mod trainer;

pub use metrics::TrainingMetrics;
pub use trainer::{ReconstructionProbe, Trainer};
