//! Experiment records: the hyperparameter snapshot and per-run outcome.

use aesearch_core::{Device, ModelClass, ModelType, SearchStage, SessionConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::arch::ArchitectureDescriptor;
use crate::error::MlError;
use crate::training::TrainingMetrics;

/// `version_<k>` directory name within an experiment directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId(pub u32);

impl VersionId {
    const PREFIX: &'static str = "version_";

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

impl FromStr for VersionId {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(Self::PREFIX)
            .and_then(|n| n.parse().ok())
            .map(VersionId)
            .ok_or_else(|| MlError::not_found(format!("'{s}' is not a version directory name")))
    }
}

impl TryFrom<String> for VersionId {
    type Error = MlError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<VersionId> for String {
    fn from(v: VersionId) -> Self {
        v.to_string()
    }
}

/// Full hyperparameter and architecture bundle of one launch, exported as
/// `hparams.json` and embedded in `meta_tags.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    pub search_type: SearchStage,
    pub model_type: ModelType,
    pub model_class: ModelClass,
    pub experiment_name: String,
    pub n_ae_latents: usize,
    pub learning_rate: f64,
    pub architecture: ArchitectureDescriptor,
    /// `meta_tags.json` of the run this launch was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_architecture: Option<PathBuf>,
    /// Position in the persisted architecture list (`initial` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_index: Option<usize>,
    pub max_n_epochs: usize,
    pub min_n_epochs: usize,
    pub enable_early_stop: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_stop_history: Option<usize>,
    pub export_latents: bool,
    pub device: Device,
    pub rng_seed_data: u64,
    pub rng_seed_model: u64,
    pub val_check_interval: usize,
    pub l2_reg: f64,
    pub train_frac: f64,
    #[serde(flatten)]
    pub session: SessionConfig,
}

impl HyperParams {
    /// SHA-256 over what makes two launches the same experiment: stage, architecture,
    /// bottleneck width, and learning rate.
    pub fn fingerprint(&self) -> String {
        let key = serde_json::json!({
            "search_type": self.search_type,
            "architecture": self.architecture,
            "n_ae_latents": self.n_ae_latents,
            "learning_rate": self.learning_rate,
        });
        let mut hasher = Sha256::new();
        hasher.update(key.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// One run's snapshot and outcome (`meta_tags.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub version: VersionId,
    pub run_id: String,
    pub fingerprint: String,
    pub training_completed: bool,
    pub hparams: HyperParams,
    #[serde(default)]
    pub metrics: TrainingMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExperimentRecord {
    pub fn new(version: VersionId, hparams: HyperParams) -> Self {
        let now = Utc::now();
        Self {
            version,
            run_id: uuid::Uuid::new_v4().to_string(),
            fingerprint: hparams.fingerprint(),
            training_completed: false,
            hparams,
            metrics: TrainingMetrics::default(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn best_val_loss(&self) -> Option<f64> {
        self.metrics.best_val_loss()
    }

    pub fn mark_completed(&mut self, metrics: TrainingMetrics) {
        self.metrics = metrics;
        self.training_completed = true;
        self.error = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, metrics: TrainingMetrics, error: &MlError) {
        self.metrics = metrics;
        self.training_completed = false;
        self.error = Some(error.to_string());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::arch::{InputDim, LayerSpec};
    use pretty_assertions::assert_eq;

    pub(crate) fn sample_hparams() -> HyperParams {
        let arch = ArchitectureDescriptor::mirrored(
            InputDim::new(1, 16, 16),
            4,
            vec![LayerSpec::conv(1, 4, 3, 2, 1), LayerSpec::conv(4, 8, 3, 2, 1)],
        )
        .unwrap();
        HyperParams {
            search_type: SearchStage::Initial,
            model_type: ModelType::Conv,
            model_class: ModelClass::Ae,
            experiment_name: "initial_grid_search".into(),
            n_ae_latents: 4,
            learning_rate: 1e-4,
            architecture: arch,
            source_architecture: None,
            list_index: Some(0),
            max_n_epochs: 20,
            min_n_epochs: 0,
            enable_early_stop: false,
            early_stop_history: None,
            export_latents: false,
            device: Device::Cpu,
            rng_seed_data: 0,
            rng_seed_model: 0,
            val_check_interval: 1,
            l2_reg: 0.0,
            train_frac: 1.0,
            session: SessionConfig {
                lab: "lab".into(),
                expt: "expt".into(),
                animal: "animal".into(),
                session: "session".into(),
            },
        }
    }

    #[test]
    fn test_version_id_names() {
        assert_eq!(VersionId(3).to_string(), "version_3");
        assert_eq!("version_12".parse::<VersionId>().unwrap(), VersionId(12));
        assert!("version_x".parse::<VersionId>().is_err());
        assert!("checkpoints".parse::<VersionId>().is_err());
        assert_eq!(serde_json::to_string(&VersionId(1)).unwrap(), "\"version_1\"");
    }

    #[test]
    fn test_hparams_snapshot_is_flat() {
        let value = serde_json::to_value(sample_hparams()).unwrap();
        assert_eq!(value["animal"], "animal");
        assert_eq!(value["search_type"], "initial");
        assert!(value.get("source_architecture").is_none());
        let back: HyperParams = serde_json::from_value(value).unwrap();
        assert_eq!(back, sample_hparams());
    }

    #[test]
    fn test_fingerprint_ignores_bookkeeping_fields() {
        let a = sample_hparams();
        let mut b = a.clone();
        b.list_index = Some(9);
        b.max_n_epochs = 1000;
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.learning_rate = 1e-3;
        assert_ne!(a.fingerprint(), b.fingerprint());
        let c = HyperParams {
            architecture: a.architecture.with_latents(8).unwrap(),
            n_ae_latents: 8,
            ..a.clone()
        };
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_record_lifecycle() {
        let mut record = ExperimentRecord::new(VersionId(0), sample_hparams());
        assert!(!record.training_completed);

        let mut metrics = TrainingMetrics::default();
        metrics.record_epoch(0.3, Some(0.25));
        record.mark_completed(metrics);
        assert!(record.training_completed);
        assert_eq!(record.best_val_loss(), Some(0.25));
    }
}
