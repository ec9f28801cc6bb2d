//! Four-stage architecture search: decide what to launch, then launch it.
//!
//! | stage           | architectures                              | sweeps             |
//! |-----------------|--------------------------------------------|--------------------|
//! | `test`          | first fitting handcrafted template         | none               |
//! | `initial`       | loaded list, or sampled + handcrafted      | none               |
//! | `top_n`         | best `n_top_archs` `initial` runs          | learning rate      |
//! | `latent_search` | best `top_n` run                           | bottleneck width   |
//!
//! A stage only reads other stages' ledgers; it writes only to its own.

use aesearch_core::{SearchConfig, SearchStage};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use super::ledger::{ExperimentLedger, experiment_dir};
use super::record::{ExperimentRecord, HyperParams, VersionId};
use super::selector::{RankedVersion, select_best};
use crate::arch::{
    ArchitectureDescriptor, ArchitectureSampler, InputDim, MemoryBudget, draw_handcrafted,
    load_architectures, save_architectures,
};
use crate::error::{MlError, Result};
use crate::nn::build_autoencoder;
use crate::training::{Trainer, TrainingMetrics};

/// One experiment to run: its snapshot and the ledger it lands in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchRequest {
    pub hparams: HyperParams,
    pub experiment_dir: PathBuf,
}

/// Result of launching one request.
#[derive(Debug, Clone)]
pub enum LaunchOutcome {
    Completed(ExperimentRecord),
    /// A completed run with the same fingerprint already existed.
    Skipped(ExperimentRecord),
}

impl LaunchOutcome {
    pub fn record(&self) -> &ExperimentRecord {
        match self {
            LaunchOutcome::Completed(r) | LaunchOutcome::Skipped(r) => r,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LaunchFailure {
    pub index: usize,
    pub experiment_dir: PathBuf,
    pub error: String,
}

/// What one `run` did, per request.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stage: SearchStage,
    pub planned: usize,
    pub completed: Vec<(PathBuf, VersionId)>,
    pub skipped: Vec<(PathBuf, VersionId)>,
    pub failed: Vec<LaunchFailure>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SearchOrchestrator {
    config: SearchConfig,
}

impl SearchOrchestrator {
    /// Validates `config` up front; nothing is deferred to mid-run.
    pub fn new(config: SearchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn stage(&self) -> SearchStage {
        self.config.search_type
    }

    fn input_dim(&self) -> InputDim {
        InputDim::from(self.config.input_dim())
    }

    fn budget(&self) -> MemoryBudget {
        MemoryBudget::from_gb(self.config.mem_limit_gb, self.config.approx_batch_size)
    }

    /// Launch requests for the configured stage.
    pub fn plan(&self, sampler: &mut dyn ArchitectureSampler) -> Result<Vec<LaunchRequest>> {
        let requests = match self.config.search_type {
            SearchStage::Test => self.plan_test()?,
            SearchStage::Initial => self.plan_initial(sampler)?,
            SearchStage::TopN => self.plan_top_n()?,
            SearchStage::LatentSearch => self.plan_latent_search()?,
        };
        info!(
            stage = %self.config.search_type,
            requests = requests.len(),
            "Planned stage"
        );
        Ok(requests)
    }

    /// One handcrafted architecture at the configured latent size.
    pub fn plan_test(&self) -> Result<Vec<LaunchRequest>> {
        let n_latents = self.config.require_n_ae_latents()?;
        let indices = self.config.handcrafted_indices()?;
        let archs = draw_handcrafted(self.input_dim(), n_latents, &indices, &self.budget())?;
        let arch = archs.into_iter().next().ok_or_else(|| {
            MlError::invalid_architecture(format!(
                "none of handcrafted architectures {indices:?} fit {} at {n_latents} latents",
                self.input_dim()
            ))
        })?;
        Ok(vec![self.request(arch, self.config.learning_rate)])
    }

    /// Load the architecture list file when it exists; otherwise sample `n_archs`,
    /// append the selected handcrafted templates, and persist the combined list.
    pub fn plan_initial(
        &self,
        sampler: &mut dyn ArchitectureSampler,
    ) -> Result<Vec<LaunchRequest>> {
        let path = self
            .config
            .arch_file_name
            .clone()
            .ok_or_else(|| aesearch_core::ConfigError::missing("arch_file_name"))?;

        let archs = if path.is_file() {
            info!(path = %path.display(), "Using saved architecture list (handcrafted not appended)");
            load_architectures(&path)?
        } else {
            let n_latents = self.config.require_n_ae_latents()?;
            let budget = self.budget();
            let mut archs = if self.config.n_archs > 0 {
                sampler.sample(self.input_dim(), n_latents, self.config.n_archs, &budget)?
            } else {
                Vec::new()
            };
            let indices = self.config.handcrafted_indices()?;
            archs.extend(draw_handcrafted(self.input_dim(), n_latents, &indices, &budget)?);
            save_architectures(&path, &archs)?;
            archs
        };

        if archs.is_empty() {
            return Err(MlError::invalid_architecture(format!(
                "architecture list {} is empty",
                path.display()
            )));
        }

        Ok(archs
            .into_iter()
            .enumerate()
            .map(|(i, arch)| {
                let mut request = self.request(arch, self.config.learning_rate);
                request.hparams.list_index = Some(i);
                request
            })
            .collect())
    }

    /// Best `n_top_archs` completed `initial` runs, each relaunched once per
    /// learning rate in `top_n_learning_rates`.
    pub fn plan_top_n(&self) -> Result<Vec<LaunchRequest>> {
        let n_latents = self.config.require_n_ae_latents()?;
        let source_dir = experiment_dir(
            &self.config.session_dir(),
            self.config.model_class,
            n_latents,
            &self.config.saved_initial_archs,
        );
        let ranked = self.rank_upstream(&source_dir, self.config.n_top_archs)?;
        if ranked.len() < self.config.n_top_archs {
            warn!(
                requested = self.config.n_top_archs,
                available = ranked.len(),
                "Fewer completed initial runs than n_top_archs"
            );
        }

        let mut requests = Vec::new();
        for winner in &ranked {
            let source = self.load_upstream(&source_dir, winner)?;
            for &lr in &self.config.top_n_learning_rates {
                let mut request = self.request(source.hparams.architecture.clone(), lr);
                request.hparams.source_architecture = Some(winner.meta_tags.clone());
                requests.push(request);
            }
        }
        Ok(requests)
    }

    /// The single best `top_n` run, relaunched at every width in `latent_sweep`
    /// with its layers and learning rate unchanged.
    pub fn plan_latent_search(&self) -> Result<Vec<LaunchRequest>> {
        let source_latents = self
            .config
            .source_n_ae_latents
            .ok_or_else(|| aesearch_core::ConfigError::missing("source_n_ae_latents"))?;
        let source_dir = experiment_dir(
            &self.config.session_dir(),
            self.config.model_class,
            source_latents,
            &self.config.saved_top_n_archs,
        );
        let ranked = self.rank_upstream(&source_dir, 1)?;
        let winner = &ranked[0];
        let source = self.load_upstream(&source_dir, winner)?;
        let lr = source.hparams.learning_rate;

        self.config
            .latent_sweep
            .iter()
            .map(|&n| {
                let arch = source.hparams.architecture.with_latents(n)?;
                let mut request = self.request(arch, lr);
                request.hparams.source_architecture = Some(winner.meta_tags.clone());
                Ok(request)
            })
            .collect()
    }

    fn rank_upstream(&self, dir: &std::path::Path, k: usize) -> Result<Vec<RankedVersion>> {
        select_best(dir, k).map_err(|e| match e {
            MlError::NoCompletedRuns { dir } => {
                MlError::missing_upstream(dir, "no completed runs to rank")
            }
            other => other,
        })
    }

    fn load_upstream(
        &self,
        dir: &std::path::Path,
        winner: &RankedVersion,
    ) -> Result<ExperimentRecord> {
        ExperimentLedger::new(dir)
            .load_record(winner.version)?
            .ok_or_else(|| MlError::missing_upstream(&winner.meta_tags, "record disappeared"))
    }

    /// Snapshot of the configured run settings around `arch` and `learning_rate`.
    fn request(&self, arch: ArchitectureDescriptor, learning_rate: f64) -> LaunchRequest {
        let c = &self.config;
        let experiment_name = c.experiment_name();
        let n_ae_latents = arch.n_latents();
        let hparams = HyperParams {
            search_type: c.search_type,
            model_type: c.model_type,
            model_class: c.model_class,
            experiment_name: experiment_name.clone(),
            n_ae_latents,
            learning_rate,
            architecture: arch,
            source_architecture: None,
            list_index: None,
            max_n_epochs: c.max_n_epochs(),
            min_n_epochs: c.min_n_epochs(),
            enable_early_stop: c.enable_early_stop(),
            early_stop_history: c.early_stop_history(),
            export_latents: c.export_latents(),
            device: c.device,
            rng_seed_data: c.rng_seed_data,
            rng_seed_model: c.rng_seed_model,
            val_check_interval: c.val_check_interval,
            l2_reg: c.l2_reg,
            train_frac: c.train_frac,
            session: c.session.clone(),
        };
        LaunchRequest {
            experiment_dir: experiment_dir(
                &c.session_dir(),
                c.model_class,
                n_ae_latents,
                &experiment_name,
            ),
            hparams,
        }
    }

    /// Run one request: claim a version, build the model, export the snapshot with
    /// `training_completed = false`, train, and export again as completed.
    ///
    /// A completed run with the same fingerprint short-circuits to `Skipped`. A
    /// training failure is recorded on the (still incomplete) record and returned.
    pub fn launch(
        &self,
        request: &LaunchRequest,
        trainer: &mut dyn Trainer,
    ) -> Result<LaunchOutcome> {
        let ledger = ExperimentLedger::new(&request.experiment_dir);
        let fingerprint = request.hparams.fingerprint();
        if let Some(existing) = ledger.find_completed(&fingerprint)? {
            info!(
                dir = %request.experiment_dir.display(),
                version = %existing.version,
                "Identical run already completed, skipping"
            );
            return Ok(LaunchOutcome::Skipped(existing));
        }

        let version = ledger.claim_version()?;
        let mut model = build_autoencoder(
            request.hparams.model_type,
            request.hparams.architecture.clone(),
            request.hparams.rng_seed_model,
        )?;
        let mut record = ExperimentRecord::new(version, request.hparams.clone());
        ledger.write_record(&record)?;
        info!(
            dir = %request.experiment_dir.display(),
            version = %version,
            n_latents = request.hparams.n_ae_latents,
            learning_rate = request.hparams.learning_rate,
            "Launching"
        );

        let mut metrics = TrainingMetrics::default();
        match trainer.fit(&mut model, &record.hparams, &mut metrics) {
            Ok(()) => {
                record.mark_completed(metrics);
                ledger.write_record(&record)?;
                info!(
                    version = %version,
                    best_val_loss = ?record.best_val_loss(),
                    "Training completed"
                );
                Ok(LaunchOutcome::Completed(record))
            }
            Err(e) => {
                record.mark_failed(metrics, &e);
                if let Err(export) = ledger.write_record(&record) {
                    warn!(
                        version = %version,
                        training_error = %e,
                        error = %export,
                        "Could not record training failure"
                    );
                }
                Err(e)
            }
        }
    }

    /// Plan the stage and launch every request in order. A failed launch is
    /// recorded in the summary and the next request still runs; planning errors
    /// abort before anything launches.
    pub fn run(
        &self,
        sampler: &mut dyn ArchitectureSampler,
        trainer: &mut dyn Trainer,
    ) -> Result<RunSummary> {
        let requests = self.plan(sampler)?;
        let mut summary = RunSummary {
            stage: self.config.search_type,
            planned: requests.len(),
            completed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        };

        for (index, request) in requests.iter().enumerate() {
            match self.launch(request, trainer) {
                Ok(LaunchOutcome::Completed(r)) => summary
                    .completed
                    .push((request.experiment_dir.clone(), r.version)),
                Ok(LaunchOutcome::Skipped(r)) => summary
                    .skipped
                    .push((request.experiment_dir.clone(), r.version)),
                Err(e) => {
                    warn!(index, error = %e, "Launch failed");
                    summary.failed.push(LaunchFailure {
                        index,
                        experiment_dir: request.experiment_dir.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            stage = %summary.stage,
            completed = summary.completed.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "Stage finished"
        );
        Ok(summary)
    }
}
