//! The training collaborator interface, and a probe that stands in for it.

use ndarray::Array4;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;
use tracing::debug;

use super::metrics::TrainingMetrics;
use crate::error::{MlError, Result};
use crate::nn::ConvAutoencoder;
use crate::search::HyperParams;

/// Fits a freshly built model. Gradient descent and early stopping live behind
/// this trait; the search only needs the validation history it leaves in `metrics`.
pub trait Trainer {
    fn fit(
        &mut self,
        model: &mut ConvAutoencoder,
        hparams: &HyperParams,
        metrics: &mut TrainingMetrics,
    ) -> Result<()>;
}

/// Evaluates the untrained model's reconstruction loss on a synthetic batch drawn
/// from `rng_seed_data`. Records that single value as one validated epoch.
#[derive(Debug, Clone)]
pub struct ReconstructionProbe {
    pub batch_size: usize,
}

impl Default for ReconstructionProbe {
    fn default() -> Self {
        Self { batch_size: 4 }
    }
}

impl ReconstructionProbe {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

impl Trainer for ReconstructionProbe {
    fn fit(
        &mut self,
        model: &mut ConvAutoencoder,
        hparams: &HyperParams,
        metrics: &mut TrainingMetrics,
    ) -> Result<()> {
        let started = Instant::now();
        let dim = model.architecture().input_dim();
        let mut rng = StdRng::seed_from_u64(hparams.rng_seed_data);
        let batch = Array4::from_shape_fn(
            (self.batch_size, dim.channels, dim.height, dim.width),
            |_| rng.gen_range(0.0f32..1.0),
        );

        let loss = model.reconstruction_loss(&batch)?;
        if !loss.is_finite() {
            return Err(MlError::training(format!("non-finite reconstruction loss {loss}")));
        }
        metrics.record_epoch(loss, Some(loss));
        metrics.total_training_time_secs += started.elapsed().as_secs_f64();
        debug!(loss, n_latents = hparams.n_ae_latents, "Probed reconstruction loss");
        Ok(())
    }
}
