//! Architecture sampling under a memory budget.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use tracing::{debug, info};

use super::descriptor::{ArchitectureDescriptor, InputDim};
use super::layer::LayerSpec;
use crate::error::{MlError, Result};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Memory ceiling applied to candidate architectures at a nominal batch size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBudget {
    pub limit_bytes: u64,
    pub batch_size: usize,
}

impl MemoryBudget {
    pub fn from_gb(limit_gb: f64, batch_size: usize) -> Self {
        Self {
            limit_bytes: (limit_gb * BYTES_PER_GB) as u64,
            batch_size,
        }
    }

    pub fn from_bytes(limit_bytes: u64, batch_size: usize) -> Self {
        Self {
            limit_bytes,
            batch_size,
        }
    }

    pub fn admits(&self, arch: &ArchitectureDescriptor) -> bool {
        arch.estimated_memory_bytes(self.batch_size) <= self.limit_bytes
    }
}

/// Produces valid, in-budget architecture descriptors.
pub trait ArchitectureSampler {
    fn sample(
        &mut self,
        input_dim: InputDim,
        n_latents: usize,
        count: usize,
        budget: &MemoryBudget,
    ) -> Result<Vec<ArchitectureDescriptor>>;
}

/// Seeded random conv/pool stacks, mirrored into decoders.
///
/// Candidates that fail validation, exceed the budget, or repeat an earlier
/// encoder are redrawn.
#[derive(Debug)]
pub struct RandomArchitectureSampler {
    rng: StdRng,
    attempts_per_arch: usize,
}

impl RandomArchitectureSampler {
    const KERNELS: [usize; 3] = [3, 5, 7];
    const FIRST_CHANNELS: [usize; 3] = [16, 32, 64];
    const MAX_CHANNELS: usize = 256;

    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            attempts_per_arch: 200,
        }
    }

    pub fn with_attempts_per_arch(mut self, attempts: usize) -> Self {
        self.attempts_per_arch = attempts.max(1);
        self
    }

    fn draw_encoding(&mut self, channels_in: usize) -> Vec<LayerSpec> {
        let n_convs = self.rng.gen_range(2..=5);
        let mut channels = *Self::FIRST_CHANNELS
            .choose(&mut self.rng)
            .unwrap_or(&Self::FIRST_CHANNELS[0]);
        let mut prev = channels_in;
        let mut encoding = Vec::with_capacity(2 * n_convs);

        for _ in 0..n_convs {
            let kernel = *Self::KERNELS.choose(&mut self.rng).unwrap_or(&3);
            if self.rng.gen_bool(0.5) {
                encoding.push(LayerSpec::conv(prev, channels, kernel, 1, kernel / 2));
                encoding.push(LayerSpec::maxpool(channels, 2, 2));
            } else {
                encoding.push(LayerSpec::conv(prev, channels, kernel, 2, (kernel - 1) / 2));
            }
            prev = channels;
            channels = (channels * 2).min(Self::MAX_CHANNELS);
        }
        encoding
    }
}

impl ArchitectureSampler for RandomArchitectureSampler {
    fn sample(
        &mut self,
        input_dim: InputDim,
        n_latents: usize,
        count: usize,
        budget: &MemoryBudget,
    ) -> Result<Vec<ArchitectureDescriptor>> {
        let mut archs = Vec::with_capacity(count);
        let mut seen = HashSet::new();
        let max_attempts = count.saturating_mul(self.attempts_per_arch);
        let mut attempts = 0;

        while archs.len() < count {
            if attempts >= max_attempts {
                return Err(MlError::ResourceLimit(format!(
                    "only {} of {count} architectures fit {} bytes at batch size {} after {attempts} draws",
                    archs.len(),
                    budget.limit_bytes,
                    budget.batch_size
                )));
            }
            attempts += 1;

            let encoding = self.draw_encoding(input_dim.channels);
            if seen.contains(&encoding) {
                continue;
            }
            let arch = match ArchitectureDescriptor::mirrored(input_dim, n_latents, encoding.clone())
            {
                Ok(arch) => arch,
                Err(e) => {
                    debug!(error = %e, "Rejected sampled architecture");
                    continue;
                }
            };
            if !budget.admits(&arch) {
                debug!(
                    estimated_bytes = arch.estimated_memory_bytes(budget.batch_size),
                    "Rejected sampled architecture over budget"
                );
                continue;
            }
            seen.insert(encoding);
            archs.push(arch);
        }

        info!(count, attempts, "Sampled architectures");
        Ok(archs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_budget_from_gb() {
        let budget = MemoryBudget::from_gb(2.0, 100);
        assert_eq!(budget.limit_bytes, 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_samples_are_valid_and_distinct() {
        let input = InputDim::new(1, 64, 64);
        let budget = MemoryBudget::from_gb(8.0, 16);
        let archs = RandomArchitectureSampler::new(7)
            .sample(input, 4, 10, &budget)
            .unwrap();

        assert_eq!(archs.len(), 10);
        let distinct: HashSet<_> = archs.iter().map(|a| a.encoding().to_vec()).collect();
        assert_eq!(distinct.len(), 10);
        for arch in &archs {
            arch.validate().unwrap();
            assert!(budget.admits(arch));
        }
    }

    #[test]
    fn test_same_seed_same_draws() {
        let input = InputDim::new(1, 48, 40);
        let budget = MemoryBudget::from_gb(8.0, 16);
        let a = RandomArchitectureSampler::new(3)
            .sample(input, 4, 5, &budget)
            .unwrap();
        let b = RandomArchitectureSampler::new(3)
            .sample(input, 4, 5, &budget)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_impossible_budget_is_resource_limit() {
        let err = RandomArchitectureSampler::new(0)
            .with_attempts_per_arch(5)
            .sample(InputDim::new(1, 32, 32), 4, 2, &MemoryBudget::from_bytes(1, 1))
            .unwrap_err();
        assert!(matches!(err, MlError::ResourceLimit(_)));
    }
}
