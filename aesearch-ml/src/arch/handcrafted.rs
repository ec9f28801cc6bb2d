//! Fixed pool of hand-designed encoder templates.

use tracing::{debug, warn};

use super::descriptor::{ArchitectureDescriptor, InputDim};
use super::layer::LayerSpec;
use super::sampler::MemoryBudget;
use crate::error::Result;
use aesearch_core::ConfigError;

/// Number of templates in the pool.
pub const HANDCRAFTED_COUNT: usize = 3;

/// Encoder layers of template `index` for `channels` input channels.
pub fn handcrafted_encoding(index: usize, channels: usize) -> Option<Vec<LayerSpec>> {
    let encoding = match index {
        // Strided convolutions, no pooling.
        0 => vec![
            LayerSpec::conv(channels, 32, 5, 2, 1),
            LayerSpec::conv(32, 64, 5, 2, 1),
            LayerSpec::conv(64, 128, 5, 2, 1),
            LayerSpec::conv(128, 256, 5, 2, 1),
        ],
        // Same-size convolutions, each halved by a max-pool.
        1 => vec![
            LayerSpec::conv(channels, 32, 5, 1, 2),
            LayerSpec::maxpool(32, 2, 2),
            LayerSpec::conv(32, 64, 5, 1, 2),
            LayerSpec::maxpool(64, 2, 2),
            LayerSpec::conv(64, 128, 5, 1, 2),
            LayerSpec::maxpool(128, 2, 2),
            LayerSpec::conv(128, 256, 5, 1, 2),
            LayerSpec::maxpool(256, 2, 2),
        ],
        2 => vec![
            LayerSpec::conv(channels, 16, 3, 1, 1),
            LayerSpec::maxpool(16, 2, 2),
            LayerSpec::conv(16, 32, 3, 2, 1),
            LayerSpec::conv(32, 64, 3, 1, 1),
            LayerSpec::maxpool(64, 2, 2),
            LayerSpec::conv(64, 64, 3, 2, 1),
        ],
        _ => return None,
    };
    Some(encoding)
}

/// Build the selected handcrafted architectures at `n_latents`.
///
/// An index outside the pool is a configuration error. Templates that do not fit the
/// input geometry, the latent size, or the memory budget are skipped with a warning.
pub fn draw_handcrafted(
    input_dim: InputDim,
    n_latents: usize,
    indices: &[usize],
    budget: &MemoryBudget,
) -> Result<Vec<ArchitectureDescriptor>> {
    let mut archs = Vec::with_capacity(indices.len());
    for &index in indices {
        let encoding = handcrafted_encoding(index, input_dim.channels).ok_or_else(|| {
            ConfigError::invalid(
                "which_handcrafted_archs",
                format!("index {index} is outside the handcrafted pool (0..{HANDCRAFTED_COUNT})"),
            )
        })?;

        let arch = match ArchitectureDescriptor::mirrored(input_dim, n_latents, encoding) {
            Ok(arch) => arch,
            Err(e) => {
                warn!(index, input = %input_dim, error = %e, "Skipping handcrafted architecture");
                continue;
            }
        };
        if !budget.admits(&arch) {
            warn!(
                index,
                estimated_bytes = arch.estimated_memory_bytes(budget.batch_size),
                limit_bytes = budget.limit_bytes,
                "Handcrafted architecture exceeds memory budget, skipping"
            );
            continue;
        }
        debug!(index, params = arch.parameter_count(), "Drew handcrafted architecture");
        archs.push(arch);
    }
    Ok(archs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MlError;

    fn roomy() -> MemoryBudget {
        MemoryBudget::from_gb(64.0, 8)
    }

    #[test]
    fn test_every_template_mirrors_at_default_size() {
        let input = InputDim::new(1, 128, 128);
        for index in 0..HANDCRAFTED_COUNT {
            let encoding = handcrafted_encoding(index, 1).unwrap();
            let arch = ArchitectureDescriptor::mirrored(input, 16, encoding).unwrap();
            assert_eq!(arch.decoding_dims().unwrap().last(), Some(&input.spatial()));
        }
    }

    #[test]
    fn test_templates_follow_input_channels() {
        let encoding = handcrafted_encoding(1, 3).unwrap();
        assert_eq!(encoding[0].channels_in, 3);
    }

    #[test]
    fn test_draw_selected_indices() {
        let archs = draw_handcrafted(InputDim::new(1, 64, 64), 8, &[0, 1], &roomy()).unwrap();
        assert_eq!(archs.len(), 2);
        assert_eq!(archs[0].pool_count(), 0);
        assert_eq!(archs[1].pool_count(), 4);
    }

    #[test]
    fn test_out_of_range_index_is_config_error() {
        let err = draw_handcrafted(InputDim::new(1, 64, 64), 8, &[7], &roomy()).unwrap_err();
        assert!(matches!(err, MlError::Config(_)));
    }

    #[test]
    fn test_over_budget_templates_skipped() {
        let tiny = MemoryBudget::from_bytes(1024, 8);
        let archs = draw_handcrafted(InputDim::new(1, 64, 64), 8, &[0, 1, 2], &tiny).unwrap();
        assert!(archs.is_empty());
    }

    #[test]
    fn test_too_small_input_skipped() {
        // four stride-2 k5 convs cannot reduce 16x16
        let archs = draw_handcrafted(InputDim::new(1, 16, 16), 4, &[0], &roomy()).unwrap();
        assert!(archs.is_empty());
    }
}
