//! Convolutional decoder: latents plus the matching pooling trace back to frames.

use ndarray::{Array2, Array4};
use rand::rngs::StdRng;
use tracing::debug;

use super::layer::{ConvTranspose2d, Layer, Linear, MaxUnpool2d};
use super::trace::PoolingTrace;
use crate::arch::{ArchitectureDescriptor, LayerKind, SpatialDim};
use crate::error::{MlError, Result};

#[derive(Debug, Clone)]
pub struct Decoder {
    expand: Linear,
    layers: Vec<Layer>,
    unpools: usize,
    n_latents: usize,
    bottleneck_channels: usize,
    bottleneck_dim: SpatialDim,
}

impl Decoder {
    /// Every transpose conv is followed by a leaky rectification, except the last,
    /// which is followed by the (0, 1) squash.
    pub fn new(arch: &ArchitectureDescriptor, rng: &mut StdRng) -> Self {
        let specs = arch.decoding();
        let last_transpose = specs
            .iter()
            .rposition(|s| s.kind == LayerKind::ConvTranspose);
        let mut layers = Vec::with_capacity(specs.len() * 2);
        for (i, spec) in specs.iter().enumerate() {
            match spec.kind {
                LayerKind::Unpool => layers.push(Layer::Unpool(MaxUnpool2d::from_spec(spec))),
                LayerKind::ConvTranspose => {
                    layers.push(Layer::ConvTranspose(ConvTranspose2d::from_spec(spec, rng)));
                    if Some(i) == last_transpose {
                        layers.push(Layer::Squash);
                    } else {
                        layers.push(Layer::Rectify);
                    }
                }
                // encoding kinds never validate into a decoder list
                LayerKind::Conv | LayerKind::MaxPool => {}
            }
        }
        let expand = Linear::new(arch.n_latents(), arch.flattened_size(), rng);
        debug!(steps = layers.len(), unpools = arch.pool_count(), "Built decoder");
        Self {
            expand,
            layers,
            unpools: arch.pool_count(),
            n_latents: arch.n_latents(),
            bottleneck_channels: arch.bottleneck_channels(),
            bottleneck_dim: arch.bottleneck_dim(),
        }
    }

    /// Reconstruct frames from `(batch, n_latents)` latents, consuming `trace`.
    ///
    /// # Panics
    ///
    /// Panics if `trace` does not hold exactly one entry per unpool step, or is not
    /// empty once decoding finishes. Either means the trace came from an encoder
    /// built from a different descriptor.
    pub fn decode(&self, latents: &Array2<f32>, mut trace: PoolingTrace) -> Result<Array4<f32>> {
        assert_eq!(
            trace.depth(),
            self.unpools,
            "pooling trace holds {} entries but the decoder has {} unpool steps",
            trace.depth(),
            self.unpools
        );
        if latents.ncols() != self.n_latents {
            return Err(MlError::shape(format!(
                "decoder expects {} latents, got {}",
                self.n_latents,
                latents.ncols()
            )));
        }

        let batch = latents.nrows();
        let flat = self.expand.forward(latents)?;
        let mut h = flat
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((
                batch,
                self.bottleneck_channels,
                self.bottleneck_dim.height,
                self.bottleneck_dim.width,
            ))?;
        for layer in &self.layers {
            h = layer.apply(h, &mut trace)?;
        }

        assert!(
            trace.is_empty(),
            "{} pooling trace entries left after decoding",
            trace.depth()
        );
        Ok(h)
    }

    /// Mark every parameter non-trainable. Idempotent.
    pub fn freeze(&mut self) {
        self.layers.iter_mut().for_each(Layer::freeze);
        self.expand.trainable = false;
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(Layer::parameter_count).sum::<usize>()
            + self.expand.parameter_count()
    }

    pub fn trainable_parameter_count(&self) -> usize {
        let expand = if self.expand.trainable {
            self.expand.parameter_count()
        } else {
            0
        };
        self.layers
            .iter()
            .map(Layer::trainable_parameter_count)
            .sum::<usize>()
            + expand
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{InputDim, LayerSpec};
    use crate::nn::encoder::Encoder;
    use crate::nn::trace::PoolEntry;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;

    fn arch() -> ArchitectureDescriptor {
        ArchitectureDescriptor::mirrored(
            InputDim::new(2, 19, 23),
            3,
            vec![
                LayerSpec::conv(2, 4, 3, 1, 1),
                LayerSpec::maxpool(4, 2, 2),
                LayerSpec::conv(4, 4, 3, 2, 1),
                LayerSpec::conv(4, 8, 3, 1, 1),
                LayerSpec::maxpool(8, 3, 2),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_step_order_ends_in_squash() {
        let decoder = Decoder::new(&arch(), &mut StdRng::seed_from_u64(1));
        let names: Vec<_> = decoder.layers().iter().map(Layer::name).collect();
        assert_eq!(
            names,
            vec![
                "unpool",
                "convtranspose",
                "leaky_relu",
                "convtranspose",
                "leaky_relu",
                "unpool",
                "convtranspose",
                "sigmoid"
            ]
        );
    }

    #[test]
    fn test_decode_restores_input_shape_and_empties_trace() {
        let arch = arch();
        let mut rng = StdRng::seed_from_u64(1);
        let encoder = Encoder::new(&arch, &mut rng);
        let decoder = Decoder::new(&arch, &mut rng);

        let x = Array4::from_elem((2, 2, 19, 23), 0.25);
        let encoding = encoder.encode(&x).unwrap();
        let y = decoder.decode(&encoding.latents, encoding.trace).unwrap();
        assert_eq!(y.dim(), x.dim());
        assert!(y.iter().all(|&v| v > 0.0 && v < 1.0));
    }

    #[test]
    #[should_panic(expected = "pooling trace holds 0 entries")]
    fn test_short_trace_panics() {
        let decoder = Decoder::new(&arch(), &mut StdRng::seed_from_u64(1));
        let _ = decoder.decode(&Array2::zeros((1, 3)), PoolingTrace::new());
    }

    #[test]
    #[should_panic(expected = "pooling trace holds 3 entries")]
    fn test_extra_trace_entry_panics() {
        let arch = arch();
        let mut rng = StdRng::seed_from_u64(1);
        let encoder = Encoder::new(&arch, &mut rng);
        let decoder = Decoder::new(&arch, &mut rng);
        let mut encoding = encoder.encode(&Array4::zeros((1, 2, 19, 23))).unwrap();
        encoding.trace.push(PoolEntry {
            indices: Array4::zeros((1, 1, 1, 1)),
            pre_pool: SpatialDim::new(2, 2),
        });
        let _ = decoder.decode(&encoding.latents, encoding.trace);
    }

    #[test]
    fn test_single_latent_decodes_multi_frame_batch() {
        let arch = ArchitectureDescriptor::mirrored(
            InputDim::new(1, 12, 12),
            1,
            vec![LayerSpec::conv(1, 2, 3, 2, 1)],
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let encoder = Encoder::new(&arch, &mut rng);
        let decoder = Decoder::new(&arch, &mut rng);
        for batch in 1..=3 {
            let encoding = encoder
                .encode(&Array4::from_elem((batch, 1, 12, 12), 0.5))
                .unwrap();
            let y = decoder.decode(&encoding.latents, encoding.trace).unwrap();
            assert_eq!(y.dim(), (batch, 1, 12, 12));
        }
    }

    #[test]
    fn test_column_major_latents_decode() {
        let arch = arch();
        let mut rng = StdRng::seed_from_u64(1);
        let encoder = Encoder::new(&arch, &mut rng);
        let decoder = Decoder::new(&arch, &mut rng);
        let encoding = encoder.encode(&Array4::zeros((4, 2, 19, 23))).unwrap();
        let latents = Array2::from_elem((3, 4), 0.1).reversed_axes();
        let y = decoder.decode(&latents, encoding.trace).unwrap();
        assert_eq!(y.dim(), (4, 2, 19, 23));
    }

    #[test]
    fn test_wrong_latent_width_is_shape_error() {
        let arch = arch();
        let mut rng = StdRng::seed_from_u64(1);
        let encoder = Encoder::new(&arch, &mut rng);
        let decoder = Decoder::new(&arch, &mut rng);
        let encoding = encoder.encode(&Array4::zeros((1, 2, 19, 23))).unwrap();
        let err = decoder
            .decode(&Array2::zeros((1, 4)), encoding.trace)
            .unwrap_err();
        assert!(matches!(err, MlError::Shape(_)));
    }
}
