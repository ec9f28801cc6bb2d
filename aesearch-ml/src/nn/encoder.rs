//! Convolutional encoder: frames to latent vectors, leaving a pooling trace behind.

use ndarray::{Array2, Array4};
use rand::rngs::StdRng;
use tracing::debug;

use super::layer::{Conv2d, Layer, Linear, MaxPool2d};
use super::trace::PoolingTrace;
use crate::arch::{ArchitectureDescriptor, InputDim, LayerKind, SpatialDim};
use crate::error::{MlError, Result};

/// Output of one encode: the latents and the trace its decode must consume.
#[derive(Debug)]
pub struct Encoding {
    /// `(batch, n_latents)`
    pub latents: Array2<f32>,
    pub trace: PoolingTrace,
}

impl Encoding {
    /// Pre-pool sizes recorded during the encode, in encoder order.
    pub fn pre_pool_shapes(&self) -> Vec<SpatialDim> {
        self.trace.pre_pool_shapes()
    }
}

#[derive(Debug, Clone)]
pub struct Encoder {
    layers: Vec<Layer>,
    latent: Linear,
    input_dim: InputDim,
}

impl Encoder {
    /// Each conv is followed by its max-pool (when the descriptor has one) and then
    /// a leaky rectification; the flattened last map projects onto the latents.
    pub fn new(arch: &ArchitectureDescriptor, rng: &mut StdRng) -> Self {
        let specs = arch.encoding();
        let mut layers = Vec::with_capacity(specs.len() * 2);
        for (i, spec) in specs.iter().enumerate() {
            match spec.kind {
                LayerKind::Conv => {
                    layers.push(Layer::Conv(Conv2d::from_spec(spec, rng)));
                    let pooled_next = specs
                        .get(i + 1)
                        .is_some_and(|next| next.kind == LayerKind::MaxPool);
                    if !pooled_next {
                        layers.push(Layer::Rectify);
                    }
                }
                LayerKind::MaxPool => {
                    layers.push(Layer::Pool(MaxPool2d::from_spec(spec)));
                    layers.push(Layer::Rectify);
                }
                // decoding kinds never validate into an encoder list
                LayerKind::ConvTranspose | LayerKind::Unpool => {}
            }
        }
        let latent = Linear::new(arch.flattened_size(), arch.n_latents(), rng);
        debug!(
            steps = layers.len(),
            flattened = arch.flattened_size(),
            n_latents = arch.n_latents(),
            "Built encoder"
        );
        Self {
            layers,
            latent,
            input_dim: arch.input_dim(),
        }
    }

    /// Encode a `(batch, channels, height, width)` batch.
    pub fn encode(&self, x: &Array4<f32>) -> Result<Encoding> {
        let (batch, channels, height, width) = x.dim();
        let expected = self.input_dim;
        if (channels, height, width) != (expected.channels, expected.height, expected.width) {
            return Err(MlError::shape(format!(
                "encoder expects frames of {expected}, got {channels}x{height}x{width}"
            )));
        }

        let mut trace = PoolingTrace::new();
        let mut h = x.clone();
        for layer in &self.layers {
            h = layer.apply(h, &mut trace)?;
        }

        // batch may be zero
        let (_, c, fh, fw) = h.dim();
        let flat = h
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((batch, c * fh * fw))?;
        let latents = self.latent.forward(&flat)?;
        Ok(Encoding { latents, trace })
    }

    /// Mark every parameter non-trainable. Idempotent.
    pub fn freeze(&mut self) {
        self.layers.iter_mut().for_each(Layer::freeze);
        self.latent.trainable = false;
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(Layer::parameter_count).sum::<usize>()
            + self.latent.parameter_count()
    }

    pub fn trainable_parameter_count(&self) -> usize {
        let latent = if self.latent.trainable {
            self.latent.parameter_count()
        } else {
            0
        };
        self.layers
            .iter()
            .map(Layer::trainable_parameter_count)
            .sum::<usize>()
            + latent
    }
}
