//! Convolutional autoencoder: an encoder and decoder built from one descriptor.

use aesearch_core::{ConfigError, ModelType};
use ndarray::{Array2, Array4};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

use super::decoder::Decoder;
use super::encoder::{Encoder, Encoding};
use super::ops;
use super::trace::PoolingTrace;
use crate::arch::ArchitectureDescriptor;
use crate::error::Result;

/// Reconstruction and the latents it passed through.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub output: Array4<f32>,
    pub latents: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct ConvAutoencoder {
    arch: ArchitectureDescriptor,
    encoder: Encoder,
    decoder: Decoder,
}

impl ConvAutoencoder {
    /// Build both halves; weights are drawn from a generator seeded with `seed`.
    pub fn new(arch: ArchitectureDescriptor, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let encoder = Encoder::new(&arch, &mut rng);
        let decoder = Decoder::new(&arch, &mut rng);
        Self {
            arch,
            encoder,
            decoder,
        }
    }

    pub fn encode(&self, x: &Array4<f32>) -> Result<Encoding> {
        self.encoder.encode(x)
    }

    pub fn decode(&self, latents: &Array2<f32>, trace: PoolingTrace) -> Result<Array4<f32>> {
        self.decoder.decode(latents, trace)
    }

    /// Encode then decode. Each call owns its own trace, so `&self` forwards may run
    /// concurrently.
    pub fn forward(&self, x: &Array4<f32>) -> Result<Reconstruction> {
        let Encoding { latents, trace } = self.encoder.encode(x)?;
        let output = self.decoder.decode(&latents, trace)?;
        Ok(Reconstruction { output, latents })
    }

    /// Mean squared reconstruction error of `x`.
    pub fn reconstruction_loss(&self, x: &Array4<f32>) -> Result<f64> {
        let reconstruction = self.forward(x)?;
        ops::mse(&reconstruction.output, x)
    }

    pub fn freeze(&mut self) {
        self.encoder.freeze();
        self.decoder.freeze();
    }

    pub fn architecture(&self) -> &ArchitectureDescriptor {
        &self.arch
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn parameter_count(&self) -> usize {
        self.encoder.parameter_count() + self.decoder.parameter_count()
    }

    pub fn trainable_parameter_count(&self) -> usize {
        self.encoder.trainable_parameter_count() + self.decoder.trainable_parameter_count()
    }
}

/// Build the autoencoder family named by `model_type`. Only `conv` is buildable.
pub fn build_autoencoder(
    model_type: ModelType,
    arch: ArchitectureDescriptor,
    seed: u64,
) -> Result<ConvAutoencoder> {
    match model_type {
        ModelType::Conv => {
            let model = ConvAutoencoder::new(arch, seed);
            info!(
                parameters = model.parameter_count(),
                n_latents = model.architecture().n_latents(),
                "Built conv autoencoder"
            );
            Ok(model)
        }
        ModelType::Linear => Err(ConfigError::unsupported("model_type", model_type.as_str()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{InputDim, LayerSpec};
    use crate::error::MlError;

    fn arch() -> ArchitectureDescriptor {
        ArchitectureDescriptor::mirrored(
            InputDim::new(1, 17, 20),
            4,
            vec![
                LayerSpec::conv(1, 4, 3, 1, 1),
                LayerSpec::maxpool(4, 2, 2),
                LayerSpec::conv(4, 8, 3, 2, 1),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_forward_shapes() {
        let model = ConvAutoencoder::new(arch(), 0);
        let x = Array4::from_elem((2, 1, 17, 20), 0.5);
        let out = model.forward(&x).unwrap();
        assert_eq!(out.output.dim(), x.dim());
        assert_eq!(out.latents.dim(), (2, 4));
        assert_eq!(model.parameter_count(), model.architecture().parameter_count());
    }

    #[test]
    fn test_same_seed_same_reconstruction() {
        let x = Array4::from_elem((1, 1, 17, 20), 0.3);
        let a = ConvAutoencoder::new(arch(), 9).forward(&x).unwrap();
        let b = ConvAutoencoder::new(arch(), 9).forward(&x).unwrap();
        assert_eq!(a.output, b.output);
    }

    #[test]
    fn test_linear_model_type_unsupported() {
        let err = build_autoencoder(ModelType::Linear, arch(), 0).unwrap_err();
        assert!(matches!(err, MlError::Config(ConfigError::Unsupported { .. })));
    }

    #[test]
    fn test_concurrent_forwards_use_independent_traces() {
        let model = ConvAutoencoder::new(arch(), 3);
        let inputs: Vec<_> = (0..4)
            .map(|i| Array4::from_elem((1, 1, 17, 20), i as f32 / 4.0))
            .collect();
        let serial: Vec<_> = inputs
            .iter()
            .map(|x| model.forward(x).unwrap().output)
            .collect();

        let model = &model;
        let parallel: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = inputs
                .iter()
                .map(|x| s.spawn(move || model.forward(x).unwrap().output))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_freeze_model() {
        let mut model = ConvAutoencoder::new(arch(), 0);
        model.freeze();
        assert_eq!(model.trainable_parameter_count(), 0);
        assert!(model.parameter_count() > 0);
    }
}
