//! Runtime layers built from descriptor entries, and the single tagged-variant
//! dispatch both halves of the autoencoder traverse.

use ndarray::{Array1, Array2, Array4};
use rand::Rng;
use rand::rngs::StdRng;

use super::ops;
use super::trace::{PoolEntry, PoolingTrace};
use crate::arch::{LayerSpec, SpatialDim};
use crate::error::Result;

/// Bound of the uniform `±1/sqrt(fan_in)` initialization.
fn init_bound(fan_in: usize) -> f32 {
    1.0 / (fan_in.max(1) as f32).sqrt()
}

#[derive(Debug, Clone)]
pub struct Conv2d {
    pub weight: Array4<f32>,
    pub bias: Array1<f32>,
    pub stride: usize,
    pub padding: usize,
    pub trainable: bool,
}

impl Conv2d {
    pub fn from_spec(spec: &LayerSpec, rng: &mut StdRng) -> Self {
        let k = spec.kernel_size;
        let bound = init_bound(spec.channels_in * k * k);
        let weight = Array4::from_shape_fn((spec.channels_out, spec.channels_in, k, k), |_| {
            rng.gen_range(-bound..=bound)
        });
        let bias = Array1::from_shape_fn(spec.channels_out, |_| rng.gen_range(-bound..=bound));
        Self {
            weight,
            bias,
            stride: spec.stride,
            padding: spec.padding,
            trainable: true,
        }
    }

    pub fn forward(&self, x: &Array4<f32>) -> Result<Array4<f32>> {
        ops::conv2d(x, &self.weight, &self.bias, self.stride, self.padding)
    }
}

#[derive(Debug, Clone)]
pub struct ConvTranspose2d {
    /// `(in, out, k, k)`
    pub weight: Array4<f32>,
    pub bias: Array1<f32>,
    pub stride: usize,
    pub padding: usize,
    pub output_padding: (usize, usize),
    pub trainable: bool,
}

impl ConvTranspose2d {
    pub fn from_spec(spec: &LayerSpec, rng: &mut StdRng) -> Self {
        let k = spec.kernel_size;
        let bound = init_bound(spec.channels_out * k * k);
        let weight = Array4::from_shape_fn((spec.channels_in, spec.channels_out, k, k), |_| {
            rng.gen_range(-bound..=bound)
        });
        let bias = Array1::from_shape_fn(spec.channels_out, |_| rng.gen_range(-bound..=bound));
        Self {
            weight,
            bias,
            stride: spec.stride,
            padding: spec.padding,
            output_padding: spec.output_padding,
            trainable: true,
        }
    }

    pub fn forward(&self, x: &Array4<f32>) -> Result<Array4<f32>> {
        ops::conv_transpose2d(
            x,
            &self.weight,
            &self.bias,
            self.stride,
            self.padding,
            self.output_padding,
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaxPool2d {
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
}

impl MaxPool2d {
    pub fn from_spec(spec: &LayerSpec) -> Self {
        Self {
            kernel_size: spec.kernel_size,
            stride: spec.stride,
            padding: spec.padding,
        }
    }

    pub fn forward(&self, x: &Array4<f32>) -> Result<(Array4<f32>, Array4<usize>)> {
        ops::max_pool2d(x, self.kernel_size, self.stride, self.padding)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaxUnpool2d {
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
}

impl MaxUnpool2d {
    pub fn from_spec(spec: &LayerSpec) -> Self {
        Self {
            kernel_size: spec.kernel_size,
            stride: spec.stride,
            padding: spec.padding,
        }
    }

    /// Scatter into the entry's recorded pre-pool size.
    pub fn forward(&self, x: &Array4<f32>, entry: &PoolEntry) -> Result<Array4<f32>> {
        ops::max_unpool2d(x, &entry.indices, entry.pre_pool)
    }
}

/// Fully connected projection; `weight` is `(out, in)`.
#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
    pub trainable: bool,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, rng: &mut StdRng) -> Self {
        let bound = init_bound(in_features);
        let weight = Array2::from_shape_fn((out_features, in_features), |_| {
            rng.gen_range(-bound..=bound)
        });
        let bias = Array1::from_shape_fn(out_features, |_| rng.gen_range(-bound..=bound));
        Self {
            weight,
            bias,
            trainable: true,
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        ops::linear(x, &self.weight, &self.bias)
    }

    pub fn parameter_count(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// One step of an encoder or decoder traversal.
#[derive(Debug, Clone)]
pub enum Layer {
    Conv(Conv2d),
    Pool(MaxPool2d),
    Rectify,
    ConvTranspose(ConvTranspose2d),
    Unpool(MaxUnpool2d),
    Squash,
}

impl Layer {
    /// Apply this step. Pooling pushes onto `trace`; unpooling pops from it.
    ///
    /// # Panics
    ///
    /// Panics if an unpool step finds the trace empty. Descriptor validation rules
    /// this out; reaching it means the encoder and decoder were not built from the
    /// same descriptor.
    pub fn apply(&self, x: Array4<f32>, trace: &mut PoolingTrace) -> Result<Array4<f32>> {
        match self {
            Layer::Conv(conv) => conv.forward(&x),
            Layer::Pool(pool) => {
                let (_, _, height, width) = x.dim();
                let (out, indices) = pool.forward(&x)?;
                trace.push(PoolEntry {
                    indices,
                    pre_pool: SpatialDim::new(height, width),
                });
                Ok(out)
            }
            Layer::Rectify => Ok(ops::leaky_relu(x)),
            Layer::ConvTranspose(convt) => convt.forward(&x),
            Layer::Unpool(unpool) => {
                let Some(entry) = trace.pop() else {
                    panic!("pooling trace exhausted before every unpool step ran");
                };
                unpool.forward(&x, &entry)
            }
            Layer::Squash => Ok(ops::squash(x)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Layer::Conv(_) => "conv",
            Layer::Pool(_) => "maxpool",
            Layer::Rectify => "leaky_relu",
            Layer::ConvTranspose(_) => "convtranspose",
            Layer::Unpool(_) => "unpool",
            Layer::Squash => "sigmoid",
        }
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            Layer::Conv(c) => c.weight.len() + c.bias.len(),
            Layer::ConvTranspose(c) => c.weight.len() + c.bias.len(),
            _ => 0,
        }
    }

    pub fn trainable_parameter_count(&self) -> usize {
        match self {
            Layer::Conv(c) if c.trainable => self.parameter_count(),
            Layer::ConvTranspose(c) if c.trainable => self.parameter_count(),
            _ => 0,
        }
    }

    pub fn freeze(&mut self) {
        match self {
            Layer::Conv(c) => c.trainable = false,
            Layer::ConvTranspose(c) => c.trainable = false,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_init_is_seeded_and_bounded() {
        let spec = LayerSpec::conv(2, 4, 3, 1, 1);
        let a = Conv2d::from_spec(&spec, &mut StdRng::seed_from_u64(5));
        let b = Conv2d::from_spec(&spec, &mut StdRng::seed_from_u64(5));
        assert_eq!(a.weight, b.weight);

        let bound = 1.0 / (18f32).sqrt();
        assert!(a.weight.iter().all(|w| w.abs() <= bound));
        assert_eq!(a.weight.dim(), (4, 2, 3, 3));
    }

    #[test]
    fn test_pool_pushes_pre_pool_shape() {
        let mut trace = PoolingTrace::new();
        let pool = Layer::Pool(MaxPool2d::from_spec(&LayerSpec::maxpool(1, 2, 2)));
        let out = pool
            .apply(Array4::zeros((1, 1, 7, 9)), &mut trace)
            .unwrap();
        assert_eq!(out.dim(), (1, 1, 3, 4));
        assert_eq!(trace.pre_pool_shapes(), vec![SpatialDim::new(7, 9)]);

        let unpool = Layer::Unpool(MaxUnpool2d::from_spec(&LayerSpec::unpool(1, 2, 2, 0)));
        let back = unpool.apply(out, &mut trace).unwrap();
        assert_eq!(back.dim(), (1, 1, 7, 9));
        assert!(trace.is_empty());
    }

    #[test]
    #[should_panic(expected = "pooling trace exhausted")]
    fn test_unpool_on_empty_trace_panics() {
        let unpool = Layer::Unpool(MaxUnpool2d::from_spec(&LayerSpec::unpool(1, 2, 2, 0)));
        let _ = unpool.apply(Array4::zeros((1, 1, 2, 2)), &mut PoolingTrace::new());
    }

    #[test]
    fn test_freeze_is_idempotent() {
        let spec = LayerSpec::conv(1, 2, 3, 1, 1);
        let mut layer = Layer::Conv(Conv2d::from_spec(&spec, &mut StdRng::seed_from_u64(0)));
        assert_eq!(layer.trainable_parameter_count(), 20);
        layer.freeze();
        layer.freeze();
        assert_eq!(layer.trainable_parameter_count(), 0);
        assert_eq!(layer.parameter_count(), 20);
    }
}
