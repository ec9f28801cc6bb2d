//! Architecture descriptor: validated encoder/decoder layer lists plus the spatial
//! dimensions recorded at every encoding stage.
//!
//! Dimensions are simulated once, when the descriptor is built, so the decoder knows
//! every pre-pool shape and the bottleneck geometry without running the encoder.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::layer::{LayerKind, LayerSpec, SpatialDim};
use crate::error::{MlError, Result};

/// Input geometry: channels and spatial size of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputDim {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl InputDim {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    pub fn spatial(&self) -> SpatialDim {
        SpatialDim::new(self.height, self.width)
    }
}

impl From<[usize; 3]> for InputDim {
    fn from([channels, height, width]: [usize; 3]) -> Self {
        Self::new(channels, height, width)
    }
}

impl fmt::Display for InputDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.channels, self.height, self.width)
    }
}

/// Ordered encoder/decoder specification consumed by both halves of an autoencoder.
///
/// Immutable once built; every constructor validates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchitectureDescriptor {
    input_dim: InputDim,
    n_latents: usize,
    encoding: Vec<LayerSpec>,
    decoding: Vec<LayerSpec>,
    /// Output size after each encoding layer, index-aligned with `encoding`.
    encoding_dims: Vec<SpatialDim>,
}

impl ArchitectureDescriptor {
    /// Validate explicit encoder and decoder lists and record the encoding dimensions.
    pub fn new(
        input_dim: InputDim,
        n_latents: usize,
        encoding: Vec<LayerSpec>,
        decoding: Vec<LayerSpec>,
    ) -> Result<Self> {
        let encoding_dims = trace_encoding(input_dim, &encoding)?;
        let arch = Self {
            input_dim,
            n_latents,
            encoding,
            decoding,
            encoding_dims,
        };
        arch.decoding_dims()?;
        arch.check_latents()?;
        Ok(arch)
    }

    /// Build a descriptor whose decoder mirrors `encoding`: reverse order, an unpool
    /// before the transpose conv of every pooled stage, and output padding chosen so
    /// each transpose conv lands exactly on the size its conv started from.
    pub fn mirrored(input_dim: InputDim, n_latents: usize, encoding: Vec<LayerSpec>) -> Result<Self> {
        let dims = trace_encoding(input_dim, &encoding)?;
        let mut decoding = Vec::with_capacity(encoding.len());

        for (i, layer) in encoding.iter().enumerate().rev() {
            match layer.kind {
                LayerKind::MaxPool => decoding.push(LayerSpec::unpool(
                    layer.channels_out,
                    layer.kernel_size,
                    layer.stride,
                    layer.padding,
                )),
                LayerKind::Conv => {
                    let source = if i == 0 {
                        input_dim.spatial()
                    } else {
                        dims[i - 1]
                    };
                    let output_padding = (
                        residual(layer, dims[i].height, source.height, i)?,
                        residual(layer, dims[i].width, source.width, i)?,
                    );
                    decoding.push(LayerSpec::conv_transpose(
                        layer.channels_out,
                        layer.channels_in,
                        layer.kernel_size,
                        layer.stride,
                        layer.padding,
                        output_padding,
                    ));
                }
                other => {
                    return Err(MlError::invalid_architecture(format!(
                        "encoding layer {i}: '{other}' is not an encoding layer"
                    )));
                }
            }
        }

        Self::new(input_dim, n_latents, encoding, decoding)
    }

    /// Same layers, different bottleneck width.
    pub fn with_latents(&self, n_latents: usize) -> Result<Self> {
        let mut arch = self.clone();
        arch.n_latents = n_latents;
        arch.check_latents()?;
        Ok(arch)
    }

    /// Re-check a descriptor that arrived through deserialization.
    ///
    /// The recorded encoding dimensions must match what the layer arithmetic produces.
    pub fn validate(&self) -> Result<()> {
        let dims = trace_encoding(self.input_dim, &self.encoding)?;
        if dims != self.encoding_dims {
            return Err(MlError::invalid_architecture(
                "recorded encoding dimensions do not match the encoding layers",
            ));
        }
        self.decoding_dims()?;
        self.check_latents()
    }

    pub fn input_dim(&self) -> InputDim {
        self.input_dim
    }

    pub fn n_latents(&self) -> usize {
        self.n_latents
    }

    pub fn encoding(&self) -> &[LayerSpec] {
        &self.encoding
    }

    pub fn decoding(&self) -> &[LayerSpec] {
        &self.decoding
    }

    pub fn encoding_dims(&self) -> &[SpatialDim] {
        &self.encoding_dims
    }

    /// Channels of the last encoding feature map.
    pub fn bottleneck_channels(&self) -> usize {
        self.encoding
            .last()
            .map_or(self.input_dim.channels, |l| l.channels_out)
    }

    /// Spatial size of the last encoding feature map.
    pub fn bottleneck_dim(&self) -> SpatialDim {
        self.encoding_dims
            .last()
            .copied()
            .unwrap_or_else(|| self.input_dim.spatial())
    }

    /// Width of the flattened last feature map.
    pub fn flattened_size(&self) -> usize {
        self.bottleneck_channels() * self.bottleneck_dim().area()
    }

    pub fn pool_count(&self) -> usize {
        self.encoding
            .iter()
            .filter(|l| l.kind == LayerKind::MaxPool)
            .count()
    }

    /// Parameters of every conv/transpose conv plus the two bottleneck projections.
    pub fn parameter_count(&self) -> usize {
        let flat = self.flattened_size();
        let convs: usize = self
            .encoding
            .iter()
            .chain(&self.decoding)
            .map(LayerSpec::parameter_count)
            .sum();
        convs + (flat * self.n_latents + self.n_latents) + (self.n_latents * flat + flat)
    }

    /// Rough training footprint in bytes for `batch_size` f32 frames: activations and
    /// their gradients, pooling indices, and parameters with gradient and two optimizer
    /// moments.
    pub fn estimated_memory_bytes(&self, batch_size: usize) -> u64 {
        let input = self.input_dim.channels * self.input_dim.spatial().area();
        let mut activations = input;
        let mut index_words = 0usize;
        for (layer, dim) in self.encoding.iter().zip(&self.encoding_dims) {
            let elements = layer.channels_out * dim.area();
            activations += elements;
            if layer.kind == LayerKind::MaxPool {
                // i64 indices, two f32 words each
                index_words += 2 * elements;
            }
        }
        activations += self.n_latents + self.flattened_size();
        if let Ok(dims) = self.decoding_dims() {
            for (layer, dim) in self.decoding.iter().zip(&dims) {
                activations += layer.channels_out * dim.area();
            }
        }

        let per_sample = (2 * activations + index_words) as u64;
        let batch = batch_size as u64 * per_sample * 4;
        let params = self.parameter_count() as u64 * 4 * 4;
        batch + params
    }

    /// Output size after each decoding layer, index-aligned with `decoding`.
    ///
    /// Each unpool must receive exactly what its mirrored max-pool produced, and lands
    /// on that pool's recorded pre-pool size rather than on a closed-form inverse.
    pub fn decoding_dims(&self) -> Result<Vec<SpatialDim>> {
        if self.decoding.is_empty() {
            return Err(MlError::invalid_architecture("decoding layer list is empty"));
        }

        let mut pending: Vec<usize> = self
            .encoding
            .iter()
            .enumerate()
            .filter(|(_, l)| l.kind == LayerKind::MaxPool)
            .map(|(i, _)| i)
            .collect();
        let mut channels = self.bottleneck_channels();
        let mut dim = self.bottleneck_dim();
        let mut dims = Vec::with_capacity(self.decoding.len());

        for (i, layer) in self.decoding.iter().enumerate() {
            if layer.kernel_size == 0 || layer.stride == 0 {
                return Err(MlError::invalid_architecture(format!(
                    "decoding layer {i}: kernel_size and stride must be positive"
                )));
            }
            if layer.channels_in != channels {
                return Err(MlError::invalid_architecture(format!(
                    "decoding layer {i}: expects {} input channels, previous layer produces {channels}",
                    layer.channels_in
                )));
            }

            match layer.kind {
                LayerKind::Unpool => {
                    let followed_by_transpose = self
                        .decoding
                        .get(i + 1)
                        .is_some_and(|next| next.kind == LayerKind::ConvTranspose);
                    if !followed_by_transpose {
                        return Err(MlError::invalid_architecture(format!(
                            "decoding layer {i}: unpool must be directly followed by a convtranspose layer"
                        )));
                    }
                    let Some(pool_idx) = pending.pop() else {
                        return Err(MlError::invalid_architecture(format!(
                            "decoding layer {i}: unpool has no matching maxpool in the encoding"
                        )));
                    };
                    let pool = &self.encoding[pool_idx];
                    if (pool.kernel_size, pool.stride, pool.padding)
                        != (layer.kernel_size, layer.stride, layer.padding)
                    {
                        return Err(MlError::invalid_architecture(format!(
                            "decoding layer {i}: unpool does not mirror encoding layer {pool_idx}"
                        )));
                    }
                    let pooled = self.encoding_dims[pool_idx];
                    if dim != pooled || channels != pool.channels_out {
                        return Err(MlError::invalid_architecture(format!(
                            "decoding layer {i}: unpool receives {channels} channels at {dim}, \
                             encoding layer {pool_idx} pooled to {} channels at {pooled}",
                            pool.channels_out
                        )));
                    }
                    // pool_idx >= 1: trace_encoding guarantees a conv precedes every pool
                    dim = self.encoding_dims[pool_idx - 1];
                }
                LayerKind::ConvTranspose => {
                    let (op_h, op_w) = layer.output_padding;
                    if op_h >= layer.stride || op_w >= layer.stride {
                        return Err(MlError::invalid_architecture(format!(
                            "decoding layer {i}: output_padding ({op_h}, {op_w}) must be smaller than stride {}",
                            layer.stride
                        )));
                    }
                    dim = layer.expand(dim).ok_or_else(|| {
                        MlError::invalid_architecture(format!(
                            "decoding layer {i}: convtranspose cannot expand {dim}"
                        ))
                    })?;
                    channels = layer.channels_out;
                }
                other => {
                    return Err(MlError::invalid_architecture(format!(
                        "decoding layer {i}: '{other}' is not a decoding layer"
                    )));
                }
            }
            dims.push(dim);
        }

        if !pending.is_empty() {
            return Err(MlError::invalid_architecture(format!(
                "{} maxpool layer(s) have no matching unpool",
                pending.len()
            )));
        }
        if channels != self.input_dim.channels {
            return Err(MlError::invalid_architecture(format!(
                "decoder produces {channels} channels, input has {}",
                self.input_dim.channels
            )));
        }
        if dim != self.input_dim.spatial() {
            return Err(MlError::invalid_architecture(format!(
                "decoder reconstructs {dim}, input is {}",
                self.input_dim.spatial()
            )));
        }
        Ok(dims)
    }

    fn check_latents(&self) -> Result<()> {
        let flat = self.flattened_size();
        if self.n_latents == 0 || self.n_latents > flat {
            return Err(MlError::invalid_architecture(format!(
                "n_latents = {} does not map into a {flat}-wide flattened bottleneck ({} channels at {})",
                self.n_latents,
                self.bottleneck_channels(),
                self.bottleneck_dim()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ArchitectureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "input {} -> {} latents ({} pool stage(s))",
            self.input_dim,
            self.n_latents,
            self.pool_count()
        )?;
        for (layer, dim) in self.encoding.iter().zip(&self.encoding_dims) {
            writeln!(f, "  enc {layer}  => {dim}")?;
        }
        writeln!(
            f,
            "  bottleneck {} x {} = {}",
            self.bottleneck_channels(),
            self.bottleneck_dim(),
            self.flattened_size()
        )?;
        for layer in &self.decoding {
            writeln!(f, "  dec {layer}")?;
        }
        Ok(())
    }
}

/// Simulate the encoder's shape arithmetic, validating companions and channel chaining.
fn trace_encoding(input_dim: InputDim, encoding: &[LayerSpec]) -> Result<Vec<SpatialDim>> {
    if encoding.is_empty() {
        return Err(MlError::invalid_architecture("encoding layer list is empty"));
    }
    if input_dim.channels == 0 || input_dim.height == 0 || input_dim.width == 0 {
        return Err(MlError::invalid_architecture(format!(
            "input dimensions must be positive, got {input_dim}"
        )));
    }

    let mut channels = input_dim.channels;
    let mut dim = input_dim.spatial();
    let mut dims = Vec::with_capacity(encoding.len());

    for (i, layer) in encoding.iter().enumerate() {
        if layer.kernel_size == 0 || layer.stride == 0 {
            return Err(MlError::invalid_architecture(format!(
                "encoding layer {i}: kernel_size and stride must be positive"
            )));
        }
        match layer.kind {
            LayerKind::Conv => {
                if layer.channels_in != channels {
                    return Err(MlError::invalid_architecture(format!(
                        "encoding layer {i}: expects {} input channels, previous layer produces {channels}",
                        layer.channels_in
                    )));
                }
                if layer.channels_out == 0 {
                    return Err(MlError::invalid_architecture(format!(
                        "encoding layer {i}: conv must produce at least one channel"
                    )));
                }
                channels = layer.channels_out;
            }
            LayerKind::MaxPool => {
                let after_conv = i > 0 && encoding[i - 1].kind == LayerKind::Conv;
                if !after_conv {
                    return Err(MlError::invalid_architecture(format!(
                        "encoding layer {i}: maxpool must directly follow a conv layer"
                    )));
                }
                if layer.channels_in != channels || layer.channels_out != channels {
                    return Err(MlError::invalid_architecture(format!(
                        "encoding layer {i}: maxpool channels must equal {channels}"
                    )));
                }
                if 2 * layer.padding > layer.kernel_size {
                    return Err(MlError::invalid_architecture(format!(
                        "encoding layer {i}: maxpool padding {} exceeds half the kernel",
                        layer.padding
                    )));
                }
            }
            other => {
                return Err(MlError::invalid_architecture(format!(
                    "encoding layer {i}: '{other}' is not an encoding layer"
                )));
            }
        }
        dim = layer.reduce(dim).ok_or_else(|| {
            MlError::invalid_architecture(format!(
                "encoding layer {i}: {} cannot reduce {dim}",
                layer.kind
            ))
        })?;
        dims.push(dim);
    }
    Ok(dims)
}

/// Output padding that takes a transpose conv from `reduced` back to `source`.
fn residual(layer: &LayerSpec, reduced: usize, source: usize, i: usize) -> Result<usize> {
    layer
        .expand_extent(reduced, 0)
        .and_then(|base| source.checked_sub(base))
        .filter(|&op| op < layer.stride)
        .ok_or_else(|| {
            MlError::invalid_architecture(format!(
                "encoding layer {i}: no transpose conv recovers {source} from {reduced}"
            ))
        })
}
