//! Layer entries of an architecture descriptor and their spatial arithmetic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of one descriptor entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    #[serde(rename = "conv")]
    Conv,
    #[serde(rename = "maxpool")]
    MaxPool,
    #[serde(rename = "convtranspose")]
    ConvTranspose,
    #[serde(rename = "unpool")]
    Unpool,
}

impl LayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Conv => "conv",
            LayerKind::MaxPool => "maxpool",
            LayerKind::ConvTranspose => "convtranspose",
            LayerKind::Unpool => "unpool",
        }
    }

    pub fn is_encoding(&self) -> bool {
        matches!(self, LayerKind::Conv | LayerKind::MaxPool)
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Height/width of a feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpatialDim {
    pub height: usize,
    pub width: usize,
}

impl SpatialDim {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    pub fn area(&self) -> usize {
        self.height * self.width
    }
}

impl fmt::Display for SpatialDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// One entry of an architecture descriptor.
///
/// Pooling entries carry the channel count of the feature map they act on in both
/// `channels_in` and `channels_out`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerSpec {
    pub kind: LayerKind,
    pub channels_in: usize,
    pub channels_out: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    /// Extra rows/columns a transpose conv appends to hit an exact target size.
    #[serde(default)]
    pub output_padding: (usize, usize),
}

impl LayerSpec {
    pub fn conv(
        channels_in: usize,
        channels_out: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
    ) -> Self {
        Self {
            kind: LayerKind::Conv,
            channels_in,
            channels_out,
            kernel_size,
            stride,
            padding,
            output_padding: (0, 0),
        }
    }

    pub fn maxpool(channels: usize, kernel_size: usize, stride: usize) -> Self {
        Self {
            kind: LayerKind::MaxPool,
            channels_in: channels,
            channels_out: channels,
            kernel_size,
            stride,
            padding: 0,
            output_padding: (0, 0),
        }
    }

    pub fn conv_transpose(
        channels_in: usize,
        channels_out: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        output_padding: (usize, usize),
    ) -> Self {
        Self {
            kind: LayerKind::ConvTranspose,
            channels_in,
            channels_out,
            kernel_size,
            stride,
            padding,
            output_padding,
        }
    }

    pub fn unpool(channels: usize, kernel_size: usize, stride: usize, padding: usize) -> Self {
        Self {
            kind: LayerKind::Unpool,
            channels_in: channels,
            channels_out: channels,
            kernel_size,
            stride,
            padding,
            output_padding: (0, 0),
        }
    }

    /// Output size of a conv or max-pool along one axis, floor mode.
    /// `None` when the padded input is smaller than the kernel.
    pub fn reduce_extent(&self, extent: usize) -> Option<usize> {
        let padded = extent + 2 * self.padding;
        if self.stride == 0 || padded < self.kernel_size {
            return None;
        }
        Some((padded - self.kernel_size) / self.stride + 1)
    }

    /// Output size of a transpose conv (or the default size of an unpool) along one axis.
    pub fn expand_extent(&self, extent: usize, output_padding: usize) -> Option<usize> {
        let grown = extent.checked_sub(1)? * self.stride + self.kernel_size + output_padding;
        grown.checked_sub(2 * self.padding).filter(|&n| n > 0)
    }

    pub fn reduce(&self, dim: SpatialDim) -> Option<SpatialDim> {
        Some(SpatialDim::new(
            self.reduce_extent(dim.height)?,
            self.reduce_extent(dim.width)?,
        ))
    }

    pub fn expand(&self, dim: SpatialDim) -> Option<SpatialDim> {
        Some(SpatialDim::new(
            self.expand_extent(dim.height, self.output_padding.0)?,
            self.expand_extent(dim.width, self.output_padding.1)?,
        ))
    }

    /// Learnable parameter count (weights + biases); zero for pooling entries.
    pub fn parameter_count(&self) -> usize {
        match self.kind {
            LayerKind::Conv | LayerKind::ConvTranspose => {
                self.channels_in * self.channels_out * self.kernel_size * self.kernel_size
                    + self.channels_out
            }
            LayerKind::MaxPool | LayerKind::Unpool => 0,
        }
    }
}

impl fmt::Display for LayerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<13} {:>4} -> {:<4} k={} s={} p={}",
            self.kind.as_str(),
            self.channels_in,
            self.channels_out,
            self.kernel_size,
            self.stride,
            self.padding
        )?;
        if self.kind == LayerKind::ConvTranspose {
            write!(
                f,
                " op=({}, {})",
                self.output_padding.0, self.output_padding.1
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_floor_mode() {
        let conv = LayerSpec::conv(1, 8, 5, 2, 1);
        assert_eq!(conv.reduce_extent(128), Some(63));
        assert_eq!(conv.reduce_extent(63), Some(31));
        assert_eq!(LayerSpec::maxpool(8, 2, 2).reduce_extent(7), Some(3));
    }

    #[test]
    fn test_reduce_rejects_kernel_larger_than_input() {
        let conv = LayerSpec::conv(1, 8, 7, 1, 0);
        assert_eq!(conv.reduce_extent(5), None);
    }

    #[test]
    fn test_expand_inverts_reduce_with_output_padding() {
        // Both 63 and 64 reduce to 31 under k=5, s=2, p=1; op=1 recovers the even one.
        let convt = LayerSpec::conv_transpose(8, 1, 5, 2, 1, (0, 1));
        assert_eq!(convt.expand(SpatialDim::new(31, 31)), Some(SpatialDim::new(63, 64)));
    }

    #[test]
    fn test_kind_serde_names() {
        let json = serde_json::to_string(&LayerKind::ConvTranspose).unwrap();
        assert_eq!(json, "\"convtranspose\"");
        let kind: LayerKind = serde_json::from_str("\"maxpool\"").unwrap();
        assert_eq!(kind, LayerKind::MaxPool);
    }

    #[test]
    fn test_parameter_count() {
        assert_eq!(LayerSpec::conv(3, 8, 3, 1, 1).parameter_count(), 3 * 8 * 9 + 8);
        assert_eq!(LayerSpec::maxpool(8, 2, 2).parameter_count(), 0);
    }
}
