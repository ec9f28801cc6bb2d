//! Tensor kernels over `(batch, channels, height, width)` f32 arrays.
//!
//! Plain loops; these back a forward pass for shape checking, probing and
//! benchmarking, not a training engine.

use ndarray::{Array, Array1, Array2, Array4, Dimension};

use crate::arch::SpatialDim;
use crate::error::{MlError, Result};

/// Negative-side slope of every intermediate activation.
pub const LEAKY_SLOPE: f32 = 0.05;

/// Largest f32 strictly below one.
const BELOW_ONE: f32 = 1.0 - f32::EPSILON / 2.0;

fn out_extent(extent: usize, kernel: usize, stride: usize, padding: usize) -> Result<usize> {
    let padded = extent + 2 * padding;
    if stride == 0 || padded < kernel {
        return Err(MlError::shape(format!(
            "kernel {kernel} (padding {padding}) does not fit extent {extent}"
        )));
    }
    Ok((padded - kernel) / stride + 1)
}

/// 2-d cross-correlation. `weight` is `(out, in, k, k)`.
pub fn conv2d(
    x: &Array4<f32>,
    weight: &Array4<f32>,
    bias: &Array1<f32>,
    stride: usize,
    padding: usize,
) -> Result<Array4<f32>> {
    let (batch, channels_in, height, width) = x.dim();
    let (channels_out, weight_in, kernel, _) = weight.dim();
    if channels_in != weight_in {
        return Err(MlError::shape(format!(
            "conv expects {weight_in} input channels, got {channels_in}"
        )));
    }
    let out_h = out_extent(height, kernel, stride, padding)?;
    let out_w = out_extent(width, kernel, stride, padding)?;
    let pad = padding as isize;

    let mut out = Array4::<f32>::zeros((batch, channels_out, out_h, out_w));
    for n in 0..batch {
        for o in 0..channels_out {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut acc = bias[o];
                    for c in 0..channels_in {
                        for ky in 0..kernel {
                            let iy = (oy * stride + ky) as isize - pad;
                            if iy < 0 || iy >= height as isize {
                                continue;
                            }
                            for kx in 0..kernel {
                                let ix = (ox * stride + kx) as isize - pad;
                                if ix < 0 || ix >= width as isize {
                                    continue;
                                }
                                acc += x[[n, c, iy as usize, ix as usize]] * weight[[o, c, ky, kx]];
                            }
                        }
                    }
                    out[[n, o, oy, ox]] = acc;
                }
            }
        }
    }
    Ok(out)
}

/// Transpose convolution. `weight` is `(in, out, k, k)`; `output_padding` extends the
/// bottom/right edge so sizes lost to floor division can be recovered.
pub fn conv_transpose2d(
    x: &Array4<f32>,
    weight: &Array4<f32>,
    bias: &Array1<f32>,
    stride: usize,
    padding: usize,
    output_padding: (usize, usize),
) -> Result<Array4<f32>> {
    let (batch, channels_in, height, width) = x.dim();
    let (weight_in, channels_out, kernel, _) = weight.dim();
    if channels_in != weight_in {
        return Err(MlError::shape(format!(
            "convtranspose expects {weight_in} input channels, got {channels_in}"
        )));
    }
    let grow = |extent: usize, op: usize| -> Result<usize> {
        ((extent.max(1) - 1) * stride + kernel + op)
            .checked_sub(2 * padding)
            .filter(|&n| n > 0 && extent > 0)
            .ok_or_else(|| MlError::shape(format!("convtranspose cannot expand extent {extent}")))
    };
    let out_h = grow(height, output_padding.0)?;
    let out_w = grow(width, output_padding.1)?;
    let pad = padding as isize;

    let mut out = Array4::<f32>::zeros((batch, channels_out, out_h, out_w));
    for n in 0..batch {
        for c in 0..channels_in {
            for iy in 0..height {
                for ix in 0..width {
                    let v = x[[n, c, iy, ix]];
                    for ky in 0..kernel {
                        let oy = (iy * stride + ky) as isize - pad;
                        if oy < 0 || oy >= out_h as isize {
                            continue;
                        }
                        for kx in 0..kernel {
                            let ox = (ix * stride + kx) as isize - pad;
                            if ox < 0 || ox >= out_w as isize {
                                continue;
                            }
                            for o in 0..channels_out {
                                out[[n, o, oy as usize, ox as usize]] += v * weight[[c, o, ky, kx]];
                            }
                        }
                    }
                }
            }
        }
    }
    for n in 0..batch {
        for o in 0..channels_out {
            out.slice_mut(ndarray::s![n, o, .., ..])
                .mapv_inplace(|v| v + bias[o]);
        }
    }
    Ok(out)
}

/// Max-pool, floor mode. Returns the pooled map and, per output cell, the flat
/// `y * width + x` position of the winning input within its channel plane.
pub fn max_pool2d(
    x: &Array4<f32>,
    kernel: usize,
    stride: usize,
    padding: usize,
) -> Result<(Array4<f32>, Array4<usize>)> {
    let (batch, channels, height, width) = x.dim();
    let out_h = out_extent(height, kernel, stride, padding)?;
    let out_w = out_extent(width, kernel, stride, padding)?;
    let pad = padding as isize;

    let mut out = Array4::<f32>::zeros((batch, channels, out_h, out_w));
    let mut indices = Array4::<usize>::zeros((batch, channels, out_h, out_w));
    for n in 0..batch {
        for c in 0..channels {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut best = f32::NEG_INFINITY;
                    let mut best_idx = None;
                    for ky in 0..kernel {
                        let iy = (oy * stride + ky) as isize - pad;
                        if iy < 0 || iy >= height as isize {
                            continue;
                        }
                        for kx in 0..kernel {
                            let ix = (ox * stride + kx) as isize - pad;
                            if ix < 0 || ix >= width as isize {
                                continue;
                            }
                            let (iy, ix) = (iy as usize, ix as usize);
                            let v = x[[n, c, iy, ix]];
                            if best_idx.is_none() || v > best || v.is_nan() {
                                best = v;
                                best_idx = Some(iy * width + ix);
                            }
                        }
                    }
                    let Some(idx) = best_idx else {
                        return Err(MlError::shape(format!(
                            "pooling window at ({oy}, {ox}) lies entirely in padding"
                        )));
                    };
                    out[[n, c, oy, ox]] = best;
                    indices[[n, c, oy, ox]] = idx;
                }
            }
        }
    }
    Ok((out, indices))
}

/// Inverse of [`max_pool2d`]: scatter each value to its recorded position in a
/// zero map of size `target`. Non-maximal positions stay zero.
pub fn max_unpool2d(
    x: &Array4<f32>,
    indices: &Array4<usize>,
    target: SpatialDim,
) -> Result<Array4<f32>> {
    if x.dim() != indices.dim() {
        return Err(MlError::shape(format!(
            "unpool input {:?} does not match recorded indices {:?}",
            x.dim(),
            indices.dim()
        )));
    }
    let (batch, channels, height, width) = x.dim();
    let plane = target.area();

    let mut out = Array4::<f32>::zeros((batch, channels, target.height, target.width));
    for n in 0..batch {
        for c in 0..channels {
            for y in 0..height {
                for xx in 0..width {
                    let idx = indices[[n, c, y, xx]];
                    if idx >= plane {
                        return Err(MlError::shape(format!(
                            "unpool index {idx} outside target {target}"
                        )));
                    }
                    out[[n, c, idx / target.width, idx % target.width]] = x[[n, c, y, xx]];
                }
            }
        }
    }
    Ok(out)
}

/// Affine map of `(batch, in)` rows; `weight` is `(out, in)`.
pub fn linear(x: &Array2<f32>, weight: &Array2<f32>, bias: &Array1<f32>) -> Result<Array2<f32>> {
    if x.ncols() != weight.ncols() {
        return Err(MlError::shape(format!(
            "linear expects {} features, got {}",
            weight.ncols(),
            x.ncols()
        )));
    }
    Ok(x.dot(&weight.t()) + bias)
}

pub fn leaky_relu<D: Dimension>(mut x: Array<f32, D>) -> Array<f32, D> {
    x.mapv_inplace(|v| if v >= 0.0 { v } else { LEAKY_SLOPE * v });
    x
}

/// Logistic function held strictly inside (0, 1), including where f32 saturates.
pub fn squash<D: Dimension>(mut x: Array<f32, D>) -> Array<f32, D> {
    x.mapv_inplace(|v| {
        let s = if v >= 0.0 {
            1.0 / (1.0 + (-v).exp())
        } else {
            let e = v.exp();
            e / (1.0 + e)
        };
        s.clamp(f32::MIN_POSITIVE, BELOW_ONE)
    });
    x
}

/// Mean squared error between two equally shaped maps.
pub fn mse(a: &Array4<f32>, b: &Array4<f32>) -> Result<f64> {
    if a.dim() != b.dim() {
        return Err(MlError::shape(format!(
            "cannot compare {:?} with {:?}",
            a.dim(),
            b.dim()
        )));
    }
    let n = a.len().max(1) as f64;
    let total: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum();
    Ok(total / n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, array};

    fn ramp(shape: (usize, usize, usize, usize)) -> Array4<f32> {
        let len = shape.0 * shape.1 * shape.2 * shape.3;
        Array::from_iter((0..len).map(|v| v as f32))
            .into_shape_with_order(shape)
            .unwrap()
    }

    #[test]
    fn test_conv2d_identity_kernel() {
        let x = ramp((1, 1, 4, 4));
        let weight = Array4::from_elem((1, 1, 1, 1), 1.0);
        let out = conv2d(&x, &weight, &Array1::zeros(1), 1, 0).unwrap();
        assert_eq!(out, x);
    }

    #[test]
    fn test_conv2d_sums_window() {
        let x = Array4::from_elem((1, 1, 3, 3), 1.0);
        let weight = Array4::from_elem((1, 1, 3, 3), 1.0);
        let out = conv2d(&x, &weight, &array![0.5], 1, 1).unwrap();
        assert_eq!(out.dim(), (1, 1, 3, 3));
        assert_eq!(out[[0, 0, 1, 1]], 9.5);
        assert_eq!(out[[0, 0, 0, 0]], 4.5);
    }

    #[test]
    fn test_conv_transpose_output_size() {
        let x = Array4::from_elem((2, 3, 31, 31), 1.0);
        let weight = Array4::from_elem((3, 1, 5, 5), 0.1);
        let out = conv_transpose2d(&x, &weight, &Array1::zeros(1), 2, 1, (0, 1)).unwrap();
        assert_eq!(out.dim(), (2, 1, 63, 64));
    }

    #[test]
    fn test_conv_transpose_stride_one_is_adjoint_of_conv() {
        // <conv(x), y> == <x, convT(y)> with the same (3, 2, k, k) weights
        let x = ramp((1, 2, 5, 5));
        let y = ramp((1, 3, 5, 5)).mapv(|v| (v * 0.37).sin());
        let w = ramp((3, 2, 3, 3)).mapv(|v| (v * 0.11).cos());

        let cx = conv2d(&x, &w, &Array1::zeros(3), 1, 1).unwrap();
        let ty = conv_transpose2d(&y, &w, &Array1::zeros(2), 1, 1, (0, 0)).unwrap();
        let lhs: f32 = (&cx * &y).sum();
        let rhs: f32 = (&x * &ty).sum();
        assert!((lhs - rhs).abs() / lhs.abs().max(1.0) < 1e-4);
    }

    #[test]
    fn test_max_pool_records_argmax() {
        let x = ramp((1, 1, 5, 5));
        let (out, idx) = max_pool2d(&x, 2, 2, 0).unwrap();
        assert_eq!(out.dim(), (1, 1, 2, 2));
        assert_eq!(out[[0, 0, 0, 0]], 6.0);
        assert_eq!(idx[[0, 0, 0, 0]], 6);
        assert_eq!(idx[[0, 0, 1, 1]], 18);
    }

    #[test]
    fn test_unpool_restores_odd_size() {
        let x = ramp((1, 1, 5, 5));
        let (pooled, idx) = max_pool2d(&x, 2, 2, 0).unwrap();
        let restored = max_unpool2d(&pooled, &idx, SpatialDim::new(5, 5)).unwrap();
        assert_eq!(restored.dim(), (1, 1, 5, 5));
        assert_eq!(restored[[0, 0, 3, 3]], 18.0);
        assert_eq!(restored[[0, 0, 0, 0]], 0.0);
        assert_eq!(restored[[0, 0, 4, 4]], 0.0);
    }

    #[test]
    fn test_unpool_rejects_index_outside_target() {
        let x = ramp((1, 1, 4, 4));
        let (pooled, idx) = max_pool2d(&x, 2, 2, 0).unwrap();
        assert!(max_unpool2d(&pooled, &idx, SpatialDim::new(2, 2)).is_err());
    }

    #[test]
    fn test_leaky_relu_slope() {
        let out = leaky_relu(array![-2.0f32, 0.0, 3.0]);
        assert_eq!(out, array![-0.1f32, 0.0, 3.0]);
    }

    #[test]
    fn test_squash_stays_open_interval() {
        let out = squash(array![-1e30f32, -100.0, 0.0, 100.0, 1e30]);
        assert!(out.iter().all(|&v| v > 0.0 && v < 1.0));
        assert_eq!(out[2], 0.5);
    }

    #[test]
    fn test_linear_shape_mismatch() {
        let x = Array2::<f32>::zeros((2, 3));
        let w = Array2::<f32>::zeros((4, 5));
        assert!(linear(&x, &w, &Array1::zeros(4)).is_err());
    }
}
