//! Affine (dense layer) routines.
//!
//! Weights are row-major `[out_features, in_features]`. Work is split per batch
//! item (forward, input gradient) or per output row (weight gradient) with
//! rayon; every element is written by exactly one task and summed in a fixed
//! order, so results do not depend on the thread count.

use crate::device::Device;
use rayon::prelude::*;

/// y[b] = W x[b] + bias
pub type AffineForwardFn =
    fn(x: &[f32], w: &[f32], bias: Option<&[f32]>, y: &mut [f32], in_f: usize, out_f: usize);

/// gx[b] = W^T gy[b]
pub type AffineInputGradFn = fn(gy: &[f32], w: &[f32], gx: &mut [f32], in_f: usize, out_f: usize);

/// gw = sum_b gy[b] x[b]^T, gbias = sum_b gy[b]
pub type AffineWeightGradFn = fn(
    gy: &[f32],
    x: &[f32],
    gw: &mut [f32],
    gbias: Option<&mut [f32]>,
    in_f: usize,
    out_f: usize,
);

/// Numeric routines of a dense layer, resolved once per device.
#[derive(Clone, Copy)]
pub struct AffineRoutines {
    pub forward: AffineForwardFn,
    pub input_grad: AffineInputGradFn,
    pub weight_grad: AffineWeightGradFn,
}

impl AffineRoutines {
    #[must_use]
    pub fn for_device(device: &Device) -> Self {
        device.resolve(
            "affine",
            AffineRoutines {
                forward: affine_forward_cpu,
                input_grad: affine_input_grad_cpu,
                weight_grad: affine_weight_grad_cpu,
            },
        )
    }
}

impl std::fmt::Debug for AffineRoutines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AffineRoutines")
    }
}

pub fn affine_forward_cpu(
    x: &[f32],
    w: &[f32],
    bias: Option<&[f32]>,
    y: &mut [f32],
    in_f: usize,
    out_f: usize,
) {
    y.par_chunks_mut(out_f)
        .zip(x.par_chunks(in_f))
        .for_each(|(y_row, x_row)| {
            for (o, out) in y_row.iter_mut().enumerate() {
                let w_row = &w[o * in_f..(o + 1) * in_f];
                let mut acc = bias.map_or(0.0, |b| b[o]);
                for (wi, xi) in w_row.iter().zip(x_row) {
                    acc += wi * xi;
                }
                *out = acc;
            }
        });
}

pub fn affine_input_grad_cpu(gy: &[f32], w: &[f32], gx: &mut [f32], in_f: usize, out_f: usize) {
    gx.par_chunks_mut(in_f)
        .zip(gy.par_chunks(out_f))
        .for_each(|(gx_row, gy_row)| {
            gx_row.fill(0.0);
            for (o, &g) in gy_row.iter().enumerate() {
                let w_row = &w[o * in_f..(o + 1) * in_f];
                for (gxi, wi) in gx_row.iter_mut().zip(w_row) {
                    *gxi += g * wi;
                }
            }
        });
}

pub fn affine_weight_grad_cpu(
    gy: &[f32],
    x: &[f32],
    gw: &mut [f32],
    gbias: Option<&mut [f32]>,
    in_f: usize,
    out_f: usize,
) {
    let batch = if out_f == 0 { 0 } else { gy.len() / out_f };
    gw.par_chunks_mut(in_f.max(1))
        .enumerate()
        .for_each(|(o, gw_row)| {
            gw_row.fill(0.0);
            for b in 0..batch {
                let g = gy[b * out_f + o];
                let x_row = &x[b * in_f..(b + 1) * in_f];
                for (gwi, xi) in gw_row.iter_mut().zip(x_row) {
                    *gwi += g * xi;
                }
            }
        });
    if let Some(gbias) = gbias {
        gbias.fill(0.0);
        for gy_row in gy.chunks(out_f.max(1)) {
            for (gb, g) in gbias.iter_mut().zip(gy_row) {
                *gb += g;
            }
        }
    }
}
