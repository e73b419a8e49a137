//! Multi-threaded provider built on rayon
//!
//! Work is split across rows of a projection, heads of a rotation, cached
//! positions of a score pass, output channels of a value pass, and elements
//! of the pointwise kernels. Reductions that span a whole vector (the RMS
//! sum of squares, the softmax max/sum) stay sequential so results are
//! bit-identical to [`super::Sequential`].

use super::Kernels;
use crate::tensor::{ops, Tensor};
use rayon::prelude::*;

/// Rayon data-parallel kernels
#[derive(Debug, Clone, Copy)]
pub struct Parallel {
    /// Minimum items handed to one rayon task
    min_chunk: usize,
}

impl Default for Parallel {
    fn default() -> Self {
        Self { min_chunk: 64 }
    }
}

impl Parallel {
    pub fn with_min_chunk(min_chunk: usize) -> Self {
        Self {
            min_chunk: min_chunk.max(1),
        }
    }
}

impl Kernels for Parallel {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn normalize(&self, x: &mut [f32], weight: &[f32]) {
        let inv = ops::inv_rms(x);
        x.par_iter_mut()
            .with_min_len(self.min_chunk)
            .zip(weight.par_iter())
            .for_each(|(v, &w)| *v = *v * inv * w);
    }

    fn project(&self, matrix: &Tensor, x: &[f32], out: &mut [f32]) {
        out.par_iter_mut()
            .with_min_len(self.min_chunk)
            .enumerate()
            .for_each(|(row, y)| *y = ops::row_dot(matrix, row, x));
    }

    fn rotate(&self, v: &mut [f32], pos: usize, num_heads: usize, head_dim: usize, theta: f32) {
        v[..num_heads * head_dim]
            .par_chunks_exact_mut(head_dim)
            .for_each(|head| ops::rope_head(head, pos, theta));
    }

    fn attend_scores(&self, query: &[f32], keys: &[f32], scores: &mut [f32]) {
        let head_dim = query.len();
        let scale = 1.0 / (head_dim as f32).sqrt();
        scores
            .par_iter_mut()
            .with_min_len(self.min_chunk)
            .enumerate()
            .for_each(|(t, s)| *s = ops::score(query, &keys[t * head_dim..(t + 1) * head_dim], scale));
    }

    fn attend_values(&self, scores: &[f32], values: &[f32], out: &mut [f32]) {
        let head_dim = out.len();
        out.par_iter_mut()
            .enumerate()
            .for_each(|(i, o)| *o = ops::value_channel(scores, values, head_dim, i));
    }

    fn softmax(&self, x: &mut [f32]) {
        ops::softmax(x);
    }

    fn silu(&self, x: &mut [f32]) {
        x.par_iter_mut()
            .with_min_len(self.min_chunk)
            .for_each(|v| *v = ops::silu_scalar(*v));
    }
}
