//! Single-threaded reference provider

use super::Kernels;
use crate::tensor::{ops, Tensor};

/// Runs every kernel as the plain sequential loop
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Kernels for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn normalize(&self, x: &mut [f32], weight: &[f32]) {
        ops::rms_norm(x, weight);
    }

    fn project(&self, matrix: &Tensor, x: &[f32], out: &mut [f32]) {
        ops::matvec(matrix, x, out);
    }

    fn rotate(&self, v: &mut [f32], pos: usize, num_heads: usize, head_dim: usize, theta: f32) {
        ops::rope(v, pos, num_heads, head_dim, theta);
    }

    fn attend_scores(&self, query: &[f32], keys: &[f32], scores: &mut [f32]) {
        ops::attention_scores(query, keys, scores);
    }

    fn attend_values(&self, scores: &[f32], values: &[f32], out: &mut [f32]) {
        ops::attention_values(scores, values, out);
    }

    fn softmax(&self, x: &mut [f32]) {
        ops::softmax(x);
    }

    fn silu(&self, x: &mut [f32]) {
        ops::silu(x);
    }
}
