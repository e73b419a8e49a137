//! Per-kernel routing between the sequential and parallel providers

use super::{KernelKind, Kernels, Parallel, Sequential};
use crate::tensor::Tensor;
use std::collections::BTreeSet;

/// Runs the enabled kernels on [`Parallel`] and the rest on [`Sequential`]
#[derive(Debug, Clone, Default)]
pub struct Hybrid {
    parallel: Parallel,
    enabled: BTreeSet<KernelKind>,
}

impl Hybrid {
    pub fn new(enabled: impl IntoIterator<Item = KernelKind>) -> Self {
        Self::with_parallel(Parallel::default(), enabled)
    }

    pub fn with_parallel(parallel: Parallel, enabled: impl IntoIterator<Item = KernelKind>) -> Self {
        Self {
            parallel,
            enabled: enabled.into_iter().collect(),
        }
    }

    /// Kernels dispatched to the parallel provider
    pub fn enabled(&self) -> &BTreeSet<KernelKind> {
        &self.enabled
    }

    fn route(&self, kind: KernelKind) -> &dyn Kernels {
        if self.enabled.contains(&kind) {
            &self.parallel
        } else {
            &Sequential
        }
    }
}

impl Kernels for Hybrid {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn normalize(&self, x: &mut [f32], weight: &[f32]) {
        self.route(KernelKind::Normalize).normalize(x, weight);
    }

    fn project(&self, matrix: &Tensor, x: &[f32], out: &mut [f32]) {
        self.route(KernelKind::Project).project(matrix, x, out);
    }

    fn rotate(&self, v: &mut [f32], pos: usize, num_heads: usize, head_dim: usize, theta: f32) {
        self.route(KernelKind::Rotate)
            .rotate(v, pos, num_heads, head_dim, theta);
    }

    fn attend_scores(&self, query: &[f32], keys: &[f32], scores: &mut [f32]) {
        self.route(KernelKind::Attention)
            .attend_scores(query, keys, scores);
    }

    fn attend_values(&self, scores: &[f32], values: &[f32], out: &mut [f32]) {
        self.route(KernelKind::Attention)
            .attend_values(scores, values, out);
    }

    fn softmax(&self, x: &mut [f32]) {
        self.route(KernelKind::Softmax).softmax(x);
    }

    fn silu(&self, x: &mut [f32]) {
        self.route(KernelKind::Silu).silu(x);
    }
}
