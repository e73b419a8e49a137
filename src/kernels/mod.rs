//! Kernel contracts consumed by the transformer engine
//!
//! Each kernel has fixed numeric semantics (see [`crate::tensor::ops`]); a
//! provider only chooses how to execute it. Providers may split one call
//! across threads along a single axis, but every write must be visible when
//! the call returns and accumulation order within a row, channel or
//! position must match the sequential definition.

mod hybrid;
mod parallel;
mod sequential;

pub use hybrid::Hybrid;
pub use parallel::Parallel;
pub use sequential::Sequential;

use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

/// The seven kernels of a forward pass
pub trait Kernels: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &'static str;

    /// RMSNorm in place against `weight`
    fn normalize(&self, x: &mut [f32], weight: &[f32]);

    /// `out = matrix · x` for an F32 or F16 `[out.len(), x.len()]` matrix
    fn project(&self, matrix: &Tensor, x: &[f32], out: &mut [f32]);

    /// Rotary embedding over `num_heads` contiguous heads of `v`
    fn rotate(&self, v: &mut [f32], pos: usize, num_heads: usize, head_dim: usize, theta: f32);

    /// Scaled query·key scores; `keys` is `[scores.len(), query.len()]`
    fn attend_scores(&self, query: &[f32], keys: &[f32], scores: &mut [f32]);

    /// Probability-weighted value sum; `values` is `[scores.len(), out.len()]`
    fn attend_values(&self, scores: &[f32], values: &[f32], out: &mut [f32]);

    /// Stable softmax in place
    fn softmax(&self, x: &mut [f32]);

    /// SiLU in place
    fn silu(&self, x: &mut [f32]);
}

/// Kernel groups a [`Hybrid`] provider can route individually
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    /// Matrix-vector projections
    Project,
    /// RMSNorm
    Normalize,
    /// Rotary embeddings
    Rotate,
    /// SiLU activation
    Silu,
    Softmax,
    /// Attention scores and value sums
    Attention,
}

impl KernelKind {
    pub const ALL: [KernelKind; 6] = [
        KernelKind::Project,
        KernelKind::Normalize,
        KernelKind::Rotate,
        KernelKind::Silu,
        KernelKind::Softmax,
        KernelKind::Attention,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KernelKind::Project => "project",
            KernelKind::Normalize => "normalize",
            KernelKind::Rotate => "rotate",
            KernelKind::Silu => "silu",
            KernelKind::Softmax => "softmax",
            KernelKind::Attention => "attention",
        }
    }
}

impl FromStr for KernelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "project" | "gemv" => Ok(KernelKind::Project),
            "normalize" | "rmsnorm" => Ok(KernelKind::Normalize),
            "rotate" | "rope" => Ok(KernelKind::Rotate),
            "silu" => Ok(KernelKind::Silu),
            "softmax" => Ok(KernelKind::Softmax),
            "attention" | "attend" => Ok(KernelKind::Attention),
            other => Err(format!("unknown kernel: {}", other)),
        }
    }
}

impl std::fmt::Display for KernelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selectable kernel providers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelBackend {
    /// Plain single-threaded loops
    #[default]
    Sequential,
    /// Rayon data-parallel loops
    Parallel,
    /// Parallel loops for the listed kernels only
    Hybrid(BTreeSet<KernelKind>),
}

impl KernelBackend {
    /// Instantiate the provider
    pub fn create(&self) -> Arc<dyn Kernels> {
        match self {
            KernelBackend::Sequential => Arc::new(Sequential),
            KernelBackend::Parallel => Arc::new(Parallel::default()),
            KernelBackend::Hybrid(enabled) => Arc::new(Hybrid::new(enabled.iter().copied())),
        }
    }
}

/// `sequential`, `parallel`, or `hybrid:<kernel>,<kernel>,...`
impl FromStr for KernelBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if let Some(list) = lower.strip_prefix("hybrid") {
            let list = list.strip_prefix(':').unwrap_or(list);
            let enabled = list
                .split(',')
                .filter(|k| !k.trim().is_empty())
                .map(str::parse)
                .collect::<Result<BTreeSet<KernelKind>, _>>()?;
            return Ok(KernelBackend::Hybrid(enabled));
        }
        match lower.as_str() {
            "sequential" | "seq" => Ok(KernelBackend::Sequential),
            "parallel" | "mt" => Ok(KernelBackend::Parallel),
            other => Err(format!("unknown kernel backend: {}", other)),
        }
    }
}

impl std::fmt::Display for KernelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelBackend::Sequential => f.write_str("sequential"),
            KernelBackend::Parallel => f.write_str("parallel"),
            KernelBackend::Hybrid(enabled) => {
                let names: Vec<&str> = enabled.iter().map(KernelKind::as_str).collect();
                write!(f, "hybrid:{}", names.join(","))
            }
        }
    }
}
