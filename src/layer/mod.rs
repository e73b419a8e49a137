//! Per-layer weights and key/value caches

mod cache;
mod loader;

pub use cache::KvCache;
pub use loader::LayerLoader;

use crate::tensor::Tensor;

/// Weights for a single transformer layer
#[derive(Debug, Clone)]
pub struct LayerWeights {
    /// Layer index
    pub layer_idx: usize,

    /// Pre-attention RMSNorm weight (always f32)
    pub attn_norm: Tensor,

    /// Attention projections, row-major `[out, in]`
    pub attn_q: Tensor,
    pub attn_k: Tensor,
    pub attn_v: Tensor,
    pub attn_output: Tensor,

    /// Pre-MLP RMSNorm weight (always f32)
    pub ffn_norm: Tensor,

    /// MLP weights (SwiGLU)
    pub ffn_gate: Tensor,
    pub ffn_up: Tensor,
    pub ffn_down: Tensor,
}

/// Shared weights (embeddings, final norm, classifier)
#[derive(Debug, Clone)]
pub struct SharedWeights {
    /// Token embeddings `[vocab, hidden]`
    pub token_embd: Tensor,
    /// Final layer norm
    pub output_norm: Tensor,
    /// Classifier; the embedding table itself when the file has none
    pub output: Tensor,
}

impl SharedWeights {
    /// Is the classifier tied to the embeddings?
    pub fn is_tied(&self) -> bool {
        self.output.ptr_eq(&self.token_embd)
    }
}

/// GGUF tensor naming convention for llama-family files
#[derive(Debug, Clone)]
pub struct LayerNaming {
    /// Prefix for layers
    pub layer_prefix: String,
    pub attn_norm: String,
    pub attn_q: String,
    pub attn_k: String,
    pub attn_v: String,
    pub attn_output: String,
    pub ffn_norm: String,
    pub ffn_gate: String,
    pub ffn_up: String,
    pub ffn_down: String,
    /// Shared weight names
    pub token_embd: String,
    pub output_norm: String,
    pub output: String,
}

impl Default for LayerNaming {
    fn default() -> Self {
        Self {
            layer_prefix: "blk".to_string(),
            attn_norm: "attn_norm.weight".to_string(),
            attn_q: "attn_q.weight".to_string(),
            attn_k: "attn_k.weight".to_string(),
            attn_v: "attn_v.weight".to_string(),
            attn_output: "attn_output.weight".to_string(),
            ffn_norm: "ffn_norm.weight".to_string(),
            ffn_gate: "ffn_gate.weight".to_string(),
            ffn_up: "ffn_up.weight".to_string(),
            ffn_down: "ffn_down.weight".to_string(),
            token_embd: "token_embd.weight".to_string(),
            output_norm: "output_norm.weight".to_string(),
            output: "output.weight".to_string(),
        }
    }
}

impl LayerNaming {
    /// Get full tensor name for a layer weight
    pub fn layer_tensor_name(&self, layer_idx: usize, weight_name: &str) -> String {
        format!("{}.{}.{}", self.layer_prefix, layer_idx, weight_name)
    }
}
