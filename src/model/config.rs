//! Architecture constants for Llama 3.2 1B

use crate::gguf::Metadata;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Embedding dimension
pub const HIDDEN_SIZE: usize = 2048;
/// Feed-forward inner dimension
pub const INTERMEDIATE_SIZE: usize = 8192;
pub const NUM_LAYERS: usize = 16;
pub const NUM_HEADS: usize = 32;
/// Key/value heads (grouped-query attention)
pub const NUM_KV_HEADS: usize = 8;
pub const HEAD_DIM: usize = 64;
pub const VOCAB_SIZE: usize = 128_256;
/// KV cache capacity in positions
pub const MAX_SEQ_LEN: usize = 2048;
pub const ROPE_THETA: f32 = 500_000.0;

/// Transformer dimensions
///
/// The loader only accepts Llama 3.2 1B files, but the engine runs the same
/// forward pass for any consistent set of dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hidden size (embedding dimension)
    pub hidden_size: usize,

    /// Intermediate size (MLP hidden dim)
    pub intermediate_size: usize,

    /// Number of transformer layers
    pub num_hidden_layers: usize,

    /// Number of attention heads
    pub num_attention_heads: usize,

    /// Number of KV heads (for GQA)
    pub num_key_value_heads: usize,

    /// Vocabulary size
    pub vocab_size: usize,

    /// Maximum sequence length
    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,

    /// RoPE theta
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f32,
}

fn default_max_seq_len() -> usize {
    MAX_SEQ_LEN
}
fn default_rope_theta() -> f32 {
    ROPE_THETA
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::llama_3_2_1b()
    }
}

impl ModelConfig {
    pub fn llama_3_2_1b() -> Self {
        Self {
            hidden_size: HIDDEN_SIZE,
            intermediate_size: INTERMEDIATE_SIZE,
            num_hidden_layers: NUM_LAYERS,
            num_attention_heads: NUM_HEADS,
            num_key_value_heads: NUM_KV_HEADS,
            vocab_size: VOCAB_SIZE,
            max_seq_len: MAX_SEQ_LEN,
            rope_theta: ROPE_THETA,
        }
    }

    /// Check that the dimensions fit together
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("hidden_size", self.hidden_size),
            ("intermediate_size", self.intermediate_size),
            ("num_hidden_layers", self.num_hidden_layers),
            ("num_attention_heads", self.num_attention_heads),
            ("num_key_value_heads", self.num_key_value_heads),
            ("vocab_size", self.vocab_size),
            ("max_seq_len", self.max_seq_len),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(Error::Validation(format!("{} must be positive", name)));
        }
        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(Error::Validation(format!(
                "hidden_size {} is not divisible by {} heads",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.num_attention_heads % self.num_key_value_heads != 0 {
            return Err(Error::Validation(format!(
                "{} heads cannot be grouped over {} kv heads",
                self.num_attention_heads, self.num_key_value_heads
            )));
        }
        if self.head_dim() % 2 != 0 {
            return Err(Error::Validation(format!(
                "head_dim {} must be even for rotary embeddings",
                self.head_dim()
            )));
        }
        Ok(())
    }

    /// Get head dimension
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Width of one cached key or value vector
    pub fn kv_dim(&self) -> usize {
        self.num_key_value_heads * self.head_dim()
    }

    /// Get GQA ratio (query heads per KV head)
    pub fn gqa_ratio(&self) -> usize {
        self.num_attention_heads / self.num_key_value_heads
    }

    /// Parameter count with an untied classifier
    pub fn parameter_count(&self) -> usize {
        let embed_params = self.vocab_size * self.hidden_size;
        let layer_params =
            // Attention: Q and O are square, K and V project to kv_dim
            2 * self.hidden_size * self.hidden_size +
            2 * self.hidden_size * self.kv_dim() +
            // MLP: gate, up, down projections
            3 * self.hidden_size * self.intermediate_size +
            // Layer norms
            2 * self.hidden_size;

        2 * embed_params + self.num_hidden_layers * layer_params + self.hidden_size
    }

    /// Bytes for both KV caches across all layers
    pub fn kv_cache_bytes(&self) -> usize {
        2 * self.num_hidden_layers * self.max_seq_len * self.kv_dim() * std::mem::size_of::<f32>()
    }

    /// Dimensions advertised by `llama.*` metadata that disagree with this
    /// config, as `(key, found, expected)`
    pub fn metadata_mismatches(&self, metadata: &Metadata) -> Vec<(&'static str, u64, usize)> {
        let checks = [
            ("llama.embedding_length", self.hidden_size),
            ("llama.feed_forward_length", self.intermediate_size),
            ("llama.block_count", self.num_hidden_layers),
            ("llama.attention.head_count", self.num_attention_heads),
            ("llama.attention.head_count_kv", self.num_key_value_heads),
        ];
        checks
            .into_iter()
            .filter_map(|(key, expected)| {
                let found = metadata.get_u64(key)?;
                (found != expected as u64).then_some((key, found, expected))
            })
            .collect()
    }
}

/// Format a byte count for display
pub fn size_string(bytes: usize) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.1}GB", bytes as f64 / 1_000_000_000.0)
    } else {
        format!("{:.1}MB", bytes as f64 / 1_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::MetadataValue;

    #[test]
    fn test_llama_dimensions() {
        let config = ModelConfig::llama_3_2_1b();
        config.validate().unwrap();
        assert_eq!(config.head_dim(), HEAD_DIM);
        assert_eq!(config.kv_dim(), 512);
        assert_eq!(config.gqa_ratio(), 4);
        // ~1.5B with the classifier counted separately
        let params = config.parameter_count();
        assert!(params > 1_400_000_000 && params < 1_600_000_000);
    }

    #[test]
    fn test_validate_rejects_bad_grouping() {
        let config = ModelConfig {
            num_key_value_heads: 3,
            ..ModelConfig::llama_3_2_1b()
        };
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_serde_defaults() {
        let json = r#"{
            "hidden_size": 8, "intermediate_size": 16, "num_hidden_layers": 1,
            "num_attention_heads": 2, "num_key_value_heads": 1, "vocab_size": 10
        }"#;
        let config: ModelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_seq_len, MAX_SEQ_LEN);
        assert_eq!(config.rope_theta, ROPE_THETA);
        assert_eq!(config.kv_dim(), 4);
    }

    #[test]
    fn test_metadata_mismatches() {
        let mut metadata = Metadata::new();
        metadata.insert("llama.block_count".into(), MetadataValue::U32(16));
        metadata.insert("llama.embedding_length".into(), MetadataValue::U32(4096));
        let mismatches = ModelConfig::llama_3_2_1b().metadata_mismatches(&metadata);
        assert_eq!(mismatches, vec![("llama.embedding_length", 4096, HIDDEN_SIZE)]);
    }
}
