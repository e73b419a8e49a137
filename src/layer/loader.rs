//! Layer loading from a GGUF model

use super::{LayerNaming, LayerWeights, SharedWeights};
use crate::model::{Model, ModelConfig, WeightStorageMode};
use crate::tensor::Tensor;
use crate::Result;
use tracing::{debug, info, warn};

/// Loads transformer layers from a [`Model`]
pub struct LayerLoader<'a> {
    model: &'a Model,
    /// Layer naming convention
    naming: LayerNaming,
    /// Precision for projection and embedding weights
    mode: WeightStorageMode,
}

impl<'a> LayerLoader<'a> {
    pub fn new(model: &'a Model, mode: WeightStorageMode) -> Self {
        Self {
            model,
            naming: LayerNaming::default(),
            mode,
        }
    }

    fn config(&self) -> &ModelConfig {
        self.model.config()
    }

    /// Load a projection or embedding matrix in the configured precision
    fn weight(&self, name: &str, rows: usize, cols: usize) -> Result<Tensor> {
        let tensor = self.model.map_weight(name, self.mode)?;
        check_len(name, &tensor, rows * cols)?;
        Ok(tensor)
    }

    /// Load a norm vector, always as f32
    fn norm(&self, name: &str, len: usize) -> Result<Tensor> {
        let tensor = self.model.map_tensor(name)?;
        check_len(name, &tensor, len)?;
        Ok(tensor)
    }

    /// Load shared weights (embeddings, final norm, classifier)
    pub fn load_shared_weights(&self) -> Result<SharedWeights> {
        info!("Loading shared weights...");
        let config = self.config();
        let (vocab, hidden) = (config.vocab_size, config.hidden_size);

        let token_embd = self.weight(&self.naming.token_embd, vocab, hidden)?;
        let output_norm = self.norm(&self.naming.output_norm, hidden)?;

        // The classifier may be tied to the embeddings
        let output = if self.model.has_tensor(&self.naming.output) {
            self.weight(&self.naming.output, vocab, hidden)?
        } else {
            debug!("no {}, using tied embeddings", self.naming.output);
            token_embd.clone()
        };

        Ok(SharedWeights {
            token_embd,
            output_norm,
            output,
        })
    }

    /// Load a single transformer layer
    pub fn load_layer(&self, layer_idx: usize) -> Result<LayerWeights> {
        debug!("Loading layer {}", layer_idx);
        let config = self.config();
        let hidden = config.hidden_size;
        let kv_dim = config.kv_dim();
        let ffn = config.intermediate_size;

        let name = |weight_name: &str| self.naming.layer_tensor_name(layer_idx, weight_name);

        Ok(LayerWeights {
            layer_idx,
            attn_norm: self.norm(&name(&self.naming.attn_norm), hidden)?,
            attn_q: self.weight(&name(&self.naming.attn_q), hidden, hidden)?,
            attn_k: self.weight(&name(&self.naming.attn_k), kv_dim, hidden)?,
            attn_v: self.weight(&name(&self.naming.attn_v), kv_dim, hidden)?,
            attn_output: self.weight(&name(&self.naming.attn_output), hidden, hidden)?,
            ffn_norm: self.norm(&name(&self.naming.ffn_norm), hidden)?,
            ffn_gate: self.weight(&name(&self.naming.ffn_gate), ffn, hidden)?,
            ffn_up: self.weight(&name(&self.naming.ffn_up), ffn, hidden)?,
            ffn_down: self.weight(&name(&self.naming.ffn_down), hidden, ffn)?,
        })
    }

    /// Get number of layers
    pub fn num_layers(&self) -> usize {
        self.config().num_hidden_layers
    }
}

fn check_len(name: &str, tensor: &Tensor, expected: usize) -> Result<()> {
    tensor.expect_len(expected).map_err(|e| {
        warn!(name, expected, got = tensor.len(), "tensor has unexpected size");
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::testing::GgufBuilder;
    use crate::model::{ModelOptions, ARCHITECTURE_KEY};
    use crate::tensor::DType;
    use crate::Error;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            hidden_size: 4,
            intermediate_size: 6,
            num_hidden_layers: 1,
            num_attention_heads: 2,
            num_key_value_heads: 1,
            vocab_size: 3,
            max_seq_len: 8,
            rope_theta: 10_000.0,
        }
    }

    fn open(builder: GgufBuilder) -> (tempfile::NamedTempFile, Model) {
        let file = builder.write_temp();
        let options = ModelOptions {
            strict_tensor_count: false,
            config: tiny_config(),
        };
        let model = Model::open_with(file.path(), options).unwrap();
        (file, model)
    }

    fn layer_fixture(q_len: usize) -> GgufBuilder {
        GgufBuilder::new()
            .string(ARCHITECTURE_KEY, "llama")
            .tensor_f16("token_embd.weight", &[0.5; 12])
            .tensor_f32("output_norm.weight", &[1.0; 4])
            .tensor_f32("blk.0.attn_norm.weight", &[1.0; 4])
            .tensor_f16("blk.0.attn_q.weight", &vec![0.25; q_len])
            .tensor_f16("blk.0.attn_k.weight", &[0.25; 8])
            .tensor_f16("blk.0.attn_v.weight", &[0.25; 8])
            .tensor_f16("blk.0.attn_output.weight", &[0.25; 16])
            .tensor_f32("blk.0.ffn_norm.weight", &[1.0; 4])
            .tensor_f16("blk.0.ffn_gate.weight", &[0.25; 24])
            .tensor_f16("blk.0.ffn_up.weight", &[0.25; 24])
            .tensor_f16("blk.0.ffn_down.weight", &[0.25; 24])
    }

    #[test]
    fn test_load_layer_in_both_modes() {
        let (_file, model) = open(layer_fixture(16));

        let native = LayerLoader::new(&model, WeightStorageMode::F16).load_layer(0).unwrap();
        assert_eq!(native.attn_q.dtype(), DType::F16);
        assert_eq!(native.attn_norm.dtype(), DType::F32);

        let wide = LayerLoader::new(&model, WeightStorageMode::F32).load_layer(0).unwrap();
        assert_eq!(wide.attn_q.dtype(), DType::F32);
        assert_eq!(wide.attn_q.to_f32_vec(), native.attn_q.to_f32_vec());
    }

    #[test]
    fn test_tied_classifier() {
        let (_file, model) = open(layer_fixture(16));
        let shared = LayerLoader::new(&model, WeightStorageMode::F32)
            .load_shared_weights()
            .unwrap();
        assert!(shared.is_tied());
    }

    #[test]
    fn test_shape_mismatch() {
        let (_file, model) = open(layer_fixture(12));
        let result = LayerLoader::new(&model, WeightStorageMode::F32).load_layer(0);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_missing_layer() {
        let (_file, model) = open(layer_fixture(16));
        let result = LayerLoader::new(&model, WeightStorageMode::F32).load_layer(1);
        assert!(matches!(result, Err(Error::TensorNotFound(_))));
    }
}
