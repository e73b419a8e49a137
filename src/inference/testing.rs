//! Miniature llama GGUF files for engine tests

use crate::gguf::testing::GgufBuilder;
use crate::model::{Model, ModelConfig, ModelOptions, ARCHITECTURE_KEY};
use crate::tokenizer::{MERGES_KEY, MODEL_KEY, TOKENS_KEY};
use half::f16;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Keeps the backing file alive next to the model
pub(crate) struct TinyModel {
    _file: NamedTempFile,
    pub model: Arc<Model>,
}

pub(crate) fn tiny_config(vocab_size: usize) -> ModelConfig {
    ModelConfig {
        hidden_size: 8,
        intermediate_size: 12,
        num_hidden_layers: 2,
        num_attention_heads: 4,
        num_key_value_heads: 2,
        vocab_size,
        max_seq_len: 16,
        rope_theta: 10_000.0,
    }
}

/// Deterministic values in `[-scale, scale)`, exactly representable as f16
fn values(n: usize, seed: u32, scale: f32) -> Vec<f32> {
    let mut s = seed.wrapping_mul(2_654_435_761).max(1);
    (0..n)
        .map(|_| {
            s ^= s << 13;
            s ^= s >> 17;
            s ^= s << 5;
            let v = ((s % 2000) as f32 / 1000.0 - 1.0) * scale;
            f16::from_f32(v).to_f32()
        })
        .collect()
}

fn norm(n: usize, seed: u32) -> Vec<f32> {
    values(n, seed, 0.1).into_iter().map(|v| 1.0 + v).collect()
}

/// A llama GGUF with F16 projections, F32 norms and a gpt2 tokenizer over
/// `vocab`; `tied` leaves out `output.weight`
pub(crate) fn tiny_gguf(config: &ModelConfig, vocab: &[String], tied: bool) -> GgufBuilder {
    let n = config.hidden_size * config.vocab_size;
    let output = (!tied).then(|| values(n, 3, 0.5));
    llama_gguf(config, vocab, &values(n, 1, 1.0), output.as_deref(), false)
}

fn llama_gguf(
    config: &ModelConfig,
    vocab: &[String],
    token_embd: &[f32],
    output: Option<&[f32]>,
    passthrough: bool,
) -> GgufBuilder {
    let hidden = config.hidden_size;
    let kv_dim = config.kv_dim();
    let ffn = config.intermediate_size;
    let v = config.vocab_size as u64;
    let (h, k, f) = (hidden as u64, kv_dim as u64, ffn as u64);

    let mut builder = GgufBuilder::new()
        .string(ARCHITECTURE_KEY, "llama")
        .string(MODEL_KEY, "gpt2")
        .string_array(TOKENS_KEY, vocab)
        .string_array::<&str>(MERGES_KEY, &[])
        .tensor_f16_shaped("token_embd.weight", &[h, v], token_embd)
        .tensor_f32("output_norm.weight", &norm(hidden, 2));
    if let Some(output) = output {
        builder = builder.tensor_f16_shaped("output.weight", &[h, v], output);
    }

    // Zero output and down projections leave the residual stream untouched
    let writeback = |n: usize, seed: u32| {
        if passthrough {
            vec![0.0; n]
        } else {
            values(n, seed, 0.5)
        }
    };

    for l in 0..config.num_hidden_layers {
        let seed = 100 * (l as u32 + 1);
        let name = |w: &str| format!("blk.{}.{}.weight", l, w);
        builder = builder
            .tensor_f32(&name("attn_norm"), &norm(hidden, seed))
            .tensor_f16_shaped(&name("attn_q"), &[h, h], &values(hidden * hidden, seed + 1, 0.5))
            .tensor_f16_shaped(&name("attn_k"), &[h, k], &values(hidden * kv_dim, seed + 2, 0.5))
            .tensor_f16_shaped(&name("attn_v"), &[h, k], &values(hidden * kv_dim, seed + 3, 0.5))
            .tensor_f16_shaped(&name("attn_output"), &[h, h], &writeback(hidden * hidden, seed + 4))
            .tensor_f32(&name("ffn_norm"), &norm(hidden, seed + 5))
            .tensor_f16_shaped(&name("ffn_gate"), &[h, f], &values(hidden * ffn, seed + 6, 0.5))
            .tensor_f16_shaped(&name("ffn_up"), &[h, f], &values(hidden * ffn, seed + 7, 0.5))
            .tensor_f16_shaped(&name("ffn_down"), &[f, h], &writeback(ffn * hidden, seed + 8));
    }
    builder
}

fn open(builder: GgufBuilder, config: ModelConfig) -> TinyModel {
    let file = builder.write_temp();
    let options = ModelOptions {
        strict_tensor_count: false,
        config,
    };
    let model = Arc::new(Model::open_with(file.path(), options).unwrap());
    TinyModel { _file: file, model }
}

pub(crate) fn open_tiny(config: ModelConfig, vocab: &[String], tied: bool) -> TinyModel {
    let builder = tiny_gguf(&config, vocab, tied);
    open(builder, config)
}

/// A model whose blocks add nothing to the residual stream, so the logits of
/// a step depend only on the embedding row of its input token.
///
/// `token_embd` and `output` are row-major `[vocab, hidden]`.
pub(crate) fn open_passthrough(
    config: ModelConfig,
    vocab: &[String],
    token_embd: &[f32],
    output: &[f32],
) -> TinyModel {
    let builder = llama_gguf(&config, vocab, token_embd, Some(output), true);
    open(builder, config)
}
