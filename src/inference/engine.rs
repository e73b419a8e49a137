//! Single-token transformer forward pass and greedy generation

use super::generation::{greedy, GenerationConfig};
use super::session::{Scratch, Session, SessionPhase};
use crate::kernels::{KernelBackend, Kernels};
use crate::layer::{KvCache, LayerLoader, LayerWeights, SharedWeights};
use crate::model::{size_string, Model, ModelConfig, WeightStorageMode};
use crate::tensor::{ops, Tensor};
use crate::tokenizer::{ChatFormat, Message, Tokenizer};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Engine construction options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Precision of projection and embedding weights
    #[serde(default)]
    pub storage: WeightStorageMode,
    /// Kernel provider
    #[serde(default)]
    pub backend: KernelBackend,
}

/// Llama inference engine
///
/// All weights are loaded up front and never mutated; per-stream state lives
/// in a [`Session`].
pub struct InferenceEngine {
    model: Arc<Model>,
    config: ModelConfig,
    storage: WeightStorageMode,
    kernels: Arc<dyn Kernels>,
    tokenizer: Tokenizer,
    shared: SharedWeights,
    layers: Vec<LayerWeights>,
}

impl InferenceEngine {
    pub fn new(model: Arc<Model>, options: EngineOptions) -> Result<Self> {
        let kernels = options.backend.create();
        Self::with_kernels(model, options.storage, kernels)
    }

    /// Create an engine around an explicit kernel provider
    pub fn with_kernels(
        model: Arc<Model>,
        storage: WeightStorageMode,
        kernels: Arc<dyn Kernels>,
    ) -> Result<Self> {
        let config = model.config().clone();
        let tokenizer = Tokenizer::from_metadata(&model.metadata().metadata)?;

        let loader = LayerLoader::new(&model, storage);
        let shared = loader.load_shared_weights()?;
        let layers = (0..loader.num_layers())
            .map(|idx| loader.load_layer(idx))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Engine ready: {} layers, {} weights, {} kernels, {} resident, tied classifier: {}",
            layers.len(),
            storage,
            kernels.name(),
            size_string(model.cached_bytes()),
            shared.is_tied()
        );

        Ok(Self {
            model,
            config,
            storage,
            kernels,
            tokenizer,
            shared,
            layers,
        })
    }

    /// Get model config
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn storage_mode(&self) -> WeightStorageMode {
        self.storage
    }

    pub fn kernels(&self) -> &dyn Kernels {
        &*self.kernels
    }

    /// Fresh KV caches and buffers sized for this engine
    pub fn new_session(&self) -> Session {
        let session = Session::new(&self.config);
        debug!("Allocated session: {}", size_string(session.size_in_bytes()));
        session
    }

    /// Run one token at `pos` and return the classifier logits
    ///
    /// `pos` must be at most the number of positions already cached; an
    /// earlier position overwrites the cache from there on.
    pub fn forward<'s>(&self, session: &'s mut Session, token: u32, pos: usize) -> Result<&'s [f32]> {
        if token as usize >= self.config.vocab_size {
            return Err(Error::Generation(format!(
                "token {} is outside the vocabulary of {}",
                token, self.config.vocab_size
            )));
        }
        session.check_config(&self.config)?;
        session.check_position(pos)?;

        let s = &mut session.scratch;
        self.shared.token_embd.copy_row(token as usize, &mut s.x)?;

        for (layer, cache) in self.layers.iter().zip(session.caches.iter_mut()) {
            self.block(layer, cache, s, pos)?;
        }

        let kernels = &*self.kernels;
        kernels.normalize(&mut s.x, norm_weights(&self.shared.output_norm)?);
        kernels.project(&self.shared.output, &s.x, &mut s.logits);

        Ok(&session.scratch.logits)
    }

    /// One transformer block, updating the residual stream `s.x` in place
    fn block(&self, w: &LayerWeights, cache: &mut KvCache, s: &mut Scratch, pos: usize) -> Result<()> {
        let kernels = &*self.kernels;
        let c = &self.config;
        let head_dim = c.head_dim();
        let group = c.gqa_ratio();

        // Attention
        s.residual.copy_from_slice(&s.x);
        kernels.normalize(&mut s.x, norm_weights(&w.attn_norm)?);

        kernels.project(&w.attn_q, &s.x, &mut s.q);
        kernels.project(&w.attn_k, &s.x, &mut s.k);
        kernels.project(&w.attn_v, &s.x, &mut s.v);

        kernels.rotate(&mut s.q, pos, c.num_attention_heads, head_dim, c.rope_theta);
        kernels.rotate(&mut s.k, pos, c.num_key_value_heads, head_dim, c.rope_theta);

        cache.write(pos, &s.k, &s.v)?;

        let seq_len = pos + 1;
        let span = seq_len * head_dim;
        for kv_head in 0..c.num_key_value_heads {
            cache.gather_keys(kv_head, head_dim, seq_len, &mut s.key_head);
            cache.gather_values(kv_head, head_dim, seq_len, &mut s.value_head);

            for h in kv_head * group..(kv_head + 1) * group {
                let heads = h * head_dim..(h + 1) * head_dim;
                let scores = &mut s.scores[..seq_len];
                kernels.attend_scores(&s.q[heads.clone()], &s.key_head[..span], scores);
                kernels.softmax(scores);
                kernels.attend_values(scores, &s.value_head[..span], &mut s.attn_out[heads]);
            }
        }

        kernels.project(&w.attn_output, &s.attn_out, &mut s.x);
        ops::add(&mut s.x, &s.residual);

        // Feed-forward (SwiGLU)
        s.residual.copy_from_slice(&s.x);
        kernels.normalize(&mut s.x, norm_weights(&w.ffn_norm)?);

        kernels.project(&w.ffn_gate, &s.x, &mut s.ffn_gate);
        kernels.project(&w.ffn_up, &s.x, &mut s.ffn_up);
        kernels.silu(&mut s.ffn_gate);
        ops::mul(&mut s.ffn_gate, &s.ffn_up);

        kernels.project(&w.ffn_down, &s.ffn_gate, &mut s.x);
        ops::add(&mut s.x, &s.residual);

        Ok(())
    }

    /// Greedy generation in a fresh session
    pub fn generate(&self, prompt: &[u32], config: &GenerationConfig) -> Result<Vec<u32>> {
        let mut session = self.new_session();
        self.generate_with(&mut session, prompt, config, |_| {})
    }

    /// Greedy generation, calling `on_token` for each generated id
    ///
    /// The session is reset first. The result holds generated ids only,
    /// including a trailing stop token if one ended generation.
    pub fn generate_with(
        &self,
        session: &mut Session,
        prompt: &[u32],
        config: &GenerationConfig,
        mut on_token: impl FnMut(u32),
    ) -> Result<Vec<u32>> {
        if prompt.is_empty() {
            return Err(Error::Generation("prompt is empty".to_string()));
        }
        if config.max_new_tokens == 0 {
            return Ok(Vec::new());
        }
        let max_seq_len = self.config.max_seq_len;
        if prompt.len() > max_seq_len {
            return Err(Error::Generation(format!(
                "prompt of {} tokens exceeds context length {}",
                prompt.len(),
                max_seq_len
            )));
        }

        session.reset();
        let start = Instant::now();
        for (pos, &token) in prompt.iter().enumerate() {
            self.forward(session, token, pos)?;
        }
        let prefill = start.elapsed();

        session.phase = SessionPhase::Decode;
        let mut next = greedy(session.logits());
        let mut generated = vec![next];
        on_token(next);

        while generated.len() < config.max_new_tokens && !config.is_stop(next) {
            let pos = prompt.len() + generated.len() - 1;
            if pos >= max_seq_len {
                debug!("Context full after {} tokens", generated.len());
                break;
            }
            next = greedy(self.forward(session, next, pos)?);
            generated.push(next);
            on_token(next);
        }
        session.phase = SessionPhase::Stopped;

        let decode = start.elapsed() - prefill;
        info!(
            "Prefill {} tokens in {:.2?}, generated {} tokens in {:.2?} ({:.1} tok/s)",
            prompt.len(),
            prefill,
            generated.len(),
            decode,
            generated.len() as f64 / decode.as_secs_f64().max(1e-9)
        );

        Ok(generated)
    }

    /// Answer `user` in the Llama 3 chat template; an empty `system` is
    /// left out of the dialog
    pub fn chat(&self, system: &str, user: &str, max_new_tokens: usize) -> Result<String> {
        let mut session = self.new_session();
        self.chat_with(&mut session, system, user, max_new_tokens, |_| {})
    }

    /// Streaming variant of [`InferenceEngine::chat`]
    pub fn chat_with(
        &self,
        session: &mut Session,
        system: &str,
        user: &str,
        max_new_tokens: usize,
        on_token: impl FnMut(u32),
    ) -> Result<String> {
        let format = ChatFormat::new(&self.tokenizer)?;

        let mut dialog = Vec::with_capacity(2);
        if !system.is_empty() {
            dialog.push(Message::system(system));
        }
        dialog.push(Message::user(user));

        let prompt = format.encode_dialog_prompt(&dialog)?;
        let config = GenerationConfig::new(max_new_tokens, format.stop_tokens());
        let generated = self.generate_with(session, &prompt, &config, on_token)?;

        let answer: Vec<u32> = generated
            .into_iter()
            .take_while(|&t| !format.is_stop_token(t))
            .collect();
        Ok(self.tokenizer.decode(&answer))
    }
}

fn norm_weights(tensor: &Tensor) -> Result<&[f32]> {
    tensor.as_f32().ok_or_else(|| Error::UnsupportedDType {
        tensor: "norm weight".to_string(),
        dtype: tensor.dtype().to_string(),
    })
}
