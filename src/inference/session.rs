//! Per-conversation mutable state

use crate::layer::KvCache;
use crate::model::ModelConfig;
use crate::{Error, Result};

/// Where a session is in its generation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Consuming prompt tokens
    Prefill,
    /// Producing tokens one at a time
    Decode,
    /// Budget spent, stop token seen or context full
    Stopped,
}

/// Working buffers reused by every forward step
#[derive(Debug)]
pub(crate) struct Scratch {
    /// Residual stream
    pub x: Vec<f32>,
    pub residual: Vec<f32>,
    pub q: Vec<f32>,
    pub k: Vec<f32>,
    pub v: Vec<f32>,
    pub attn_out: Vec<f32>,
    /// One kv head's keys for positions `0..=pos`, contiguous
    pub key_head: Vec<f32>,
    pub value_head: Vec<f32>,
    pub scores: Vec<f32>,
    pub ffn_gate: Vec<f32>,
    pub ffn_up: Vec<f32>,
    pub logits: Vec<f32>,
}

impl Scratch {
    fn new(config: &ModelConfig) -> Self {
        let head_dim = config.head_dim();
        Self {
            x: vec![0.0; config.hidden_size],
            residual: vec![0.0; config.hidden_size],
            q: vec![0.0; config.hidden_size],
            k: vec![0.0; config.kv_dim()],
            v: vec![0.0; config.kv_dim()],
            attn_out: vec![0.0; config.hidden_size],
            key_head: vec![0.0; config.max_seq_len * head_dim],
            value_head: vec![0.0; config.max_seq_len * head_dim],
            scores: vec![0.0; config.max_seq_len],
            ffn_gate: vec![0.0; config.intermediate_size],
            ffn_up: vec![0.0; config.intermediate_size],
            logits: vec![0.0; config.vocab_size],
        }
    }
}

/// KV caches and scratch space for one token stream
///
/// A session is tied to the dimensions of the engine that created it and is
/// mutated by exactly one forward step at a time.
#[derive(Debug)]
pub struct Session {
    /// Dimensions every buffer was sized for
    config: ModelConfig,
    pub(crate) caches: Vec<KvCache>,
    pub(crate) scratch: Scratch,
    pub(crate) phase: SessionPhase,
}

impl Session {
    pub(crate) fn new(config: &ModelConfig) -> Self {
        Self {
            config: config.clone(),
            caches: (0..config.num_hidden_layers)
                .map(|_| KvCache::new(config.max_seq_len, config.kv_dim()))
                .collect(),
            scratch: Scratch::new(config),
            phase: SessionPhase::Prefill,
        }
    }

    /// Forget all cached positions
    pub fn reset(&mut self) {
        for cache in &mut self.caches {
            cache.clear();
        }
        self.phase = SessionPhase::Prefill;
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Number of positions in the KV caches
    pub fn len(&self) -> usize {
        self.caches.first().map_or(0, KvCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Context capacity in positions
    pub fn capacity(&self) -> usize {
        self.caches.first().map_or(0, KvCache::capacity)
    }

    /// Logits of the most recent forward step
    pub fn logits(&self) -> &[f32] {
        &self.scratch.logits
    }

    /// Per-layer caches
    pub fn caches(&self) -> &[KvCache] {
        &self.caches
    }

    /// Dimensions this session was sized for
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub(crate) fn check_config(&self, config: &ModelConfig) -> Result<()> {
        if self.config != *config {
            return Err(Error::Generation(format!(
                "session sized for {} layers x {} positions (hidden {}) cannot run a model with {} layers x {} positions (hidden {})",
                self.config.num_hidden_layers,
                self.config.max_seq_len,
                self.config.hidden_size,
                config.num_hidden_layers,
                config.max_seq_len,
                config.hidden_size
            )));
        }
        Ok(())
    }

    pub(crate) fn check_position(&self, pos: usize) -> Result<()> {
        match self.caches.first() {
            Some(cache) => cache.check_position(pos),
            None => Ok(()),
        }
    }

    /// Bytes held by caches and scratch buffers
    pub fn size_in_bytes(&self) -> usize {
        let s = &self.scratch;
        let scratch = [
            &s.x, &s.residual, &s.q, &s.k, &s.v, &s.attn_out, &s.key_head, &s.value_head,
            &s.scores, &s.ffn_gate, &s.ffn_up, &s.logits,
        ]
        .iter()
        .map(|b| b.len())
        .sum::<usize>()
            * std::mem::size_of::<f32>();
        scratch + self.caches.iter().map(KvCache::size_in_bytes).sum::<usize>()
    }
}
