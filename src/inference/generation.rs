//! Greedy decoding configuration

use crate::tensor::ops;
use serde::{Deserialize, Serialize};

/// `<|end_of_text|>` in the Llama 3 vocabulary
pub const END_OF_TEXT_ID: u32 = 128_001;

/// Configuration for text generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum number of tokens to generate
    pub max_new_tokens: usize,

    /// Generation ends after emitting any of these
    #[serde(default = "default_stop_tokens")]
    pub stop_tokens: Vec<u32>,
}

fn default_stop_tokens() -> Vec<u32> {
    vec![END_OF_TEXT_ID]
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 256,
            stop_tokens: default_stop_tokens(),
        }
    }
}

impl GenerationConfig {
    pub fn new(max_new_tokens: usize, stop_tokens: impl IntoIterator<Item = u32>) -> Self {
        Self {
            max_new_tokens,
            stop_tokens: stop_tokens.into_iter().collect(),
        }
    }

    pub fn is_stop(&self, token: u32) -> bool {
        self.stop_tokens.contains(&token)
    }
}

/// Greedy choice: the lowest id among the highest logits
pub fn greedy(logits: &[f32]) -> u32 {
    ops::argmax(logits) as u32
}
