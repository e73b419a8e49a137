//! Transformer execution and greedy generation

mod engine;
mod generation;
mod session;
#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineOptions, InferenceEngine};
pub use generation::{greedy, GenerationConfig, END_OF_TEXT_ID};
pub use session::{Session, SessionPhase};
