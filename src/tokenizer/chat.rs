//! Llama 3 Instruct chat template
//!
//! ```text
//! <|begin_of_text|><|start_header_id|>system<|end_header_id|>\n{content}<|eot_id|>
//! <|start_header_id|>user<|end_header_id|>\n{content}<|eot_id|>
//! <|start_header_id|>assistant<|end_header_id|>\n
//! ```

use super::Tokenizer;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

pub const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
pub const END_OF_TEXT: &str = "<|end_of_text|>";
pub const START_HEADER: &str = "<|start_header_id|>";
pub const END_HEADER: &str = "<|end_header_id|>";
pub const END_OF_TURN: &str = "<|eot_id|>";

/// Speaker of a dialog message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Builds dialog prompts from the tokenizer's special tokens
pub struct ChatFormat<'a> {
    tokenizer: &'a Tokenizer,
    begin_of_text: u32,
    start_header: u32,
    end_header: u32,
    end_of_turn: u32,
    end_of_text: u32,
}

impl<'a> ChatFormat<'a> {
    /// Fails if any of the five marker tokens is missing
    pub fn new(tokenizer: &'a Tokenizer) -> Result<Self> {
        let special = |name: &str| {
            tokenizer
                .special_token(name)
                .ok_or_else(|| Error::Tokenizer(format!("vocabulary has no {} token", name)))
        };

        Ok(Self {
            tokenizer,
            begin_of_text: special(BEGIN_OF_TEXT)?,
            start_header: special(START_HEADER)?,
            end_header: special(END_HEADER)?,
            end_of_turn: special(END_OF_TURN)?,
            end_of_text: special(END_OF_TEXT)?,
        })
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        self.tokenizer
    }

    pub fn begin_of_text(&self) -> u32 {
        self.begin_of_text
    }

    /// End-of-text and end-of-turn
    pub fn stop_tokens(&self) -> [u32; 2] {
        [self.end_of_text, self.end_of_turn]
    }

    pub fn is_stop_token(&self, id: u32) -> bool {
        self.stop_tokens().contains(&id)
    }

    /// `start_header, role, end_header, "\n"`
    pub fn encode_header(&self, role: Role) -> Result<Vec<u32>> {
        let mut tokens = vec![self.start_header];
        tokens.extend(self.tokenizer.encode(role.as_str())?);
        tokens.push(self.end_header);
        tokens.extend(self.tokenizer.encode("\n")?);
        Ok(tokens)
    }

    /// Header, trimmed content, end-of-turn
    pub fn encode_message(&self, message: &Message) -> Result<Vec<u32>> {
        let mut tokens = self.encode_header(message.role)?;
        tokens.extend(self.tokenizer.encode(message.content.trim())?);
        tokens.push(self.end_of_turn);
        Ok(tokens)
    }

    /// Full prompt ending in an open assistant header
    pub fn encode_dialog_prompt(&self, dialog: &[Message]) -> Result<Vec<u32>> {
        let mut tokens = vec![self.begin_of_text];
        for message in dialog {
            tokens.extend(self.encode_message(message)?);
        }
        tokens.extend(self.encode_header(Role::Assistant)?);
        Ok(tokens)
    }
}
