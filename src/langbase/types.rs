use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Chat message sent to a pipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Speaker
    pub role: MessageRole,
    /// Text
    pub content: String,
}

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions
    System,
    /// Caller input
    User,
    /// Model output
    Assistant,
}

impl Message {
    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST /v1/pipes/run`
#[derive(Debug, Clone, Serialize)]
pub struct PipeRequest {
    /// Pipe name
    pub name: String,
    /// Conversation
    pub messages: Vec<Message>,
    /// Always false; the client reads whole responses
    pub stream: bool,
    /// Prompt template variables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, String>>,
}

impl PipeRequest {
    /// Non-streaming request
    pub fn new(name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            name: name.into(),
            messages,
            stream: false,
            variables: None,
        }
    }

    /// Add one template variable
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Pipe run result
#[derive(Debug, Clone, Deserialize)]
pub struct PipeResponse {
    /// Whether the pipe reported success
    #[serde(default)]
    pub success: bool,
    /// Model completion text
    pub completion: String,
    /// Conversation thread, unused by this crate
    #[serde(rename = "threadId", default)]
    pub thread_id: Option<String>,
    /// Provider details
    #[serde(default)]
    pub raw: Option<RawResponse>,
}

impl PipeResponse {
    /// The completion with surrounding markdown code fences removed.
    pub fn completion_body(&self) -> &str {
        strip_code_fences(&self.completion)
    }

    /// Tokens used, when the provider reported them.
    pub fn total_tokens(&self) -> Option<u32> {
        self.raw
            .as_ref()
            .and_then(|r| r.usage.as_ref())
            .and_then(|u| u.total_tokens)
    }
}

/// Provider details of a pipe run
#[derive(Debug, Clone, Deserialize)]
pub struct RawResponse {
    /// Model that answered
    pub model: Option<String>,
    /// Token accounting
    pub usage: Option<Usage>,
}

/// Token accounting
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    pub prompt_tokens: Option<u32>,
    /// Completion tokens
    pub completion_tokens: Option<u32>,
    /// Sum of both
    pub total_tokens: Option<u32>,
}

/// Strip an optional ```` ```json ```` fence around model output.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;
