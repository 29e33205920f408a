//! Langbase Pipes client used by the LLM-backed evidence source.

mod client;
mod types;

pub use client::LangbaseClient;
pub use types::{Message, MessageRole, PipeRequest, PipeResponse, RawResponse, Usage};
pub(crate) use types::strip_code_fences;
