//! LLM backend contract (§6): a single `chat_stream` operation against an
//! OpenAI-compatible HTTP endpoint, with an optional per-call grammar
//! constraint. The teacher's `LLMManager` juggles local/external/hybrid
//! backends with tool-calling and hardware detection; none of that survives
//! here because the spec's external system contract names exactly one
//! operation. What's kept is the teacher's shape: a trait at the seam
//! (`LlmBackend`), a `streaming.rs` token channel, and an `external.rs` HTTP
//! client built on the same `reqwest` stack.

pub mod external;
pub mod streaming;

pub use external::ExternalLlm;
pub use streaming::{StreamingResponse, TokenStream};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call sampling overrides (§6). `grammar` is a BNF-like constraint
/// string passed straight through to the backend; callers that need
/// grammar-constrained JSON (query expansion, grading) set it and fall back
/// to an ungrammared retry on failure themselves — this struct only carries
/// the request, it doesn't implement the fallback policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationOverride {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub repeat_penalty: Option<f32>,
    pub num_predict: Option<i32>,
    pub grammar: Option<String>,
}

impl GenerationOverride {
    pub fn with_grammar(grammar: impl Into<String>) -> Self {
        Self {
            grammar: Some(grammar.into()),
            ..Default::default()
        }
    }
}

/// Final statistics emitted once a stream completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationStats {
    pub total_tokens: u64,
    pub latency_ms: u64,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Stream a chat completion. The returned [`TokenStream`] yields text
    /// deltas and terminates after emitting one final [`GenerationStats`].
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        config_override: Option<GenerationOverride>,
    ) -> Result<TokenStream>;
}

/// Drain a stream to completion and return the concatenated text plus the
/// final stats, for call sites that need the whole answer at once
/// (query expansion, grading, non-streaming guardrail passes) rather than
/// token-by-token delivery.
pub async fn collect_text(stream: &mut TokenStream) -> (String, GenerationStats) {
    let mut text = String::new();
    let mut stats = GenerationStats::default();
    while let Some(delta) = stream.next().await {
        text.push_str(&delta);
    }
    if let Some(final_stats) = stream.take_stats() {
        stats = final_stats;
    }
    (text, stats)
}
