//! Streaming language model provider protocol for convoy.
//!
//! This crate defines the `LanguageModel` trait and the `StreamChunk` wire
//! protocol that the prompt engine drives regardless of which concrete
//! provider backs a conversation. Two implementations ship here:
//! - `anthropic`: the Anthropic Messages API (streaming, tool use).
//! - `mock`: a deterministic, scriptable provider for tests.

pub mod error;
pub mod message;
pub mod model;
pub mod stream;

pub mod anthropic;
pub mod mock;

pub use error::{ProviderError, ProviderResult};
pub use message::{ContentPart, Message, Role};
pub use model::{ModelCapabilities, ModelCost, ModelInfo, ModelLimit};
pub use stream::StreamChunk;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

/// Options for text generation.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Temperature for sampling (0.0-1.0).
    pub temperature: Option<f32>,
    /// Top-p (nucleus) sampling.
    pub top_p: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// System prompt.
    pub system: Option<String>,
    /// Available tools.
    pub tools: Vec<ToolDefinition>,
    /// Cancellation token.
    pub abort: Option<tokio_util::sync::CancellationToken>,
    /// Provider-specific options.
    pub provider_options: Option<Value>,
}

/// A tool definition for the AI.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON Schema for the tool parameters.
    pub parameters: Value,
}

/// The main trait for AI language models.
///
/// Implementations of this trait provide access to different AI providers.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a streaming response.
    ///
    /// Returns a stream of `StreamChunk` items representing the response.
    async fn generate(
        &self,
        messages: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<BoxStream<'static, ProviderResult<StreamChunk>>>;

    /// Get information about this model.
    fn model_info(&self) -> &ModelInfo;

    /// Get the provider ID (e.g., "anthropic").
    fn provider_id(&self) -> &str;
}

/// A boxed language model for dynamic dispatch.
pub type BoxedLanguageModel = std::sync::Arc<dyn LanguageModel>;
