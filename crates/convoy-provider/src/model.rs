//! Model information types.

use serde::{Deserialize, Serialize};

/// Information about an AI model.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelInfo {
    /// Model ID (e.g., "claude-sonnet-4-5-20250929").
    pub id: String,
    /// Provider ID (e.g., "anthropic").
    pub provider_id: String,
    /// Human-readable name.
    pub name: String,
    /// Model family (e.g., "claude-4.5").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    /// Model capabilities.
    pub capabilities: ModelCapabilities,
    /// Pricing information.
    pub cost: ModelCost,
    /// Token limits.
    pub limit: ModelLimit,
    /// Model status.
    #[serde(default)]
    pub status: ModelStatus,
}

/// Model capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Supports temperature parameter.
    #[serde(default)]
    pub temperature: bool,
    /// Supports reasoning/thinking mode.
    #[serde(default)]
    pub reasoning: bool,
    /// Supports file attachments.
    #[serde(default)]
    pub attachment: bool,
    /// Supports tool/function calling.
    #[serde(default = "default_true")]
    pub tool_call: bool,
    /// Input modality support.
    #[serde(default)]
    pub input: ModalitySupport,
    /// Output modality support.
    #[serde(default)]
    pub output: ModalitySupport,
    /// Supports interleaved content (text + thinking).
    #[serde(default)]
    pub interleaved: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            temperature: true,
            reasoning: false,
            attachment: false,
            tool_call: true,
            input: ModalitySupport::default(),
            output: ModalitySupport::default(),
            interleaved: false,
        }
    }
}

/// Modality support (input or output).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModalitySupport {
    /// Supports text.
    #[serde(default = "default_true")]
    pub text: bool,
    /// Supports images.
    #[serde(default)]
    pub image: bool,
    /// Supports audio.
    #[serde(default)]
    pub audio: bool,
    /// Supports video.
    #[serde(default)]
    pub video: bool,
    /// Supports PDF documents.
    #[serde(default)]
    pub pdf: bool,
}

/// Model pricing (per million tokens).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCost {
    /// Input token cost (per million).
    pub input: f64,
    /// Output token cost (per million).
    pub output: f64,
    /// Cache read cost (per million).
    #[serde(default)]
    pub cache_read: f64,
    /// Cache write cost (per million).
    #[serde(default)]
    pub cache_write: f64,
}

impl ModelCost {
    /// Calculate the cost for a given usage.
    pub fn calculate(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output;
        input_cost + output_cost
    }

    /// Calculate cost including cache tokens.
    pub fn calculate_with_cache(
        &self,
        input_tokens: u32,
        output_tokens: u32,
        cache_read: u32,
        cache_write: u32,
    ) -> f64 {
        self.calculate(input_tokens, output_tokens)
            + (cache_read as f64 / 1_000_000.0) * self.cache_read
            + (cache_write as f64 / 1_000_000.0) * self.cache_write
    }
}

/// Model token limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelLimit {
    /// Maximum context length (input + output).
    pub context: u32,
    /// Maximum output tokens.
    pub output: u32,
}

/// Model status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    /// Model is in alpha testing.
    Alpha,
    /// Model is in beta testing.
    Beta,
    /// Model is deprecated.
    Deprecated,
    /// Model is active and stable.
    #[default]
    Active,
}

impl ModelInfo {
    /// Create a new model info with defaults.
    pub fn new(id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider_id: provider_id.into(),
            name: String::new(),
            family: None,
            capabilities: ModelCapabilities::default(),
            cost: ModelCost::default(),
            limit: ModelLimit::default(),
            status: ModelStatus::default(),
        }
    }

    /// Set the model name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the model capabilities.
    pub fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the model cost.
    pub fn with_cost(mut self, cost: ModelCost) -> Self {
        self.cost = cost;
        self
    }

    /// Set the model limits.
    pub fn with_limit(mut self, limit: ModelLimit) -> Self {
        self.limit = limit;
        self
    }
}

/// Built-in model definitions for Anthropic, the only wired-up provider.
pub mod anthropic {
    use super::*;

    /// Claude Sonnet 4.5 - default model for the orchestrator.
    pub fn claude_sonnet_4_5() -> ModelInfo {
        ModelInfo {
            id: "claude-sonnet-4-5-20250929".to_string(),
            provider_id: "anthropic".to_string(),
            name: "Claude Sonnet 4.5".to_string(),
            family: Some("claude-4.5".to_string()),
            capabilities: ModelCapabilities {
                temperature: true,
                reasoning: true,
                attachment: true,
                tool_call: true,
                input: ModalitySupport {
                    text: true,
                    image: true,
                    audio: false,
                    video: false,
                    pdf: true,
                },
                output: ModalitySupport {
                    text: true,
                    ..Default::default()
                },
                interleaved: true,
            },
            cost: ModelCost {
                input: 3.0,
                output: 15.0,
                cache_read: 0.3,
                cache_write: 3.75,
            },
            limit: ModelLimit {
                context: 200_000,
                output: 64_000,
            },
            status: ModelStatus::Active,
        }
    }

    /// Claude Haiku 4.5 - fast, cheaper alternative.
    pub fn claude_haiku_4_5() -> ModelInfo {
        ModelInfo {
            id: "claude-haiku-4-5-20251001".to_string(),
            provider_id: "anthropic".to_string(),
            name: "Claude Haiku 4.5".to_string(),
            family: Some("claude-4.5".to_string()),
            capabilities: ModelCapabilities {
                temperature: true,
                reasoning: true,
                attachment: true,
                tool_call: true,
                input: ModalitySupport {
                    text: true,
                    image: true,
                    audio: false,
                    video: false,
                    pdf: true,
                },
                output: ModalitySupport {
                    text: true,
                    ..Default::default()
                },
                interleaved: true,
            },
            cost: ModelCost {
                input: 1.0,
                output: 5.0,
                cache_read: 0.1,
                cache_write: 1.25,
            },
            limit: ModelLimit {
                context: 200_000,
                output: 64_000,
            },
            status: ModelStatus::Active,
        }
    }
}
