pub mod providers;

use std::sync::Arc;

use promptline_core::config::ModelConfig;
use promptline_core::traits::Provider;

pub use providers::anthropic::AnthropicProvider;
pub use providers::openai::OpenAiProvider;

/// Create a provider based on the configured provider name.
pub fn create_provider(config: &ModelConfig) -> Arc<dyn Provider> {
    match config.provider.as_str() {
        "anthropic" | "claude" => Arc::new(AnthropicProvider::new(config.clone())),
        // Everything else uses the OpenAI-compatible client
        _ => Arc::new(OpenAiProvider::new(config.clone())),
    }
}
