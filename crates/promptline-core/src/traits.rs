use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// LLM provider. One request/response exchange per call.
///
/// Vendor adapters translate a `ChatRequest` into their wire format and
/// normalize the reply into a `ProviderResponse`. Provider-level failures
/// come back as `Err` and are propagated by the engine unchanged.
pub trait Provider: Send + Sync + 'static {
    /// Short provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Execute one chat request.
    fn complete(&self, request: ChatRequest) -> BoxFuture<'_, Result<ProviderResponse>>;
}

/// A named capability the model may call during a conversation.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with already-parsed arguments.
    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<String>>;

    /// Optional timeout in seconds for this tool. `None` waits indefinitely.
    fn timeout_secs(&self) -> Option<u64> {
        None
    }

    /// Definition advertised to the provider.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}
