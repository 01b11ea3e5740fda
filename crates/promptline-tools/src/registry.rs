use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use promptline_core::error::{PromptlineError, Result};
use promptline_core::traits::Tool;
use promptline_core::types::{ToolCall, ToolContext, ToolDefinition, ToolOutput};

/// Registry of available tools.
///
/// Built once per job invocation and shared read-only by every run.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Get every tool definition, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.list()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition())
            .collect()
    }

    /// Definitions for the named tools, in the given order.
    pub fn definitions_for(&self, names: &[String]) -> Result<Vec<ToolDefinition>> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .map(|t| t.definition())
                    .ok_or_else(|| PromptlineError::ToolNotFound(name.clone()))
            })
            .collect()
    }

    /// Resolve and invoke a single tool call.
    pub async fn invoke(&self, call: &ToolCall, ctx: ToolContext) -> Result<ToolOutput> {
        let (tool, input) = self.prepare(call)?;
        execute(tool, call, input, ctx).await
    }

    /// Invoke every call of one dispatch turn concurrently.
    ///
    /// All calls are resolved and their arguments parsed before anything
    /// executes; the first failure aborts the turn. Results keep call order.
    pub async fn invoke_all(&self, calls: &[ToolCall], ctx: &ToolContext) -> Result<Vec<ToolOutput>> {
        let prepared = calls
            .iter()
            .map(|call| self.prepare(call).map(|(tool, input)| (tool, call, input)))
            .collect::<Result<Vec<_>>>()?;

        let futs = prepared
            .into_iter()
            .map(|(tool, call, input)| execute(tool, call, input, ctx.clone()));

        futures::future::try_join_all(futs).await
    }

    fn prepare(&self, call: &ToolCall) -> Result<(Arc<dyn Tool>, serde_json::Value)> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| PromptlineError::ToolNotFound(call.name.clone()))?;
        let input = parse_arguments(&call.name, &call.arguments)?;
        Ok((tool, input))
    }

    /// Create a registry with all built-in tools registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(crate::builtin::read_file::ReadFileTool);
        registry.register(crate::builtin::list_files::ListFilesTool);
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn execute(
    tool: Arc<dyn Tool>,
    call: &ToolCall,
    input: serde_json::Value,
    ctx: ToolContext,
) -> Result<ToolOutput> {
    debug!(tool = %call.name, id = %call.id, "Invoking tool");

    let content = match tool.timeout_secs() {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), tool.execute(input, ctx))
            .await
            .map_err(|_| PromptlineError::ToolTimeout {
                tool: call.name.clone(),
                timeout_secs: secs,
            })??,
        None => tool.execute(input, ctx).await?,
    };

    Ok(ToolOutput {
        id: call.id.clone(),
        name: call.name.clone(),
        content,
    })
}

/// Accept a JSON object, or a string holding a serialized JSON object.
pub fn parse_arguments(tool: &str, arguments: &serde_json::Value) -> Result<serde_json::Value> {
    let malformed = |message: String| PromptlineError::ToolArguments {
        tool: tool.to_string(),
        message,
    };

    match arguments {
        serde_json::Value::Object(_) => Ok(arguments.clone()),
        serde_json::Value::Null => Ok(serde_json::json!({})),
        serde_json::Value::String(raw) if raw.trim().is_empty() => Ok(serde_json::json!({})),
        serde_json::Value::String(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(v @ serde_json::Value::Object(_)) => Ok(v),
            Ok(other) => Err(malformed(format!("expected a JSON object, got {}", other))),
            Err(e) => Err(malformed(e.to_string())),
        },
        other => Err(malformed(format!("expected a JSON object, got {}", other))),
    }
}
