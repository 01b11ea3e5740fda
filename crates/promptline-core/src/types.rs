use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult { tool_use_id: String, content: String },
}

/// A chat message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text)
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, text)
    }

    /// An assistant message that requests tool calls, optionally with leading text.
    pub fn assistant_tool_calls(text: impl Into<String>, calls: &[ToolCall]) -> Self {
        let text = text.into();
        let mut content = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            content.push(ContentBlock::Text { text });
        }
        content.extend(calls.iter().map(|c| ContentBlock::ToolUse {
            id: c.id.clone(),
            name: c.name.clone(),
            input: c.arguments.clone(),
        }));
        Self {
            role: Role::Assistant,
            content,
            timestamp: Some(Utc::now()),
        }
    }

    /// A single tool message carrying every result of one dispatch turn.
    pub fn tool_results(outputs: &[ToolOutput]) -> Self {
        Self {
            role: Role::Tool,
            content: outputs
                .iter()
                .map(|o| ContentBlock::ToolResult {
                    tool_use_id: o.id.clone(),
                    content: o.content.clone(),
                })
                .collect(),
            timestamp: Some(Utc::now()),
        }
    }

    fn with_role(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Some(Utc::now()),
        }
    }

    /// Extract all text content from this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract the tool calls requested by this message.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Why the provider ended a generation turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    Stop,
    Length,
    FunctionCall,
    Other(String),
}

impl StopReason {
    /// Map an OpenAI-style `finish_reason` / Anthropic `stop_reason` string.
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "stop_sequence" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "tool_calls" | "function_call" | "tool_use" => Self::FunctionCall,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Token usage reported by one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(rename = "in")]
    pub input_tokens: u64,
    #[serde(rename = "out")]
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

impl std::ops::Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

/// Tool definition advertised to the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool invocation requested by the model.
///
/// `arguments` is either a JSON object or a string holding serialized JSON,
/// depending on what the provider returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The result of one tool call, fed back to the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub id: String,
    pub name: String,
    pub content: String,
}

/// Context passed to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub run_index: usize,
    pub working_dir: PathBuf,
}

/// Everything the provider needs for one call.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// A successful provider call.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub reason: StopReason,
    pub message: ChatMessage,
    pub usage: Usage,
}

/// Primitive kind of an output contract field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    StringList,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::StringList => "string-list",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FieldKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "string-list" => Ok(Self::StringList),
            other => Err(format!("unknown field kind '{}'", other)),
        }
    }
}

/// Externally visible outcome of one workflow invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub response: serde_json::Value,
    pub stats: Usage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
}

impl WorkflowResult {
    pub fn success(response: serde_json::Value, stats: Usage) -> Self {
        Self {
            response,
            stats,
            error: None,
            success: true,
        }
    }

    pub fn failure(error: impl Into<String>, stats: Usage) -> Self {
        Self {
            response: serde_json::Value::Null,
            stats,
            error: Some(error.into()),
            success: false,
        }
    }
}

/// Progress event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// A job invocation was planned.
    JobStarted { job: String, runs: usize },
    /// A run began executing.
    RunStarted { index: usize },
    /// A task within a run began executing.
    TaskStarted { run: usize, kind: String },
    /// A tool call was dispatched.
    ToolCall { run: usize, name: String },
    /// Live count of runs in flight.
    Running {
        in_flight: usize,
        completed: usize,
        total: usize,
    },
    /// A run failed; the scheduler continues.
    RunFailed { index: usize, error: String },
    /// A run completed successfully.
    RunCompleted { index: usize },
    /// Token usage from one provider call.
    Usage(Usage),
    /// All runs settled.
    Success { total: usize, failed: usize },
}
