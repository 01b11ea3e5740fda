use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use promptline_core::config::ModelConfig;
use promptline_core::error::{PromptlineError, Result};
use promptline_core::traits::Provider;
use promptline_core::types::*;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    http: Client,
    config: ModelConfig,
}

impl AnthropicProvider {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

// Anthropic API request types
#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Serialize, Debug)]
struct ApiMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

// Anthropic API response types
#[derive(Deserialize, Debug)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum ResponseBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<ApiMessage>) {
    let mut system: Option<String> = None;
    let mut api_msgs = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                let text = msg.text();
                system = Some(match system {
                    Some(prev) => format!("{}\n\n{}", prev, text),
                    None => text,
                });
            }
            Role::User => api_msgs.push(ApiMessage {
                role: "user".to_string(),
                content: convert_content_blocks(&msg.content),
            }),
            Role::Assistant => api_msgs.push(ApiMessage {
                role: "assistant".to_string(),
                content: convert_content_blocks(&msg.content),
            }),
            // Tool results are sent as user messages in Anthropic API
            Role::Tool => api_msgs.push(ApiMessage {
                role: "user".to_string(),
                content: convert_content_blocks(&msg.content),
            }),
        }
    }

    (system, api_msgs)
}

/// `tool_use.input` must be an object; string arguments are decoded first.
fn input_object(arguments: &serde_json::Value) -> serde_json::Value {
    match arguments {
        serde_json::Value::String(s) => {
            serde_json::from_str(s).unwrap_or_else(|_| serde_json::json!({}))
        }
        other => other.clone(),
    }
}

fn convert_content_blocks(blocks: &[ContentBlock]) -> serde_json::Value {
    if blocks.len() == 1 {
        if let ContentBlock::Text { text } = &blocks[0] {
            return serde_json::Value::String(text.clone());
        }
    }

    let api_blocks: Vec<serde_json::Value> = blocks
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text } => serde_json::json!({
                "type": "text",
                "text": text,
            }),
            ContentBlock::ToolUse { id, name, input } => serde_json::json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input_object(input),
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
            } => serde_json::json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
            }),
        })
        .collect();

    serde_json::Value::Array(api_blocks)
}

fn convert_response(response: MessagesResponse) -> ProviderResponse {
    let usage = response
        .usage
        .map(|u| Usage::new(u.input_tokens, u.output_tokens))
        .unwrap_or_default();

    let mut text = String::new();
    let mut calls = Vec::new();
    for block in response.content {
        match block {
            ResponseBlock::Text { text: t } => text.push_str(&t),
            ResponseBlock::ToolUse { id, name, input } => calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            ResponseBlock::Unsupported => {}
        }
    }

    let message = if calls.is_empty() {
        ChatMessage::assistant_text(text)
    } else {
        ChatMessage::assistant_tool_calls(text, &calls)
    };

    ProviderResponse {
        reason: StopReason::from_wire(response.stop_reason.as_deref().unwrap_or("end_turn")),
        message,
        usage,
    }
}

impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn complete(&self, request: ChatRequest) -> BoxFuture<'_, Result<ProviderResponse>> {
        Box::pin(async move {
            let config = &self.config;
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| PromptlineError::Config("Anthropic API key not set".into()))?;

            let base_url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);

            let (system, api_messages) = convert_messages(&request.messages);

            let body = MessagesRequest {
                model: config.model_id.clone(),
                max_tokens: config.max_tokens,
                temperature: if config.temperature > 0.0 {
                    Some(config.temperature)
                } else {
                    None
                },
                messages: api_messages,
                system,
                tools: request
                    .tools
                    .iter()
                    .map(|t| ApiTool {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        input_schema: t.input_schema.clone(),
                    })
                    .collect(),
            };

            debug!(model = %config.model_id, messages = body.messages.len(), "Anthropic request");

            let mut req = self
                .http
                .post(base_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json");

            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .json(&body)
                .send()
                .await
                .map_err(|e| PromptlineError::Provider {
                    provider: self.name().to_string(),
                    message: e.to_string(),
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(PromptlineError::Provider {
                    provider: self.name().to_string(),
                    message: format!("HTTP {}: {}", status, body),
                });
            }

            let parsed: MessagesResponse =
                response.json().await.map_err(|e| PromptlineError::Provider {
                    provider: self.name().to_string(),
                    message: format!("invalid response body: {}", e),
                })?;

            Ok(convert_response(parsed))
        })
    }
}
