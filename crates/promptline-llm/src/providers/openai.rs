use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use promptline_core::config::ModelConfig;
use promptline_core::error::{PromptlineError, Result};
use promptline_core::traits::Provider;
use promptline_core::types::*;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible provider. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiProvider {
    http: Client,
    config: ModelConfig,
}

impl OpenAiProvider {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

// Request types
#[derive(Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct OaiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OaiMessage {
    fn text(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct OaiToolCall {
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: OaiFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct OaiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
pub(crate) struct OaiTool {
    r#type: String,
    function: OaiToolDef,
}

#[derive(Serialize)]
pub(crate) struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

#[derive(Deserialize, Debug)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function".to_string(),
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

/// Tool arguments travel as a JSON string on this wire format.
fn arguments_string(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn convert_messages(messages: &[ChatMessage]) -> Vec<OaiMessage> {
    let mut oai_msgs = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => oai_msgs.push(OaiMessage::text("system", msg.text())),
            Role::User => oai_msgs.push(OaiMessage::text("user", msg.text())),
            Role::Assistant => {
                let calls = msg.tool_calls();
                if calls.is_empty() {
                    oai_msgs.push(OaiMessage::text("assistant", msg.text()));
                } else {
                    let text = msg.text();
                    oai_msgs.push(OaiMessage {
                        role: "assistant".to_string(),
                        content: if text.is_empty() { None } else { Some(text) },
                        tool_calls: Some(
                            calls
                                .iter()
                                .map(|c| OaiToolCall {
                                    id: c.id.clone(),
                                    r#type: function_type(),
                                    function: OaiFunction {
                                        name: c.name.clone(),
                                        arguments: arguments_string(&c.arguments),
                                    },
                                })
                                .collect(),
                        ),
                        tool_call_id: None,
                    });
                }
            }
            Role::Tool => {
                // One wire message per result
                for block in &msg.content {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                    } = block
                    {
                        oai_msgs.push(OaiMessage {
                            role: "tool".to_string(),
                            content: Some(content.clone()),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id.clone()),
                        });
                    }
                }
            }
        }
    }

    oai_msgs
}

fn convert_response(provider: &str, response: CompletionResponse) -> Result<ProviderResponse> {
    let usage = response
        .usage
        .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| PromptlineError::Provider {
            provider: provider.to_string(),
            message: "response contained no choices".into(),
        })?;

    let reason = StopReason::from_wire(choice.finish_reason.as_deref().unwrap_or("stop"));
    let text = choice.message.content.unwrap_or_default();
    let calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: serde_json::Value::String(tc.function.arguments),
        })
        .collect();

    let message = if calls.is_empty() {
        ChatMessage::assistant_text(text)
    } else {
        ChatMessage::assistant_tool_calls(text, &calls)
    };

    Ok(ProviderResponse {
        reason,
        message,
        usage,
    })
}

impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn complete(&self, request: ChatRequest) -> BoxFuture<'_, Result<ProviderResponse>> {
        Box::pin(async move {
            let config = &self.config;
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);

            let body = CompletionRequest {
                model: config.model_id.clone(),
                messages: convert_messages(&request.messages),
                max_tokens: config.max_tokens,
                temperature: if config.temperature > 0.0 {
                    Some(config.temperature)
                } else {
                    None
                },
                tools: convert_tools(&request.tools),
            };

            let mut req = self.http.post(base_url).json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            debug!(model = %config.model_id, messages = body.messages.len(), "OpenAI request");

            let response = req.send().await.map_err(|e| PromptlineError::Provider {
                provider: self.name().to_string(),
                message: e.to_string(),
            })?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(PromptlineError::Provider {
                    provider: self.name().to_string(),
                    message: format!("HTTP {}: {}", status, body),
                });
            }

            let parsed: CompletionResponse =
                response.json().await.map_err(|e| PromptlineError::Provider {
                    provider: self.name().to_string(),
                    message: format!("invalid response body: {}", e),
                })?;

            convert_response(self.name(), parsed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_results_fan_out_to_tool_messages() {
        let outputs = vec![
            ToolOutput {
                id: "a".into(),
                name: "x".into(),
                content: "1".into(),
            },
            ToolOutput {
                id: "b".into(),
                name: "y".into(),
                content: "2".into(),
            },
        ];
        let msgs = convert_messages(&[ChatMessage::tool_results(&outputs)]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "tool");
        assert_eq!(msgs[1].tool_call_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_assistant_tool_call_arguments_are_strings() {
        let calls = vec![ToolCall {
            id: "c1".into(),
            name: "read_file".into(),
            arguments: serde_json::json!({"path": "a"}),
        }];
        let msgs = convert_messages(&[ChatMessage::assistant_tool_calls("", &calls)]);
        let call = &msgs[0].tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.function.arguments, r#"{"path":"a"}"#);
        assert!(msgs[0].content.is_none());
    }

    #[test]
    fn test_convert_response_with_tool_calls() {
        let raw = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "list_files", "arguments": "{\"pattern\":\"*.md\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let parsed: CompletionResponse = serde_json::from_value(raw).unwrap();
        let resp = convert_response("openai", parsed).unwrap();
        assert_eq!(resp.reason, StopReason::FunctionCall);
        assert_eq!(resp.usage, Usage::new(12, 3));
        let calls = resp.message.tool_calls();
        assert_eq!(calls[0].name, "list_files");
        assert_eq!(calls[0].arguments, serde_json::json!("{\"pattern\":\"*.md\"}"));
    }

    #[test]
    fn test_convert_response_without_choices_fails() {
        let parsed: CompletionResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(convert_response("openai", parsed).is_err());
    }
}
