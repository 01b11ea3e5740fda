//! Shared mocks and fixtures for Promptline tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use promptline_core::error::{PromptlineError, Result};
use promptline_core::traits::{Provider, Tool};
use promptline_core::types::*;

/// One scripted provider reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond(ProviderResponse),
    Fail(String),
}

impl MockReply {
    /// A terminal `Stop` reply with default usage `{in: 10, out: 5}`.
    pub fn stop(text: impl Into<String>) -> Self {
        Self::respond(StopReason::Stop, ChatMessage::assistant_text(text))
    }

    /// A truncated reply.
    pub fn length(text: impl Into<String>) -> Self {
        Self::respond(StopReason::Length, ChatMessage::assistant_text(text))
    }

    /// A reply with an unrecognized stop reason.
    pub fn other(reason: impl Into<String>) -> Self {
        Self::respond(
            StopReason::Other(reason.into()),
            ChatMessage::assistant_text(""),
        )
    }

    /// A `FunctionCall` reply requesting the given `(id, name, arguments)` calls.
    pub fn tool_calls(calls: Vec<(&str, &str, serde_json::Value)>) -> Self {
        let calls: Vec<ToolCall> = calls
            .into_iter()
            .map(|(id, name, arguments)| ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments,
            })
            .collect();
        Self::respond(
            StopReason::FunctionCall,
            ChatMessage::assistant_tool_calls("", &calls),
        )
    }

    /// A provider-level failure.
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }

    /// Override the reported usage.
    pub fn with_usage(self, input_tokens: u64, output_tokens: u64) -> Self {
        match self {
            Self::Respond(mut r) => {
                r.usage = Usage::new(input_tokens, output_tokens);
                Self::Respond(r)
            }
            fail => fail,
        }
    }

    fn respond(reason: StopReason, message: ChatMessage) -> Self {
        Self::Respond(ProviderResponse {
            reason,
            message,
            usage: Usage::new(10, 5),
        })
    }
}

type Responder = Box<dyn Fn(&ChatRequest) -> MockReply + Send + Sync>;

/// Scripted provider.
///
/// Replies come from a queue first, then from an optional responder closure.
/// Every request is recorded, and the peak number of concurrent calls is
/// tracked for scheduler tests.
pub struct MockProvider {
    script: Mutex<VecDeque<MockReply>>,
    responder: Option<Responder>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ChatRequest>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockProvider {
    /// Replies are served in order; running out is a provider error.
    pub fn scripted(replies: Vec<MockReply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            responder: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Every reply is computed from the request.
    pub fn responding(f: impl Fn(&ChatRequest) -> MockReply + Send + Sync + 'static) -> Self {
        let mut provider = Self::scripted(vec![]);
        provider.responder = Some(Box::new(f));
        provider
    }

    /// Sleep before each reply (use with a paused tokio clock).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: &ChatRequest) -> MockReply {
        if let Some(reply) = self.script.lock().ok().and_then(|mut s| s.pop_front()) {
            return reply;
        }
        match &self.responder {
            Some(f) => f(request),
            None => MockReply::fail("mock script exhausted"),
        }
    }
}

impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete(&self, request: ChatRequest) -> BoxFuture<'_, Result<ProviderResponse>> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let reply = self.next_reply(&request);
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match reply {
                MockReply::Respond(response) => Ok(response),
                MockReply::Fail(message) => Err(PromptlineError::Provider {
                    provider: "mock".into(),
                    message,
                }),
            }
        })
    }
}

/// Returns its `text` argument.
pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    fn execute(&self, input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            Ok(input
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string())
        })
    }
}

/// Always fails with a `ToolExecution` error.
pub struct FailingTool;

impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "Always fails."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    fn execute(&self, _input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            Err(PromptlineError::ToolExecution {
                tool: "fail".into(),
                message: "boom".into(),
            })
        })
    }
}

/// Sleeps for `sleep_secs` before answering.
pub struct SlowTool {
    sleep_secs: u64,
    timeout_secs: Option<u64>,
}

impl SlowTool {
    pub fn new(sleep_secs: u64, timeout_secs: Option<u64>) -> Self {
        Self {
            sleep_secs,
            timeout_secs,
        }
    }
}

impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Sleeps, then answers."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }

    fn execute(&self, _input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(self.sleep_secs)).await;
            Ok("done".to_string())
        })
    }
}

/// Write `files` (relative path, content) under `dir`, creating parents.
pub fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture dir");
        }
        std::fs::write(&path, content).expect("write fixture file");
    }
}

/// A fresh temporary workspace.
pub fn temp_workspace() -> tempfile::TempDir {
    tempfile::tempdir().expect("create temp dir")
}
