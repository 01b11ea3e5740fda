use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use promptline_core::error::{PromptlineError, Result};
use promptline_core::types::*;

use crate::contract::TypedRecord;
use crate::instruct::Instruct;
use crate::runner::{JobContext, RunState};

/// Message log for one run, plus the tool schemas currently advertised.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    advertised: Vec<ToolDefinition>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn advertised(&self) -> &[ToolDefinition] {
        &self.advertised
    }

    /// Advertise `tools` for the next exchange, on top of whatever the
    /// history has already called.
    pub fn advertise(&mut self, tools: Vec<ToolDefinition>) {
        self.retire_tools();
        for def in tools {
            if !self.advertised.iter().any(|d| d.name == def.name) {
                self.advertised.push(def);
            }
        }
    }

    /// Stop advertising tools the history never called.
    ///
    /// Called tools stay: providers reject `tool_use` blocks whose tool is
    /// missing from the request.
    pub fn retire_tools(&mut self) {
        let called: HashSet<String> = self
            .messages
            .iter()
            .flat_map(|m| m.tool_calls())
            .map(|call| call.name)
            .collect();
        self.advertised.retain(|def| called.contains(&def.name));
    }

    /// Snapshot of everything the provider sees this turn.
    pub fn request(&self) -> ChatRequest {
        ChatRequest {
            messages: self.messages.clone(),
            tools: self.advertised.clone(),
        }
    }
}

/// Where an Instruct is in its exchange with the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationState {
    /// Render the prompt and append it as a user message.
    Compiling,
    /// One provider call is due.
    AwaitingResponse,
    /// The provider asked for these tool calls.
    ToolDispatch(Vec<ToolCall>),
    /// Terminal success.
    Done(TypedRecord),
}

/// Drives one Instruct through the provider.
///
/// Transitions:
///
/// | from               | on                  | to                   |
/// |--------------------|---------------------|----------------------|
/// | `Compiling`        | prompt appended     | `AwaitingResponse`   |
/// | `AwaitingResponse` | `Stop`              | `Done`               |
/// | `AwaitingResponse` | `FunctionCall`      | `ToolDispatch`       |
/// | `AwaitingResponse` | `Length`            | error `Length`       |
/// | `AwaitingResponse` | other reason        | error `UnknownStopReason` |
/// | `ToolDispatch`     | all tools succeeded | `AwaitingResponse`   |
///
/// Every error is terminal. Usage from every successful provider call is
/// recorded before the stop reason is inspected.
pub struct ConversationMachine<'a> {
    ctx: &'a JobContext,
    run: &'a mut RunState,
    instruct: &'a mut Instruct,
    state: ConversationState,
    tool_rounds: usize,
}

impl<'a> ConversationMachine<'a> {
    pub fn new(ctx: &'a JobContext, run: &'a mut RunState, instruct: &'a mut Instruct) -> Self {
        Self {
            ctx,
            run,
            instruct,
            state: ConversationState::Compiling,
            tool_rounds: 0,
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Number of tool dispatch rounds so far.
    pub fn tool_rounds(&self) -> usize {
        self.tool_rounds
    }

    /// Run until `Done` or the first error.
    pub async fn run(mut self) -> Result<TypedRecord> {
        let outcome = loop {
            if let ConversationState::Done(record) = &self.state {
                break Ok(record.clone());
            }
            if let Err(e) = self.step().await {
                break Err(e);
            }
        };
        self.run.conversation.retire_tools();
        outcome
    }

    /// Perform exactly one transition.
    pub async fn step(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, ConversationState::Compiling);
        self.state = match state {
            ConversationState::Compiling => self.compile().await?,
            ConversationState::AwaitingResponse => self.await_response().await?,
            ConversationState::ToolDispatch(calls) => self.dispatch(calls).await?,
            done @ ConversationState::Done(_) => done,
        };
        Ok(())
    }

    async fn compile(&mut self) -> Result<ConversationState> {
        let strict = self.ctx.config.strict;
        let vars = &self.run.variables;

        let mut prompt = self.instruct.compile(vars, strict)?;
        let system = self.instruct.compile_system(vars, strict)?;
        let attachments = self.instruct.attachments(vars, strict)?;
        let tools = self.ctx.tools.definitions_for(&self.instruct.tools)?;

        for path in attachments {
            let content = self.ctx.files.read(Path::new(&path)).await?;
            prompt.push_str(&format!("\n\n<file path=\"{}\">\n{}\n</file>", path, content));
        }

        if let Some(system) = system {
            self.run.conversation.push(ChatMessage::system(system));
        }
        self.run.conversation.push(ChatMessage::user(prompt));
        self.run.conversation.advertise(tools);

        Ok(ConversationState::AwaitingResponse)
    }

    async fn await_response(&mut self) -> Result<ConversationState> {
        let request = self.run.conversation.request();
        debug!(
            run = self.run.index,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Calling provider"
        );

        let response = self.call_provider(request).await?;
        self.ctx.stats.record(response.usage);
        self.ctx.events.publish(JobEvent::Usage(response.usage));

        match response.reason {
            StopReason::Stop => {
                let text = response.message.text();
                self.run.conversation.push(response.message);
                let record = self.instruct.finalize(&text)?.clone();
                Ok(ConversationState::Done(record))
            }
            StopReason::Length => {
                warn!(run = self.run.index, "Provider output truncated");
                Err(PromptlineError::Length)
            }
            StopReason::FunctionCall => {
                let calls = response.message.tool_calls();
                if calls.is_empty() {
                    return Err(PromptlineError::UnknownStopReason(
                        "function call without any tool calls".into(),
                    ));
                }
                self.run.conversation.push(response.message);
                Ok(ConversationState::ToolDispatch(calls))
            }
            StopReason::Other(reason) => Err(PromptlineError::UnknownStopReason(reason)),
        }
    }

    async fn call_provider(&self, request: ChatRequest) -> Result<ProviderResponse> {
        let call = self.ctx.provider.complete(request);
        match self.ctx.config.provider_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), call)
                .await
                .map_err(|_| PromptlineError::ProviderTimeout(secs))?,
            None => call.await,
        }
    }

    async fn dispatch(&mut self, calls: Vec<ToolCall>) -> Result<ConversationState> {
        self.tool_rounds += 1;
        if let Some(max) = self.ctx.config.max_tool_iterations {
            if self.tool_rounds > max {
                return Err(PromptlineError::MaxToolIterations(max));
            }
        }

        for call in &calls {
            debug!(run = self.run.index, tool = %call.name, id = %call.id, "Dispatching tool call");
            self.ctx.events.publish(JobEvent::ToolCall {
                run: self.run.index,
                name: call.name.clone(),
            });
        }

        let tool_ctx = ToolContext {
            run_index: self.run.index,
            working_dir: self.ctx.config.working_dir(),
        };
        let outputs = self.ctx.tools.invoke_all(&calls, &tool_ctx).await?;
        self.run.conversation.push(ChatMessage::tool_results(&outputs));

        Ok(ConversationState::AwaitingResponse)
    }
}
