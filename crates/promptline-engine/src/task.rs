use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use promptline_core::error::{PromptlineError, Result};

use crate::conversation::ConversationMachine;
use crate::instruct::Instruct;
use crate::runner::{JobContext, RunState};
use crate::template::render_checked;

/// Discriminant used to route a task to its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Instruct,
    WriteToDisk,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instruct => "instruct",
            Self::WriteToDisk => "write-to-disk",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write rendered content to a rendered path.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteToDisk {
    pub path: String,
    pub content: String,
}

impl WriteToDisk {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// One declarative unit of work within a run.
#[derive(Debug, Clone)]
pub enum Task {
    Instruct(Instruct),
    WriteToDisk(WriteToDisk),
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Instruct(_) => TaskKind::Instruct,
            Self::WriteToDisk(_) => TaskKind::WriteToDisk,
        }
    }

    /// Tool names this task advertises.
    pub fn tools(&self) -> &[String] {
        match self {
            Self::Instruct(i) => &i.tools,
            Self::WriteToDisk(_) => &[],
        }
    }
}

impl From<Instruct> for Task {
    fn from(instruct: Instruct) -> Self {
        Self::Instruct(instruct)
    }
}

impl From<WriteToDisk> for Task {
    fn from(write: WriteToDisk) -> Self {
        Self::WriteToDisk(write)
    }
}

/// Executes every task of one kind.
///
/// The returned value is the task's response; `Null` means the task
/// produced nothing worth reporting.
pub trait TaskHandler: Send + Sync + 'static {
    fn kind(&self) -> TaskKind;

    fn execute<'a>(
        &'a self,
        task: &'a mut Task,
        run: &'a mut RunState,
        ctx: &'a JobContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>>;
}

/// Task kind → handler.
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any existing one for its kind.
    pub fn register(&mut self, handler: impl TaskHandler) {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    pub fn get(&self, kind: TaskKind) -> Result<Arc<dyn TaskHandler>> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| PromptlineError::Planning(format!("no handler for task kind '{}'", kind)))
    }

    /// Registry with the built-in handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(InstructHandler);
        registry.register(WriteToDiskHandler);
        registry
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn mismatch(expected: TaskKind, task: &Task) -> PromptlineError {
    PromptlineError::Planning(format!(
        "{} handler received a {} task",
        expected,
        task.kind()
    ))
}

/// Drives an Instruct through the conversation state machine and folds
/// its typed result into the run's variables.
pub struct InstructHandler;

impl TaskHandler for InstructHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Instruct
    }

    fn execute<'a>(
        &'a self,
        task: &'a mut Task,
        run: &'a mut RunState,
        ctx: &'a JobContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            let instruct = match task {
                Task::Instruct(instruct) => instruct,
                other => return Err(mismatch(TaskKind::Instruct, other)),
            };

            let record = ConversationMachine::new(ctx, run, instruct).run().await?;
            run.variables.ingest_record(&record, instruct.id.as_deref());
            Ok(record.to_json())
        })
    }
}

pub struct WriteToDiskHandler;

impl TaskHandler for WriteToDiskHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::WriteToDisk
    }

    fn execute<'a>(
        &'a self,
        task: &'a mut Task,
        run: &'a mut RunState,
        ctx: &'a JobContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            let write = match task {
                Task::WriteToDisk(write) => write,
                other => return Err(mismatch(TaskKind::WriteToDisk, other)),
            };

            let strict = ctx.config.strict;
            let path = render_checked(&write.path, &run.variables, strict)?;
            let content = render_checked(&write.content, &run.variables, strict)?;

            ctx.files.write(Path::new(&path), &content).await?;
            info!(run = run.index, path = %path, bytes = content.len(), "Wrote output file");

            Ok(serde_json::Value::Null)
        })
    }
}
