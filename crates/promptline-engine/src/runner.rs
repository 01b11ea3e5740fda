use std::sync::Arc;

use tracing::{debug, info};

use promptline_core::config::EngineConfig;
use promptline_core::error::Result;
use promptline_core::event::EventBus;
use promptline_core::stats::Stats;
use promptline_core::traits::Provider;
use promptline_core::types::JobEvent;
use promptline_tools::ToolRegistry;

use crate::conversation::Conversation;
use crate::files::FileSystem;
use crate::planner::Run;
use crate::task::HandlerRegistry;
use crate::vars::Variables;

/// Collaborators shared read-only by every run of one job invocation.
///
/// `stats` is the only state the runs mutate together.
pub struct JobContext {
    pub provider: Arc<dyn Provider>,
    pub tools: Arc<ToolRegistry>,
    pub handlers: Arc<HandlerRegistry>,
    pub files: Arc<dyn FileSystem>,
    pub stats: Arc<Stats>,
    pub events: Arc<EventBus>,
    pub config: EngineConfig,
    /// Caller-supplied globals; run-local bindings win over these.
    pub globals: Variables,
}

/// Private state of one executing run.
#[derive(Debug)]
pub struct RunState {
    pub index: usize,
    pub variables: Variables,
    pub conversation: Conversation,
}

impl RunState {
    pub fn new(index: usize, variables: Variables) -> Self {
        Self {
            index,
            variables,
            conversation: Conversation::new(),
        }
    }
}

/// Execute one run's tasks strictly in order.
///
/// The run's response is that of the last task that produced one. The
/// first failing task aborts the run; earlier side effects stay in place.
pub async fn execute_run(ctx: &JobContext, index: usize, run: Run) -> Result<serde_json::Value> {
    ctx.events.publish(JobEvent::RunStarted { index });
    run_tasks(ctx, index, run).await
}

/// [`execute_run`] without the `RunStarted` event, for runs that belong to
/// an already announced DAG node. Task and tool events still carry `index`.
pub(crate) async fn run_tasks(ctx: &JobContext, index: usize, run: Run) -> Result<serde_json::Value> {
    let Run { tasks, variables } = run;
    let mut state = RunState::new(index, Variables::layered(&ctx.globals, &variables));
    let mut response = serde_json::Value::Null;

    debug!(run = index, tasks = tasks.len(), "Run started");

    for (position, mut task) in tasks.into_iter().enumerate() {
        let kind = task.kind();
        let handler = ctx.handlers.get(kind)?;

        ctx.events.publish(JobEvent::TaskStarted {
            run: index,
            kind: kind.to_string(),
        });
        debug!(run = index, task = position, kind = %kind, "Executing task");

        let output = handler.execute(&mut task, &mut state, ctx).await?;
        if !output.is_null() {
            response = output;
        }
    }

    info!(run = index, "Run completed");
    Ok(response)
}
