use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use promptline_core::config::EngineConfig;
use promptline_core::error::{PromptlineError, Result};
use promptline_core::event::EventBus;
use promptline_core::stats::Stats;
use promptline_core::traits::Provider;
use promptline_core::types::{JobEvent, WorkflowResult};
use promptline_tools::ToolRegistry;

use crate::files::{FileSystem, LocalFs};
use crate::graph::DagExecutor;
use crate::job::{Job, Workflow};
use crate::planner::Run;
use crate::runner::{execute_run, JobContext};
use crate::scheduler::Scheduler;
use crate::task::HandlerRegistry;
use crate::vars::Variables;

/// What a job would execute, without calling the provider.
#[derive(Debug)]
pub enum JobPlan {
    Runs(Vec<Run>),
    /// Node names in topological order.
    Dag(Vec<String>),
}

/// Runs jobs against one provider and tool registry.
pub struct Engine {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    handlers: Arc<HandlerRegistry>,
    files: Arc<dyn FileSystem>,
    events: Arc<EventBus>,
    config: EngineConfig,
}

impl Engine {
    /// Built-in tools and handlers, files rooted at `config.working_dir`.
    pub fn new(provider: Arc<dyn Provider>, config: EngineConfig) -> Self {
        Self {
            provider,
            tools: Arc::new(ToolRegistry::with_builtins()),
            handlers: Arc::new(HandlerRegistry::with_defaults()),
            files: Arc::new(LocalFs::new(config.working_dir())),
            events: Arc::new(EventBus::default()),
            config,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    pub fn with_files(mut self, files: Arc<dyn FileSystem>) -> Self {
        self.files = files;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Expand a job into runs (or a node order) without executing anything.
    pub async fn plan_job(&self, job: &Job) -> Result<JobPlan> {
        self.validate(job)?;
        match &job.workflow {
            Workflow::Planned { planner, tasks } => {
                Ok(JobPlan::Runs(
                planner.plan(tasks, &job.variables, self.files.as_ref()).await?,
            ))
            }
            Workflow::Dag(dag) => Ok(JobPlan::Dag(
                dag.topological_order().into_iter().map(String::from).collect(),
            )),
        }
    }

    /// Plan and execute a job.
    ///
    /// `overrides` win over the job's own variables. Planning errors are
    /// returned as `Err` before any run starts; run failures are reported
    /// inside the `WorkflowResult`.
    pub async fn run_job(&self, job: &Job, overrides: Variables) -> Result<WorkflowResult> {
        self.validate(job)?;
        let invocation = Uuid::new_v4();
        let ctx = self.context(Variables::layered(&job.variables, &overrides));

        match &job.workflow {
            Workflow::Planned { planner, tasks } => {
                let runs = planner.plan(tasks, &ctx.globals, ctx.files.as_ref()).await?;
                info!(job = %job.name, %invocation, runs = runs.len(), "Job planned");
                self.events.publish(JobEvent::JobStarted {
                    job: job.name.clone(),
                    runs: runs.len(),
                });

                if planner.is_serial() {
                    return Ok(self.run_single(&ctx, runs).await);
                }

                Ok(Scheduler::new(self.config.max_concurrency)
                    .execute(runs, &ctx.stats, &ctx.events, |index, run| {
                        execute_run(&ctx, index, run)
                    })
                    .await)
            }
            Workflow::Dag(dag) => {
                info!(job = %job.name, %invocation, nodes = dag.len(), "Job planned");
                self.events.publish(JobEvent::JobStarted {
                    job: job.name.clone(),
                    runs: dag.len(),
                });

                let result = DagExecutor::new(dag, self.config.max_concurrency)
                    .execute(&ctx)
                    .await;
                Ok(result.into_workflow_result(ctx.stats.snapshot()))
            }
        }
    }

    async fn run_single(&self, ctx: &JobContext, runs: Vec<Run>) -> WorkflowResult {
        let Some(run) = runs.into_iter().next() else {
            return WorkflowResult::failure("serial workflow planned no run", ctx.stats.snapshot());
        };

        let outcome = execute_run(ctx, 0, run).await;
        let failed = usize::from(outcome.is_err());
        self.events.publish(JobEvent::Success { total: 1, failed });

        match outcome {
            Ok(response) => WorkflowResult::success(response, ctx.stats.snapshot()),
            Err(e) => {
                error!(error = %e, "Serial workflow failed");
                WorkflowResult::failure(e.to_string(), ctx.stats.snapshot())
            }
        }
    }

    /// Unknown tools are a planning error, caught before any run exists.
    fn validate(&self, job: &Job) -> Result<()> {
        let unknown: Vec<&str> = job
            .tool_names()
            .into_iter()
            .filter(|name| self.tools.get(name).is_none())
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(PromptlineError::Planning(format!(
                "job '{}' references unknown tools: {}",
                job.name,
                unknown.join(", ")
            )))
        }
    }

    fn context(&self, globals: Variables) -> JobContext {
        JobContext {
            provider: self.provider.clone(),
            tools: self.tools.clone(),
            handlers: self.handlers.clone(),
            files: self.files.clone(),
            stats: Arc::new(Stats::new()),
            events: self.events.clone(),
            config: self.config.clone(),
            globals,
        }
    }
}
