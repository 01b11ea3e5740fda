use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use petgraph::graph::NodeIndex;
use petgraph::visit::{Bfs, Reversed};
use petgraph::Direction;
use tracing::{debug, error, info, warn};

use promptline_core::error::{PromptlineError, Result};
use promptline_core::types::{JobEvent, Usage, WorkflowResult};

use super::dag::Dag;
use super::node::DagNode;
use crate::runner::{run_tasks, JobContext};
use crate::scheduler::Scheduler;
use crate::vars::Variables;

/// How a node settled.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    Completed(serde_json::Value),
    Failed(String),
    /// Never started because an upstream node failed.
    Skipped { blocked_by: String },
}

impl NodeOutcome {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Completed(value) => value.clone(),
            Self::Failed(error) => serde_json::json!({ "error": error }),
            Self::Skipped { blocked_by } => serde_json::json!({ "skipped": blocked_by }),
        }
    }
}

/// Result of executing a single node.
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub node_id: String,
    pub outcome: NodeOutcome,
    /// Zero for skipped nodes.
    pub elapsed_ms: u64,
}

/// Result of executing an entire graph.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Per-node results in topological order.
    pub node_results: Vec<NodeResult>,
    /// Every completed node's response, published as `<node>` and `<node>.<field>`.
    pub context: Variables,
    pub total_elapsed_ms: u64,
    /// Whether every node completed.
    pub succeeded: bool,
}

impl ExecutionResult {
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.node_results
            .iter()
            .filter(|r| matches!(r.outcome, NodeOutcome::Failed(_)))
            .map(|r| r.node_id.as_str())
            .collect()
    }

    /// Response object keyed by node name.
    pub fn into_workflow_result(self, stats: Usage) -> WorkflowResult {
        let failed = self.failed_nodes().join(", ");
        let response = serde_json::Value::Object(
            self.node_results
                .iter()
                .map(|r| (r.node_id.clone(), r.outcome.to_json()))
                .collect(),
        );
        WorkflowResult {
            response,
            stats,
            error: (!self.succeeded).then(|| format!("dag nodes failed: {}", failed)),
            success: self.succeeded,
        }
    }
}

/// Executes a `Dag` with a refilling ready set.
///
/// A node starts as soon as all of its dependencies completed, as long as
/// fewer than `max_concurrency` nodes are in flight. When a node fails, all
/// of its descendants are skipped; independent branches keep going.
pub struct DagExecutor<'a> {
    dag: &'a Dag,
    max_concurrency: usize,
}

impl<'a> DagExecutor<'a> {
    pub fn new(dag: &'a Dag, max_concurrency: usize) -> Self {
        Self {
            dag,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn execute(&self, ctx: &JobContext) -> ExecutionResult {
        let start = Instant::now();
        let graph = self.dag.graph();
        let order = self.dag.order();
        let total = order.len();
        let position: HashMap<NodeIndex, usize> =
            order.iter().enumerate().map(|(i, &idx)| (idx, i)).collect();

        let mut waiting_on: HashMap<NodeIndex, usize> = order
            .iter()
            .map(|&idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
            .collect();
        let mut ready: VecDeque<NodeIndex> = order
            .iter()
            .copied()
            .filter(|idx| waiting_on.get(idx) == Some(&0))
            .collect();

        let mut outcomes: HashMap<NodeIndex, (NodeOutcome, u64)> = HashMap::new();
        let mut skipped: HashSet<NodeIndex> = HashSet::new();
        let mut context = Variables::new();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < self.max_concurrency {
                let Some(idx) = ready.pop_front() else { break };
                let node = &graph[idx];
                let upstream = self.upstream_of(idx, &context);
                info!(node_id = %node.name, "Executing dag node");
                in_flight.push(run_node(ctx, idx, position[&idx], node, upstream));
            }

            let Some((idx, result, elapsed_ms)) = in_flight.next().await else {
                break;
            };
            let node = &graph[idx];

            match result {
                Ok(response) => {
                    debug!(node_id = %node.name, elapsed_ms, "Dag node completed");
                    ctx.events.publish(JobEvent::RunCompleted { index: position[&idx] });
                    context.ingest_prefixed(&node.name, &response);
                    outcomes.insert(idx, (NodeOutcome::Completed(response), elapsed_ms));

                    for next in graph.neighbors_directed(idx, Direction::Outgoing) {
                        if let Some(count) = waiting_on.get_mut(&next) {
                            *count = count.saturating_sub(1);
                            if *count == 0 && !skipped.contains(&next) {
                                ready.push_back(next);
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(node_id = %node.name, error = %e, "Dag node failed");
                    ctx.events.publish(JobEvent::RunFailed {
                        index: position[&idx],
                        error: e.to_string(),
                    });
                    outcomes.insert(idx, (NodeOutcome::Failed(e.to_string()), elapsed_ms));

                    let mut bfs = Bfs::new(graph, idx);
                    while let Some(descendant) = bfs.next(graph) {
                        if descendant != idx && skipped.insert(descendant) {
                            warn!(
                                node_id = %graph[descendant].name,
                                blocked_by = %node.name,
                                "Skipping dag node"
                            );
                            outcomes.insert(
                                descendant,
                                (
                                    NodeOutcome::Skipped {
                                        blocked_by: node.name.clone(),
                                    },
                                    0,
                                ),
                            );
                        }
                    }
                }
            }

            let settled = outcomes.len();
            ctx.events.publish(JobEvent::Running {
                in_flight: in_flight.len(),
                completed: settled,
                total,
            });
        }

        let node_results: Vec<NodeResult> = order
            .iter()
            .filter_map(|idx| {
                outcomes.remove(idx).map(|(outcome, elapsed_ms)| NodeResult {
                    node_id: graph[*idx].name.clone(),
                    outcome,
                    elapsed_ms,
                })
            })
            .collect();

        let failed = node_results
            .iter()
            .filter(|r| !matches!(r.outcome, NodeOutcome::Completed(_)))
            .count();
        let succeeded = failed == 0 && node_results.len() == total;
        ctx.events.publish(JobEvent::Success { total, failed });
        info!(nodes = total, failed, "Dag execution complete");

        ExecutionResult {
            node_results,
            context,
            total_elapsed_ms: start.elapsed().as_millis() as u64,
            succeeded,
        }
    }

    /// Bindings published by every ancestor of `idx`.
    fn upstream_of(&self, idx: NodeIndex, context: &Variables) -> Variables {
        let graph = self.dag.graph();
        let reversed = Reversed(graph);
        let mut bfs = Bfs::new(reversed, idx);
        let mut upstream = Variables::new();

        while let Some(ancestor) = bfs.next(reversed) {
            if ancestor == idx {
                continue;
            }
            let name = &graph[ancestor].name;
            if let Some(response) = context.get(name) {
                upstream.ingest_prefixed(name, response);
            }
        }
        upstream
    }
}

async fn run_node(
    ctx: &JobContext,
    idx: NodeIndex,
    position: usize,
    node: &DagNode,
    upstream: Variables,
) -> (NodeIndex, Result<serde_json::Value>, u64) {
    let start = Instant::now();
    ctx.events.publish(JobEvent::RunStarted { index: position });

    let result = async {
        let scope = Variables::layered(&ctx.globals, &upstream);
        let mut runs = node
            .planner
            .plan(&node.tasks, &scope, ctx.files.as_ref())
            .await?
            .into_iter()
            .map(|mut run| {
                run.variables = Variables::layered(&upstream, &run.variables);
                run
            });

        if node.planner.is_serial() {
            let run = runs.next().ok_or_else(|| {
                PromptlineError::Planning(format!("node '{}' planned no run", node.name))
            })?;
            run_tasks(ctx, position, run).await
        } else {
            // Sub-runs report under the node's position; the node settles as one.
            let result = Scheduler::new(ctx.config.max_concurrency)
                .silent()
                .execute(runs.collect(), &ctx.stats, &ctx.events, |_, run| {
                    run_tasks(ctx, position, run)
                })
                .await;
            Ok(result.response)
        }
    }
    .await;

    (idx, result, start.elapsed().as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::contract::OutputContract;
    use crate::instruct::Instruct;
    use crate::planner::{FileBatch, Planner};
    use crate::runner::tests::{context_in, context_with};
    use promptline_core::config::EngineConfig;
    use promptline_core::types::{ChatRequest, FieldKind};
    use promptline_test_utils::{temp_workspace, write_files, MockProvider, MockReply};
    use promptline_tools::ToolRegistry;

    /// Each prompt's first line names the node; the reply echoes it back.
    fn echo_provider() -> MockProvider {
        MockProvider::responding(|req: &ChatRequest| {
            let prompt = req.messages.last().map(|m| m.text()).unwrap_or_default();
            let first = prompt.lines().next().unwrap_or_default().to_string();
            if first.starts_with("FAIL") {
                MockReply::fail("node exploded")
            } else {
                MockReply::stop(format!("<out>{}</out>", first))
            }
        })
    }

    fn node(name: &str, prompt: &str, deps: &[&str]) -> DagNode {
        DagNode::single(
            name,
            Instruct::new(prompt).with_contract(OutputContract::new([("out", FieldKind::String)]).unwrap()),
        )
        .after(deps.iter().copied())
    }

    #[tokio::test]
    async fn test_downstream_sees_upstream_fields() {
        let provider = Arc::new(echo_provider());
        let ctx = context_with(provider.clone(), ToolRegistry::new(), EngineConfig::default());
        let dag = Dag::new(vec![
            node("a", "alpha", &[]),
            node("b", "beta after {{a.out}}", &["a"]),
            node("c", "gamma after {{b.out}} and {{a.out}}", &["b"]),
        ])
        .unwrap();

        let result = DagExecutor::new(&dag, 2).execute(&ctx).await;

        assert!(result.succeeded);
        let names: Vec<&str> = result.node_results.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(
            result.node_results[2].outcome,
            NodeOutcome::Completed(serde_json::json!({"out": "gamma after beta after alpha and alpha"}))
        );
        assert_eq!(result.context.get_str("b.out"), Some("beta after alpha"));
    }

    #[tokio::test]
    async fn test_failed_node_skips_dependents_only() {
        let provider = Arc::new(echo_provider());
        let ctx = context_with(provider, ToolRegistry::new(), EngineConfig::default());
        let dag = Dag::new(vec![
            node("root", "root", &[]),
            node("bad", "FAIL here", &["root"]),
            node("after_bad", "x", &["bad"]),
            node("leaf", "y", &["after_bad"]),
            node("side", "side", &["root"]),
        ])
        .unwrap();

        let result = DagExecutor::new(&dag, 4).execute(&ctx).await;
        assert!(!result.succeeded);
        assert_eq!(result.failed_nodes(), vec!["bad"]);

        let outcome = |name: &str| {
            result
                .node_results
                .iter()
                .find(|r| r.node_id == name)
                .map(|r| r.outcome.clone())
                .unwrap()
        };
        assert!(matches!(outcome("side"), NodeOutcome::Completed(_)));
        assert_eq!(outcome("after_bad"), NodeOutcome::Skipped { blocked_by: "bad".into() });
        assert_eq!(outcome("leaf"), NodeOutcome::Skipped { blocked_by: "bad".into() });

        let wf = result.into_workflow_result(Usage::default());
        assert!(!wf.success);
        assert_eq!(wf.response["leaf"], serde_json::json!({"skipped": "bad"}));
        assert!(wf.error.unwrap().contains("bad"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_nodes_respect_cap() {
        let provider = Arc::new(echo_provider().with_delay(Duration::from_secs(1)));
        let ctx = context_with(provider.clone(), ToolRegistry::new(), EngineConfig::default());
        let dag = Dag::new(
            (0..5)
                .map(|i| node(&format!("n{}", i), &format!("n{}", i), &[]))
                .collect(),
        )
        .unwrap();

        let result = DagExecutor::new(&dag, 2).execute(&ctx).await;
        assert!(result.succeeded);
        assert_eq!(provider.peak_concurrency(), 2);
        assert_eq!(provider.calls(), 5);
    }

    #[tokio::test]
    async fn test_planner_node_expands_at_execution() {
        let dir = temp_workspace();
        write_files(dir.path(), &[("in/one.txt", "1"), ("in/two.txt", "2")]);
        let provider = Arc::new(echo_provider());
        let ctx = context_in(dir.path(), provider.clone(), ToolRegistry::new(), EngineConfig::default());

        let dag = Dag::new(vec![
            node("intro", "intro", &[]),
            node("each", "{{file.stem}} {{intro.out}}", &["intro"])
                .with_planner(Planner::FileBatch(FileBatch::new("in/*.txt"))),
        ])
        .unwrap();

        let result = DagExecutor::new(&dag, 2).execute(&ctx).await;
        assert!(result.succeeded);
        assert_eq!(
            result.node_results[1].outcome,
            NodeOutcome::Completed(serde_json::json!([
                {"out": "one intro"},
                {"out": "two intro"}
            ]))
        );
        assert_eq!(ctx.stats.snapshot(), Usage::new(30, 15));
    }

    #[tokio::test]
    async fn test_planner_node_reports_as_one_node() {
        let dir = temp_workspace();
        write_files(dir.path(), &[("in/one.txt", "1"), ("in/two.txt", "2"), ("in/three.txt", "3")]);
        let provider = Arc::new(echo_provider());
        let ctx = context_in(dir.path(), provider, ToolRegistry::new(), EngineConfig::default());
        let mut rx = ctx.events.subscribe();

        let dag = Dag::new(vec![
            node("intro", "intro", &[]),
            node("each", "{{file.stem}}", &["intro"])
                .with_planner(Planner::FileBatch(FileBatch::new("in/*.txt"))),
        ])
        .unwrap();

        let result = DagExecutor::new(&dag, 4).execute(&ctx).await;
        assert!(result.succeeded);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        let successes: Vec<&JobEvent> =
            seen.iter().filter(|e| matches!(e, JobEvent::Success { .. })).collect();
        assert_eq!(successes.len(), 1);
        assert!(matches!(seen.last(), Some(JobEvent::Success { total: 2, failed: 0 })));

        let mut started: Vec<usize> = seen
            .iter()
            .filter_map(|e| match e {
                JobEvent::RunStarted { index } => Some(*index),
                _ => None,
            })
            .collect();
        started.sort_unstable();
        assert_eq!(started, vec![0, 1]);

        let completed = seen
            .iter()
            .filter(|e| matches!(e, JobEvent::RunCompleted { .. }))
            .count();
        assert_eq!(completed, 2);
        assert!(seen.iter().all(|e| match e {
            JobEvent::Running { total, .. } => *total == 2,
            _ => true,
        }));
    }
}
