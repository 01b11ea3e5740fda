use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{error, info};

use promptline_core::error::Result;
use promptline_core::event::EventBus;
use promptline_core::stats::Stats;
use promptline_core::types::{JobEvent, WorkflowResult};

use crate::planner::Run;

/// How one run settled.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(serde_json::Value),
    Failed(String),
}

impl RunOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The run's slot in an aggregated response: its value, or `{"error": …}`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Completed(value) => value.clone(),
            Self::Failed(error) => serde_json::json!({ "error": error }),
        }
    }
}

/// Executes runs in consecutive windows of at most `concurrency_limit`.
///
/// A window starts only after every run of the previous one has settled.
/// Failed runs are recorded and never stop the remaining runs.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    concurrency_limit: usize,
    announce: bool,
}

impl Scheduler {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
            announce: true,
        }
    }

    /// Keep progress, per-run settle and `Success` events off the bus.
    ///
    /// Used inside a DAG node, where the node itself is the unit the bus
    /// reports on.
    pub fn silent(mut self) -> Self {
        self.announce = false;
        self
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Run everything; outcomes come back in `runs` order.
    pub async fn run_all<F, Fut>(
        &self,
        runs: Vec<Run>,
        events: &EventBus,
        executor: F,
    ) -> Vec<RunOutcome>
    where
        F: Fn(usize, Run) -> Fut,
        Fut: Future<Output = Result<serde_json::Value>>,
    {
        let total = runs.len();
        let completed = AtomicUsize::new(0);
        let mut outcomes = Vec::with_capacity(total);
        let mut pending = runs.into_iter().enumerate().peekable();

        while pending.peek().is_some() {
            let window: Vec<(usize, Run)> = pending.by_ref().take(self.concurrency_limit).collect();
            let width = window.len();
            let settled = AtomicUsize::new(0);

            if self.announce {
                events.publish(JobEvent::Running {
                    in_flight: width,
                    completed: completed.load(Ordering::SeqCst),
                    total,
                });
            }

            let announce = self.announce;
            let futs = window.into_iter().map(|(index, run)| {
                let fut = executor(index, run);
                let completed = &completed;
                let settled = &settled;
                async move {
                    let outcome = match fut.await {
                        Ok(value) => {
                            if announce {
                                events.publish(JobEvent::RunCompleted { index });
                            }
                            RunOutcome::Completed(value)
                        }
                        Err(e) => {
                            error!(run = index, error = %e, "Run failed");
                            if announce {
                                events.publish(JobEvent::RunFailed {
                                    index,
                                    error: e.to_string(),
                                });
                            }
                            RunOutcome::Failed(e.to_string())
                        }
                    };

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    let settled_now = settled.fetch_add(1, Ordering::SeqCst) + 1;
                    if announce {
                        events.publish(JobEvent::Running {
                            in_flight: width - settled_now,
                            completed: done,
                            total,
                        });
                    }
                    outcome
                }
            });

            outcomes.extend(futures::future::join_all(futs).await);
        }

        let failed = outcomes.iter().filter(|o| o.is_failed()).count();
        info!(total, failed, "All runs settled");
        if self.announce {
            events.publish(JobEvent::Success { total, failed });
        }

        outcomes
    }

    /// Run everything and aggregate into a `WorkflowResult`.
    ///
    /// The result succeeds even when some runs failed; each failure sits in
    /// its slot of the response array as `{"error": …}`.
    pub async fn execute<F, Fut>(
        &self,
        runs: Vec<Run>,
        stats: &Stats,
        events: &EventBus,
        executor: F,
    ) -> WorkflowResult
    where
        F: Fn(usize, Run) -> Fut,
        Fut: Future<Output = Result<serde_json::Value>>,
    {
        let outcomes = self.run_all(runs, events, executor).await;
        let response = serde_json::Value::Array(outcomes.iter().map(RunOutcome::to_json).collect());
        WorkflowResult::success(response, stats.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::instruct::Instruct;
    use crate::vars::Variables;
    use promptline_core::error::PromptlineError;
    use promptline_core::types::Usage;

    fn runs(n: usize) -> Vec<Run> {
        (0..n)
            .map(|i| {
                let mut variables = Variables::new();
                variables.set("i", serde_json::json!(i));
                Run {
                    tasks: vec![Instruct::new("x").into()],
                    variables,
                }
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_keeps_every_slot_in_order() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let stats = Stats::new();
        let events = EventBus::default();

        let result = Scheduler::new(2)
            .execute(runs(5), &stats, &events, |index, run| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                let stats = &stats;
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    // Later runs finish first.
                    tokio::time::sleep(Duration::from_millis(100 - 10 * index as u64)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    stats.record(Usage::new(10, 5));
                    if index == 3 {
                        return Err(PromptlineError::Provider {
                            provider: "mock".into(),
                            message: "boom".into(),
                        });
                    }
                    Ok(run.variables.get("i").cloned().unwrap_or_default())
                }
            })
            .await;

        assert!(result.success);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(result.stats, Usage::new(50, 25));
        let slots = result.response.as_array().unwrap();
        assert_eq!(slots.len(), 5);
        assert_eq!(slots[0], serde_json::json!(0));
        assert_eq!(slots[2], serde_json::json!(2));
        assert!(slots[3]["error"].as_str().unwrap().contains("boom"));
        assert_eq!(slots[4], serde_json::json!(4));
        assert_eq!(slots.iter().filter(|s| s.get("error").is_some()).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_do_not_overlap() {
        let started = Arc::new(std::sync::Mutex::new(Vec::new()));
        let origin = tokio::time::Instant::now();
        let events = EventBus::default();

        Scheduler::new(2)
            .run_all(runs(3), &events, |index, _run| {
                let started = started.clone();
                async move {
                    started.lock().unwrap().push((index, origin.elapsed()));
                    let secs = if index == 0 { 10 } else { 1 };
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    Ok(serde_json::Value::Null)
                }
            })
            .await;

        let started = started.lock().unwrap();
        let third = started.iter().find(|(i, _)| *i == 2).unwrap();
        // Run 2 waits for the slow run 0, not just the fast run 1.
        assert!(third.1 >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_progress_events() {
        let events = EventBus::default();
        let mut rx = events.subscribe();

        Scheduler::new(4)
            .run_all(runs(2), &events, |index, _run| async move {
                if index == 1 {
                    Err(PromptlineError::Length)
                } else {
                    Ok(serde_json::Value::Null)
                }
            })
            .await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen.first(), Some(JobEvent::Running { in_flight: 2, completed: 0, total: 2 })));
        assert!(seen.iter().any(|e| matches!(e, JobEvent::RunFailed { index: 1, .. })));
        assert!(matches!(
            seen.iter().filter(|e| matches!(e, JobEvent::Running { .. })).last(),
            Some(JobEvent::Running { in_flight: 0, completed: 2, .. })
        ));
        assert!(matches!(seen.last(), Some(JobEvent::Success { total: 2, failed: 1 })));
    }

    #[tokio::test]
    async fn test_silent_scheduler_publishes_nothing() {
        let events = EventBus::default();
        let mut rx = events.subscribe();

        let outcomes = Scheduler::new(2)
            .silent()
            .run_all(runs(3), &events, |index, _run| async move {
                if index == 0 {
                    Err(PromptlineError::Length)
                } else {
                    Ok(serde_json::json!(index))
                }
            })
            .await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_failed());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_runs() {
        let events = EventBus::default();
        let outcomes = Scheduler::new(3)
            .run_all(Vec::new(), &events, |_, _| async { Ok(serde_json::Value::Null) })
            .await;
        assert!(outcomes.is_empty());
    }
}
