use crate::planner::Planner;
use crate::task::Task;

/// A named unit in a dependency-ordered workflow.
///
/// A node is a single task, a task list, or a planner paired with a task
/// list. A planner node expands into its runs only when the node starts.
#[derive(Debug, Clone)]
pub struct DagNode {
    /// Unique name; downstream nodes see this node's fields as `<name>.<field>`.
    pub name: String,
    pub depends_on: Vec<String>,
    pub tasks: Vec<Task>,
    pub planner: Planner,
}

impl DagNode {
    pub fn new(name: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            tasks,
            planner: Planner::Serial,
        }
    }

    /// A node holding one task.
    pub fn single(name: impl Into<String>, task: impl Into<Task>) -> Self {
        Self::new(name, vec![task.into()])
    }

    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_planner(mut self, planner: Planner) -> Self {
        self.planner = planner;
        self
    }
}
