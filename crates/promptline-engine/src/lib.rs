pub mod contract;
pub mod conversation;
pub mod engine;
pub mod files;
pub mod graph;
pub mod instruct;
pub mod job;
pub mod planner;
pub mod runner;
pub mod scheduler;
pub mod task;
pub mod template;
pub mod vars;

pub use contract::{FieldValue, OutputContract, ParsedOutput, TypedRecord};
pub use conversation::{Conversation, ConversationMachine, ConversationState};
pub use engine::{Engine, JobPlan};
pub use files::{FileSystem, LocalFs};
pub use graph::{Dag, DagExecutor, DagNode, ExecutionResult};
pub use instruct::Instruct;
pub use job::{Job, Workflow};
pub use planner::{FileBatch, Planner, Run, SkipCondition};
pub use runner::{execute_run, JobContext, RunState};
pub use scheduler::{RunOutcome, Scheduler};
pub use task::{HandlerRegistry, Task, TaskHandler, TaskKind, WriteToDisk};
pub use vars::Variables;
