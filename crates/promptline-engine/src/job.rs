use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use promptline_core::config::expand_env_vars;
use promptline_core::error::{PromptlineError, Result};

use crate::contract::OutputContract;
use crate::graph::{Dag, DagNode};
use crate::instruct::Instruct;
use crate::planner::{FileBatch, Planner, SkipCondition};
use crate::task::{Task, WriteToDisk};
use crate::vars::Variables;

/// A job file as written on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub name: String,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum WorkflowConfig {
    Serial {
        tasks: Vec<TaskConfig>,
    },
    Batch {
        source: String,
        #[serde(default = "default_bind")]
        bind: String,
        #[serde(default)]
        skip: Vec<SkipConfig>,
        tasks: Vec<TaskConfig>,
    },
    Multi {
        sources: Vec<BatchConfig>,
        tasks: Vec<TaskConfig>,
    },
    Dag {
        nodes: Vec<NodeConfig>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Glob pattern, relative to the working directory.
    pub source: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub skip: Vec<SkipConfig>,
}

fn default_bind() -> String { "file".to_string() }

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipConfig {
    Exists(String),
    Matches(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskConfig {
    Instruct(InstructConfig),
    WriteToDisk(WriteConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstructConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub inputs: HashMap<String, serde_json::Value>,
    /// `field = "kind"` pairs, in answer order.
    #[serde(default)]
    pub output: OutputContract,
    #[serde(default)]
    pub chain_of_thought: bool,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteConfig {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Shorthand for a one-task node.
    #[serde(default)]
    pub task: Option<TaskConfig>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
    /// Turns the node into a batch over these files.
    #[serde(default)]
    pub batch: Option<BatchConfig>,
}

/// How a job's tasks are turned into runs.
#[derive(Debug)]
pub enum Workflow {
    Planned { planner: Planner, tasks: Vec<Task> },
    Dag(Dag),
}

/// A validated, executable job.
#[derive(Debug)]
pub struct Job {
    pub name: String,
    pub variables: Variables,
    pub workflow: Workflow,
}

impl Job {
    /// Load a job file. `${ENV}` references are expanded before parsing.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&expand_env_vars(&content))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: JobConfig = toml::from_str(content)
            .map_err(|e| PromptlineError::Planning(format!("invalid job file: {}", e)))?;
        Self::try_from(config)
    }

    /// Every tool name any task advertises, sorted and deduplicated.
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = match &self.workflow {
            Workflow::Planned { tasks, .. } => tasks
                .iter()
                .flat_map(|t| t.tools())
                .map(|s| s.as_str())
                .collect(),
            Workflow::Dag(dag) => dag
                .topological_order()
                .into_iter()
                .filter_map(|name| dag.node(name))
                .flat_map(|node| node.tasks.iter().flat_map(|t| t.tools()))
                .map(|s| s.as_str())
                .collect(),
        };
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl TryFrom<JobConfig> for Job {
    type Error = PromptlineError;

    fn try_from(config: JobConfig) -> Result<Self> {
        let workflow = match config.workflow {
            WorkflowConfig::Serial { tasks } => Workflow::Planned {
                planner: Planner::Serial,
                tasks: convert_tasks(tasks)?,
            },
            WorkflowConfig::Batch {
                source,
                bind,
                skip,
                tasks,
            } => Workflow::Planned {
                planner: Planner::FileBatch(convert_batch(BatchConfig { source, bind, skip })?),
                tasks: convert_tasks(tasks)?,
            },
            WorkflowConfig::Multi { sources, tasks } => {
                if sources.is_empty() {
                    return Err(PromptlineError::Planning(
                        "multi workflow needs at least one source".into(),
                    ));
                }
                Workflow::Planned {
                    planner: Planner::MultiSource(
                        sources
                            .into_iter()
                            .map(convert_batch)
                            .collect::<Result<_>>()?,
                    ),
                    tasks: convert_tasks(tasks)?,
                }
            }
            WorkflowConfig::Dag { nodes } => Workflow::Dag(Dag::new(
                nodes
                    .into_iter()
                    .map(convert_node)
                    .collect::<Result<_>>()?,
            )?),
        };

        Ok(Self {
            name: config.name,
            variables: Variables::from_map(config.variables),
            workflow,
        })
    }
}

fn convert_tasks(tasks: Vec<TaskConfig>) -> Result<Vec<Task>> {
    if tasks.is_empty() {
        return Err(PromptlineError::Planning("workflow has no tasks".into()));
    }
    Ok(tasks.into_iter().map(convert_task).collect())
}

fn convert_task(task: TaskConfig) -> Task {
    match task {
        TaskConfig::Instruct(c) => {
            let contract = if c.chain_of_thought {
                c.output.with_chain_of_thought()
            } else {
                c.output
            };
            let mut instruct = Instruct::new(c.prompt)
                .with_contract(contract)
                .with_tools(c.tools)
                .with_files(c.files);
            instruct.id = c.id;
            instruct.system = c.system;
            instruct.inputs = Variables::from_map(c.inputs);
            Task::Instruct(instruct)
        }
        TaskConfig::WriteToDisk(c) => Task::WriteToDisk(WriteToDisk::new(c.path, c.content)),
    }
}

fn convert_batch(config: BatchConfig) -> Result<FileBatch> {
    let mut batch = FileBatch::new(config.source).bind_as(config.bind);
    for skip in config.skip {
        batch = batch.skip_when(match skip {
            SkipConfig::Exists(template) => SkipCondition::Exists(template),
            SkipConfig::Matches(pattern) => SkipCondition::matches(&pattern)?,
        });
    }
    Ok(batch)
}

fn convert_node(config: NodeConfig) -> Result<DagNode> {
    let mut tasks: Vec<TaskConfig> = config.task.into_iter().collect();
    tasks.extend(config.tasks);
    if tasks.is_empty() {
        return Err(PromptlineError::Planning(format!(
            "node '{}' needs `task` or `tasks`",
            config.name
        )));
    }

    let mut node = DagNode::new(config.name, tasks.into_iter().map(convert_task).collect())
        .after(config.depends_on);
    if let Some(batch) = config.batch {
        node = node.with_planner(Planner::FileBatch(convert_batch(batch)?));
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptline_core::types::FieldKind;

    #[test]
    fn test_serial_job() {
        let job = Job::from_toml_str(
            r#"
name = "greet"

[variables]
name = "Ada"

[workflow]
kind = "serial"

[[workflow.tasks]]
type = "instruct"
id = "hello"
prompt = "Hi {{name}}"
output = { greeting = "string", mood = "string-list" }
"#,
        )
        .unwrap();

        assert_eq!(job.name, "greet");
        assert_eq!(job.variables.get_str("name"), Some("Ada"));
        let Workflow::Planned { planner, tasks } = &job.workflow else {
            panic!("expected a planned workflow");
        };
        assert!(planner.is_serial());
        let Task::Instruct(instruct) = &tasks[0] else {
            panic!("expected an instruct task");
        };
        assert_eq!(instruct.id.as_deref(), Some("hello"));
        assert_eq!(
            instruct.contract.fields(),
            &[
                ("greeting".to_string(), FieldKind::String),
                ("mood".to_string(), FieldKind::StringList)
            ]
        );
    }

    #[test]
    fn test_batch_job_with_skips() {
        let job = Job::from_toml_str(
            r#"
name = "summaries"

[workflow]
kind = "batch"
source = "docs/*.md"
bind = "doc"
skip = [{ exists = "out/{{stem}}.md" }, { matches = "^drafts/" }]

[[workflow.tasks]]
type = "instruct"
prompt = "Summarize {{doc}}"
chain_of_thought = true
output = { summary = "string" }

[[workflow.tasks]]
type = "write-to-disk"
path = "out/{{doc.stem}}.md"
content = "{{summary}}"
"#,
        )
        .unwrap();

        let Workflow::Planned { planner: Planner::FileBatch(batch), tasks } = &job.workflow else {
            panic!("expected a file batch");
        };
        assert_eq!(batch.bind, "doc");
        assert_eq!(batch.skip.len(), 2);
        assert_eq!(tasks.len(), 2);
        let Task::Instruct(instruct) = &tasks[0] else {
            panic!("expected an instruct task");
        };
        assert!(instruct.contract.chain_of_thought());
    }

    #[test]
    fn test_dag_job() {
        let job = Job::from_toml_str(
            r#"
name = "pipeline"

[workflow]
kind = "dag"

[[workflow.nodes]]
name = "outline"
task = { type = "instruct", prompt = "Outline", output = { points = "string-list" }, tools = ["read_file"] }

[[workflow.nodes]]
name = "expand"
depends_on = ["outline"]
batch = { source = "notes/*.txt" }
tasks = [{ type = "instruct", prompt = "Expand {{file}} using {{outline.points}}" }]
"#,
        )
        .unwrap();

        let Workflow::Dag(dag) = &job.workflow else {
            panic!("expected a dag");
        };
        assert_eq!(dag.topological_order(), vec!["outline", "expand"]);
        assert!(!dag.node("expand").unwrap().planner.is_serial());
        assert_eq!(job.tool_names(), vec!["read_file"]);
    }

    #[test]
    fn test_malformed_jobs_are_planning_errors() {
        let cases = [
            // unknown workflow kind
            "name = \"x\"\n[workflow]\nkind = \"loop\"\ntasks = []",
            // no tasks
            "name = \"x\"\n[workflow]\nkind = \"serial\"\ntasks = []",
            // missing prompt
            "name = \"x\"\n[workflow]\nkind = \"serial\"\ntasks = [{ type = \"instruct\" }]",
            // bad field kind
            "name = \"x\"\n[workflow]\nkind = \"serial\"\ntasks = [{ type = \"instruct\", prompt = \"p\", output = { a = \"list\" } }]",
            // bad skip regex
            "name = \"x\"\n[workflow]\nkind = \"batch\"\nsource = \"*\"\nskip = [{ matches = \"(\" }]\ntasks = [{ type = \"instruct\", prompt = \"p\" }]",
            // cycle
            "name = \"x\"\n[workflow]\nkind = \"dag\"\nnodes = [{ name = \"a\", depends_on = [\"a\"], task = { type = \"instruct\", prompt = \"p\" } }]",
        ];
        for case in cases {
            let err = Job::from_toml_str(case).unwrap_err();
            assert!(matches!(err, PromptlineError::Planning(_)), "case: {case}");
        }
    }

    #[test]
    fn test_misspelled_keys_are_rejected_at_every_level() {
        let cases = [
            // node dependency typo
            "name = \"x\"\n[workflow]\nkind = \"dag\"\nnodes = [{ name = \"a\", task = { type = \"instruct\", prompt = \"p\" } }, { name = \"b\", depend_on = [\"a\"], task = { type = \"instruct\", prompt = \"p\" } }]",
            // instruct output typo
            "name = \"x\"\n[workflow]\nkind = \"serial\"\ntasks = [{ type = \"instruct\", prompt = \"p\", ouput = { a = \"string\" } }]",
            // write-to-disk extra key
            "name = \"x\"\n[workflow]\nkind = \"serial\"\ntasks = [{ type = \"write-to-disk\", path = \"o.txt\", content = \"c\", mode = \"append\" }]",
            // multi-source entry typo
            "name = \"x\"\n[workflow]\nkind = \"multi\"\nsources = [{ source = \"*\", skips = [] }]\ntasks = [{ type = \"instruct\", prompt = \"p\" }]",
            // workflow-level typo
            "name = \"x\"\n[workflow]\nkind = \"batch\"\nsource = \"*\"\nbinds = \"doc\"\ntasks = [{ type = \"instruct\", prompt = \"p\" }]",
        ];
        for case in cases {
            let err = Job::from_toml_str(case).unwrap_err();
            assert!(matches!(err, PromptlineError::Planning(_)), "case: {case}");
        }
    }
}
