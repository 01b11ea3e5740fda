use std::path::Path;

use regex::Regex;
use tracing::{debug, info};

use promptline_core::error::{PromptlineError, Result};

use crate::files::{FileSystem, PathParts};
use crate::task::Task;
use crate::template::render;
use crate::vars::Variables;

/// One independent execution lane.
#[derive(Debug, Clone)]
pub struct Run {
    pub tasks: Vec<Task>,
    pub variables: Variables,
}

/// Predicate that drops a candidate batch file.
#[derive(Debug, Clone)]
pub enum SkipCondition {
    /// Skip when the rendered path template already exists. The template
    /// sees the job globals and the candidate's `path`, `dir`, `stem`, `ext`
    /// and `file_name`, both bare and under the batch's bind prefix.
    Exists(String),
    /// Skip when the candidate path matches.
    Matches(Regex),
}

impl SkipCondition {
    pub fn matches(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Matches)
            .map_err(|e| PromptlineError::Planning(format!("invalid skip pattern '{}': {}", pattern, e)))
    }

    /// An `Exists` template with an unresolved placeholder is a planning
    /// error; it would otherwise never match anything.
    pub async fn should_skip(
        &self,
        parts: &PathParts,
        bind: &str,
        globals: &Variables,
        files: &dyn FileSystem,
    ) -> Result<bool> {
        match self {
            Self::Exists(template) => {
                let mut candidate = parts.to_variables(None);
                candidate.merge(&parts.to_variables(Some(bind)));
                let rendered = render(template, &Variables::layered(globals, &candidate));
                if !rendered.unresolved.is_empty() {
                    return Err(PromptlineError::Planning(format!(
                        "skip condition '{}' has unresolved variables: {}",
                        template,
                        rendered.unresolved.join(", ")
                    )));
                }
                Ok(files.exists(Path::new(&rendered.text)).await)
            }
            Self::Matches(re) => Ok(re.is_match(&parts.path)),
        }
    }
}

/// A glob source whose matches each become one run.
#[derive(Debug, Clone)]
pub struct FileBatch {
    pub source: String,
    /// Variable receiving the file content; components land under `<bind>.*`.
    pub bind: String,
    pub skip: Vec<SkipCondition>,
}

impl FileBatch {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            bind: "file".to_string(),
            skip: Vec::new(),
        }
    }

    pub fn bind_as(mut self, name: impl Into<String>) -> Self {
        self.bind = name.into();
        self
    }

    pub fn skip_when(mut self, condition: SkipCondition) -> Self {
        self.skip.push(condition);
        self
    }

    async fn plan(
        &self,
        tasks: &[Task],
        globals: &Variables,
        files: &dyn FileSystem,
    ) -> Result<Vec<Run>> {
        let mut runs = Vec::new();

        'candidates: for path in files.glob(&self.source)? {
            let parts = PathParts::from_path(&path);
            for condition in &self.skip {
                if condition.should_skip(&parts, &self.bind, globals, files).await? {
                    debug!(path = %parts.path, "Skipping batch file");
                    continue 'candidates;
                }
            }

            let content = files.read(&path).await?;
            let mut variables = parts.to_variables(Some(&self.bind));
            variables.set_str(self.bind.clone(), content);

            runs.push(Run {
                tasks: tasks.to_vec(),
                variables,
            });
        }

        info!(source = %self.source, runs = runs.len(), "Planned file batch");
        Ok(runs)
    }
}

/// Expands a task list into runs.
#[derive(Debug, Clone, Default)]
pub enum Planner {
    /// One run with no extra bindings.
    #[default]
    Serial,
    FileBatch(FileBatch),
    /// Several batches, concatenated in declaration order.
    MultiSource(Vec<FileBatch>),
}

impl Planner {
    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Serial)
    }

    /// `globals` are visible to skip templates only; they are not copied
    /// into the runs.
    pub async fn plan(
        &self,
        tasks: &[Task],
        globals: &Variables,
        files: &dyn FileSystem,
    ) -> Result<Vec<Run>> {
        if tasks.is_empty() {
            return Err(PromptlineError::Planning("a run needs at least one task".into()));
        }

        match self {
            Self::Serial => Ok(vec![Run {
                tasks: tasks.to_vec(),
                variables: Variables::new(),
            }]),
            Self::FileBatch(batch) => batch.plan(tasks, globals, files).await,
            Self::MultiSource(batches) => {
                let mut runs = Vec::new();
                for batch in batches {
                    runs.extend(batch.plan(tasks, globals, files).await?);
                }
                Ok(runs)
            }
        }
    }
}
