use std::path::PathBuf;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use promptline_core::error::{PromptlineError, Result};
use promptline_core::traits::Tool;
use promptline_core::types::ToolContext;

use super::resolve_path;

const MAX_RESULTS: usize = 1000;

pub struct ListFilesTool;

#[derive(Deserialize)]
struct ListInput {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files matching a glob pattern (e.g. \"**/*.md\"). \
         Returns one path per line, sorted."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern to match files (e.g. \"**/*.md\", \"docs/*.txt\")"
                },
                "path": {
                    "type": "string",
                    "description": "Base directory to search from (default: working directory)"
                }
            },
            "required": ["pattern"]
        })
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(30)
    }

    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let params: ListInput =
                serde_json::from_value(input).map_err(|e| PromptlineError::ToolArguments {
                    tool: "list_files".to_string(),
                    message: e.to_string(),
                })?;

            let base = match &params.path {
                Some(p) => resolve_path(p, &ctx.working_dir),
                None => ctx.working_dir.clone(),
            };
            let pattern_str = base.join(&params.pattern).to_string_lossy().to_string();

            debug!(pattern = %pattern_str, "Listing files");

            let mut paths: Vec<PathBuf> = glob::glob(&pattern_str)
                .map_err(|e| PromptlineError::ToolExecution {
                    tool: "list_files".to_string(),
                    message: format!("Invalid pattern: {}", e),
                })?
                .filter_map(|e| e.ok())
                .filter(|p| p.is_file())
                .collect();

            paths.sort();
            paths.truncate(MAX_RESULTS);

            if paths.is_empty() {
                return Ok("No files matched the pattern.".to_string());
            }

            Ok(paths
                .iter()
                .map(|p| {
                    p.strip_prefix(&ctx.working_dir)
                        .unwrap_or(p)
                        .display()
                        .to_string()
                })
                .collect::<Vec<_>>()
                .join("\n"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lists_matching_files_relative_to_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.md"), "b").unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        std::fs::write(dir.path().join("c.txt"), "c").unwrap();

        let ctx = ToolContext {
            run_index: 0,
            working_dir: dir.path().to_path_buf(),
        };
        let out = ListFilesTool
            .execute(serde_json::json!({"pattern": "*.md"}), ctx)
            .await
            .unwrap();
        assert_eq!(out, "a.md\nb.md");
    }
}
