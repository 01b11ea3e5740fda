use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use promptline_core::error::{PromptlineError, Result};
use promptline_core::traits::Tool;
use promptline_core::types::ToolContext;

use super::resolve_path;

pub struct ReadFileTool;

#[derive(Deserialize)]
struct ReadInput {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file. Supports line offset and limit for large files."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read (default: 2000)"
                }
            },
            "required": ["path"]
        })
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(30)
    }

    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let params: ReadInput =
                serde_json::from_value(input).map_err(|e| PromptlineError::ToolArguments {
                    tool: "read_file".to_string(),
                    message: e.to_string(),
                })?;

            let path = resolve_path(&params.path, &ctx.working_dir);
            debug!(path = %path.display(), run = ctx.run_index, "Reading file");

            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                PromptlineError::ToolExecution {
                    tool: "read_file".to_string(),
                    message: format!("{}: {}", path.display(), e),
                }
            })?;

            let offset = params.offset.unwrap_or(1).max(1) - 1; // Convert to 0-indexed
            let limit = params.limit.unwrap_or(2000);

            let selected: Vec<&str> = content.lines().skip(offset).take(limit).collect();
            if selected.is_empty() {
                return Ok("(empty file)".to_string());
            }

            Ok(selected.join("\n"))
        })
    }
}
