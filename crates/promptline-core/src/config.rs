use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PromptlineError, Result};

/// Top-level Promptline configuration (`promptline.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Extra HTTP headers sent with every request.
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Execution policy shared by every job invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on runs (or DAG nodes) in flight at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Fail prompt compilation when a `{{placeholder}}` stays unresolved.
    #[serde(default)]
    pub strict: bool,
    /// Cap on tool-call round trips per Instruct. Unset means unbounded.
    #[serde(default)]
    pub max_tool_iterations: Option<usize>,
    /// Per-call provider timeout. Unset means wait indefinitely.
    #[serde(default)]
    pub provider_timeout_secs: Option<u64>,
    /// Base directory for relative file patterns and writes.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            strict: false,
            max_tool_iterations: None,
            provider_timeout_secs: None,
            working_dir: default_working_dir(),
        }
    }
}

fn default_max_concurrency() -> usize { 4 }
fn default_working_dir() -> String { ".".to_string() }

impl EngineConfig {
    /// Resolve the working directory (expand ~).
    pub fn working_dir(&self) -> PathBuf {
        let wd = &self.working_dir;
        if let Some(rest) = wd.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(wd)
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| PromptlineError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: AppConfig =
            toml::from_str(&expanded).map_err(|e| PromptlineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.engine.max_concurrency == 0 {
            return Err(PromptlineError::Config(
                "engine.max_concurrency must be at least 1".into(),
            ));
        }
        if self.engine.max_tool_iterations == Some(0) {
            return Err(PromptlineError::Config(
                "engine.max_tool_iterations must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
pub fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
