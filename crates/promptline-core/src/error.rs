use thiserror::Error;

use crate::types::FieldKind;

/// Model output that does not satisfy an Instruct's declared output contract.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("field `{field}` is not a valid {kind}: {value:?}")]
    InvalidValue {
        field: String,
        kind: FieldKind,
        value: String,
    },

    #[error("expected empty output for a contract with no fields, got {0:?}")]
    UnexpectedContent(String),
}

impl ContractViolation {
    /// The offending field, if the violation concerns one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingField(field) | Self::InvalidValue { field, .. } => Some(field),
            Self::UnexpectedContent(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PromptlineError {
    // Output contract
    #[error("Contract violation: {0}")]
    Contract(#[from] ContractViolation),

    #[error("Unresolved template variables: {}", .0.join(", "))]
    UnresolvedVariable(Vec<String>),

    #[error("Instruct already finalized")]
    AlreadyFinalized,

    // Provider errors
    #[error("Provider request failed: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Provider output truncated at the length limit")]
    Length,

    #[error("Provider returned unrecognized stop reason: {0}")]
    UnknownStopReason(String),

    #[error("Provider call timed out after {0}s")]
    ProviderTimeout(u64),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Malformed arguments for tool {tool}: {message}")]
    ToolArguments { tool: String, message: String },

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Conversation exceeded max tool iterations ({0})")]
    MaxToolIterations(usize),

    // Planning errors
    #[error("Planning error: {0}")]
    Planning(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PromptlineError>;
