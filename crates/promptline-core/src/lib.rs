pub mod config;
pub mod error;
pub mod event;
pub mod stats;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{ContractViolation, PromptlineError, Result};
pub use event::EventBus;
pub use stats::Stats;
pub use types::*;
