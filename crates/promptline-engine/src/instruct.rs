use promptline_core::error::{PromptlineError, Result};

use crate::contract::{OutputContract, ParsedOutput, TypedRecord};
use crate::template::render_checked;
use crate::vars::Variables;

/// One structured LLM request/response cycle.
///
/// `compile` may run any number of times; `finalize` runs at most once and
/// freezes the raw response alongside the typed result.
#[derive(Debug, Clone)]
pub struct Instruct {
    pub id: Option<String>,
    pub prompt: String,
    pub system: Option<String>,
    /// Task-local bindings; these win over run variables.
    pub inputs: Variables,
    pub contract: OutputContract,
    /// Names of registry tools advertised while this task runs.
    pub tools: Vec<String>,
    /// Path templates whose contents are attached to the prompt.
    pub files: Vec<String>,
    finalized: bool,
    raw_response: Option<String>,
    result: Option<ParsedOutput>,
}

impl Instruct {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: None,
            prompt: prompt.into(),
            system: None,
            inputs: Variables::new(),
            contract: OutputContract::empty(),
            tools: Vec::new(),
            files: Vec::new(),
            finalized: false,
            raw_response: None,
            result: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.set(key, value);
        self
    }

    pub fn with_contract(mut self, contract: OutputContract) -> Self {
        self.contract = contract;
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    /// Bindings used for rendering: run variables overlaid with task inputs.
    pub fn bindings(&self, vars: &Variables) -> Variables {
        Variables::layered(vars, &self.inputs)
    }

    /// Render the prompt and append the contract's format instructions.
    pub fn compile(&self, vars: &Variables, strict: bool) -> Result<String> {
        let prompt = render_checked(&self.prompt, &self.bindings(vars), strict)?;
        let instructions = self.contract.format_instructions();
        if instructions.is_empty() {
            Ok(prompt)
        } else {
            Ok(format!("{}\n\n{}", prompt, instructions))
        }
    }

    pub fn compile_system(&self, vars: &Variables, strict: bool) -> Result<Option<String>> {
        self.system
            .as_deref()
            .map(|s| render_checked(s, &self.bindings(vars), strict))
            .transpose()
    }

    /// Rendered attachment paths.
    pub fn attachments(&self, vars: &Variables, strict: bool) -> Result<Vec<String>> {
        let bindings = self.bindings(vars);
        self.files
            .iter()
            .map(|f| render_checked(f, &bindings, strict))
            .collect()
    }

    /// Parse the terminal response into the typed result.
    pub fn finalize(&mut self, raw: &str) -> Result<&TypedRecord> {
        if self.finalized {
            return Err(PromptlineError::AlreadyFinalized);
        }
        self.finalized = true;
        self.raw_response = Some(raw.to_string());

        let parsed = self.contract.parse(raw)?;
        Ok(&self.result.insert(parsed).record)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn raw_response(&self) -> Option<&str> {
        self.raw_response.as_deref()
    }

    pub fn result(&self) -> Option<&TypedRecord> {
        self.result.as_ref().map(|p| &p.record)
    }

    /// Text outside the contract's tags, and chain-of-thought reasoning.
    pub fn leftovers(&self) -> Option<(&str, Option<&str>)> {
        self.result
            .as_ref()
            .map(|p| (p.remaining.as_str(), p.reasoning.as_deref()))
    }
}
