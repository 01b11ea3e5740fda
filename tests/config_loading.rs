use std::io::Write;

use promptline_core::config::AppConfig;
use promptline_core::PromptlineError;

fn load(toml_content: &str) -> promptline_core::Result<AppConfig> {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");
    AppConfig::load(tmp.path())
}

#[test]
fn test_load_full_config_from_file() {
    let config = load(
        r#"
[model]
provider = "anthropic"
model_id = "claude-sonnet-4-20250514"
api_key = "sk-test-key"
max_tokens = 2048
temperature = 0.5

[model.extra_headers]
x-team = "docs"

[engine]
max_concurrency = 8
strict = true
max_tool_iterations = 12
provider_timeout_secs = 90
working_dir = "/tmp/promptline-test"
"#,
    )
    .expect("load config");

    assert_eq!(config.model.provider, "anthropic");
    assert_eq!(config.model.model_id, "claude-sonnet-4-20250514");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 2048);
    assert_eq!(config.model.extra_headers.get("x-team").map(String::as_str), Some("docs"));

    assert_eq!(config.engine.max_concurrency, 8);
    assert!(config.engine.strict);
    assert_eq!(config.engine.max_tool_iterations, Some(12));
    assert_eq!(config.engine.provider_timeout_secs, Some(90));
    assert_eq!(config.engine.working_dir().to_string_lossy(), "/tmp/promptline-test");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("PROMPTLINE_TEST_API_KEY", "expanded-key-value");

    let config = load(
        r#"
[model]
model_id = "test-model"
api_key = "${PROMPTLINE_TEST_API_KEY}"
"#,
    )
    .expect("load config");
    assert_eq!(config.model.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("PROMPTLINE_TEST_API_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let config = load(
        r#"
[model]
model_id = "gpt-4o-mini"
"#,
    )
    .expect("load config");

    assert_eq!(config.model.provider, "openai");
    assert_eq!(config.model.max_tokens, 4096);
    assert_eq!(config.engine.max_concurrency, 4);
    assert!(!config.engine.strict);
    assert!(config.engine.max_tool_iterations.is_none());
    assert!(config.engine.provider_timeout_secs.is_none());
}

#[test]
fn test_invalid_engine_limits_rejected() {
    let zero_concurrency = load(
        r#"
[model]
model_id = "m"

[engine]
max_concurrency = 0
"#,
    );
    assert!(matches!(zero_concurrency, Err(PromptlineError::Config(_))));

    let zero_tool_cap = load(
        r#"
[model]
model_id = "m"

[engine]
max_tool_iterations = 0
"#,
    );
    assert!(matches!(zero_tool_cap, Err(PromptlineError::Config(_))));
}

#[test]
fn test_missing_config_file() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/promptline.toml")).unwrap_err();
    assert!(matches!(err, PromptlineError::ConfigNotFound(_)));
}
