use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use promptline_core::config::{AppConfig, EngineConfig, ModelConfig};
use promptline_core::event::EventBus;
use promptline_core::types::JobEvent;
use promptline_engine::{Engine, Job, JobPlan, Variables};
use promptline_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "promptline", version, about = "Run templated LLM jobs over files and dependency graphs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "promptline.toml", env = "PROMPTLINE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a job file and print its result as JSON
    Run {
        /// Job file (TOML)
        job: PathBuf,
        /// Override a job variable (KEY=VALUE, repeatable)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
        /// Maximum runs in flight
        #[arg(long)]
        concurrency: Option<usize>,
        /// Fail when a placeholder stays unresolved
        #[arg(long)]
        strict: bool,
        /// Suppress progress output on stderr
        #[arg(long, short)]
        quiet: bool,
    },
    /// Show the runs a job would produce without calling the model
    Plan {
        /// Job file (TOML)
        job: PathBuf,
    },
    /// List built-in tools
    Tools,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("promptline=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Commands that need no config
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "promptline", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Tools => {
            let registry = ToolRegistry::with_builtins();
            for def in registry.definitions() {
                println!("{:<12} {}", def.name, def.description);
            }
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            let mut shown = config.clone();
            if shown.model.api_key.is_some() {
                shown.model.api_key = Some("********".to_string());
            }
            println!("{}", toml::to_string_pretty(&shown)?);
        }
        Commands::Plan { job } => {
            let job = Job::load(&job)?;
            let engine = build_engine(&config, config.engine.clone());
            print_plan(&job, engine.plan_job(&job).await?);
        }
        Commands::Run {
            job,
            vars,
            concurrency,
            strict,
            quiet,
        } => {
            let job = Job::load(&job)?;
            let overrides = parse_vars(&vars)?;

            let mut engine_config = config.engine.clone();
            if let Some(limit) = concurrency {
                engine_config.max_concurrency = limit.max(1);
            }
            engine_config.strict |= strict;

            let events = Arc::new(EventBus::default());
            let engine = build_engine(&config, engine_config).with_event_bus(events.clone());

            let progress = (!quiet).then(|| tokio::spawn(render_progress(events.subscribe())));

            let result = engine.run_job(&job, overrides).await?;
            drop(engine);
            drop(events);
            if let Some(handle) = progress {
                let _ = handle.await;
            }

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Tools | Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn build_engine(config: &AppConfig, engine_config: EngineConfig) -> Engine {
    let provider = promptline_llm::create_provider(&config.model);
    info!(
        provider = %config.model.provider,
        model = %config.model.model_id,
        "Provider ready"
    );
    Engine::new(provider, engine_config)
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    warn!(path = %path.display(), "No config file found, falling back to environment");
    create_env_config()
}

fn create_env_config() -> anyhow::Result<AppConfig> {
    let anthropic_key = std::env::var("ANTHROPIC_API_KEY").ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    let (provider, model_id, api_key) = if let Some(key) = anthropic_key {
        ("anthropic", "claude-sonnet-4-20250514", Some(key))
    } else if let Some(key) = openai_key {
        ("openai", "gpt-4o", Some(key))
    } else {
        anyhow::bail!("no config file and neither ANTHROPIC_API_KEY nor OPENAI_API_KEY is set");
    };

    Ok(AppConfig {
        model: ModelConfig {
            provider: provider.to_string(),
            model_id: model_id.to_string(),
            api_key,
            base_url: None,
            max_tokens: 4096,
            temperature: 0.0,
            extra_headers: Default::default(),
        },
        engine: EngineConfig::default(),
    })
}

/// Parse `KEY=VALUE` pairs. Values that parse as JSON keep their type.
fn parse_vars(pairs: &[String]) -> anyhow::Result<Variables> {
    let mut vars = Variables::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            anyhow::bail!("invalid --var '{pair}', expected KEY=VALUE");
        };
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        vars.set(key.trim(), value);
    }
    Ok(vars)
}

fn print_plan(job: &Job, plan: JobPlan) {
    println!("job: {}", job.name);
    match plan {
        JobPlan::Runs(runs) => {
            println!("{} run(s)", runs.len());
            for (i, run) in runs.iter().enumerate() {
                let kinds: Vec<String> = run.tasks.iter().map(|t| t.kind().to_string()).collect();
                let mut keys = run.variables.keys();
                keys.sort_unstable();
                println!("  [{i}] tasks: {}  vars: {}", kinds.join(", "), keys.join(", "));
            }
        }
        JobPlan::Dag(order) => {
            println!("{} node(s), in dependency order:", order.len());
            for name in order {
                println!("  {name}");
            }
        }
    }
}

/// Drains job events until the bus is dropped.
async fn render_progress(mut rx: broadcast::Receiver<JobEvent>) {
    loop {
        match rx.recv().await {
            Ok(JobEvent::JobStarted { job, runs }) => {
                eprintln!("\x1b[1m{job}\x1b[0m: {runs} run(s) planned");
            }
            Ok(JobEvent::ToolCall { run, name }) => {
                eprintln!("  \x1b[36m[{run}] tool: {name}\x1b[0m");
            }
            Ok(JobEvent::Running {
                in_flight,
                completed,
                total,
            }) => {
                eprintln!("  running {in_flight}, done {completed}/{total}");
            }
            Ok(JobEvent::RunFailed { index, error }) => {
                eprintln!("  \x1b[31m[{index}] failed: {error}\x1b[0m");
            }
            Ok(JobEvent::Success { total, failed }) => {
                eprintln!("\x1b[32mfinished\x1b[0m: {total} total, {failed} failed");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => {
                warn!(skipped = n, "Progress display lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
