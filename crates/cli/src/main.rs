//! Hive CLI
//!
//! `hive run` drives the plan → dispatch → merge pipeline, `hive chat` runs
//! one conversation turn starting at the triage agent (which can hand
//! multi-role work to the same pipeline), `hive roles` lists the role catalog.

mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use hive_core::config::HiveConfig;
use hive_core::orchestrator::Orchestrator;
use hive_core::provider::{ChatMessage, ModelProvider, OpenAiCompatibleProvider};
use hive_core::roles::RoleCatalog;
use hive_core::swarm::{AgentFactory, ContextVariables, Swarm, SwarmEvent, TRIAGE};
use hive_core::tools::{file_tools, CliCodeGenerator, ToolCatalog};
use serde_json::json;
use tokio::sync::mpsc;

use crate::logging::{init_logging, LogFormat};

#[derive(Parser)]
#[command(author, version, about = "Hive - multi-agent orchestration")]
struct Args {
    /// Config file (defaults to <runtime>/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory tools and the code generator operate in
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    /// Directory of role YAML files
    #[arg(long, global = true)]
    roles_dir: Option<PathBuf>,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    /// Debug-level logs (HIVE_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Plan, dispatch and merge a multi-role request
    Run {
        request: String,
        /// Session id; artifacts from an earlier run with the same id are reused
        #[arg(long)]
        session: Option<String>,
    },
    /// One conversation turn, starting at the triage agent
    Chat {
        message: String,
        #[arg(long, default_value = "cli")]
        channel: String,
        #[arg(long, default_value = "local")]
        chat_id: String,
        /// Agent to start from, e.g. when resuming a conversation
        #[arg(long, default_value = TRIAGE)]
        agent: String,
    },
    /// List the role catalog
    Roles,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    // A missing .env is fine
    let _ = dotenvy::dotenv();
    init_logging(args.log_format, if args.verbose { "debug" } else { "info" })?;

    let mut config = match &args.config {
        Some(path) => HiveConfig::load(path).await?,
        None => HiveConfig::load_default().await?,
    };
    config.apply_env();
    if let Some(workspace) = args.workspace {
        config.workspace = Some(workspace);
    }
    if let Some(dir) = args.roles_dir {
        config.roles_dir = Some(dir);
    }

    match args.command {
        CliCommand::Run { request, session } => run(&config, &request, session.as_deref()).await,
        CliCommand::Chat {
            message,
            channel,
            chat_id,
            agent,
        } => chat(&config, &message, &channel, &chat_id, &agent).await,
        CliCommand::Roles => {
            let catalog = load_catalog(&config)?;
            for role in catalog.iter() {
                let mode = if role.delegate {
                    "code generator".to_string()
                } else {
                    format!("tools: {}", role.tools.join(", "))
                };
                println!("{:<12} {:<24} {}", role.name, role.display_name, mode);
            }
            Ok(())
        }
    }
}

fn load_catalog(config: &HiveConfig) -> Result<RoleCatalog> {
    match &config.roles_dir {
        Some(dir) => RoleCatalog::load_dir(dir)
            .with_context(|| format!("Failed to load roles from {:?}", dir)),
        None => Ok(RoleCatalog::builtin()),
    }
}

fn provider(config: &HiveConfig) -> Result<Arc<dyn ModelProvider>> {
    let model = config.model_config();
    if model.api_key().is_none() && config.base_url.is_none() {
        tracing::warn!(env = model.provider.api_key_env(), "no API key set");
    }
    tracing::info!(provider = model.provider.display_name(), model = %model.model, "using provider");
    Ok(Arc::new(OpenAiCompatibleProvider::new(&model)?))
}

fn orchestrator(config: &HiveConfig, provider: Arc<dyn ModelProvider>) -> Result<Orchestrator> {
    let catalog = Arc::new(load_catalog(config)?);
    Ok(Orchestrator::from_config(
        config,
        provider,
        Arc::new(CliCodeGenerator::new(config.code_generator.clone())),
        ToolCatalog::with_file_tools(config.workspace_dir()),
        catalog,
    ))
}

async fn run(config: &HiveConfig, request: &str, session: Option<&str>) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<SwarmEvent>(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tracing::info!(
                kind = ?event.kind,
                agent = %event.agent,
                task_id = event.task_id.as_deref().unwrap_or("-"),
                "event"
            );
        }
    });

    let orchestrator = orchestrator(config, provider(config)?)?.with_events(Some(tx));

    let session = orchestrator.run(request, session).await?;
    drop(orchestrator);
    let _ = printer.await;

    if session.dispatch.is_deadlocked() {
        tracing::warn!(blocked = ?session.dispatch.blocked, "some tasks never ran");
    }
    eprintln!("session: {}", session.session_id);
    println!("{}", session.report);
    Ok(())
}

async fn chat(
    config: &HiveConfig,
    message: &str,
    channel: &str,
    chat_id: &str,
    agent: &str,
) -> Result<()> {
    let provider = provider(config)?;
    let workspace = config.workspace_dir();
    let factory = AgentFactory::new(
        Arc::new(CliCodeGenerator::new(config.code_generator.clone())),
        workspace.clone(),
    )
    .with_code_timeout(config.delegate_timeout())
    .with_triage_tools(file_tools(workspace))
    .with_orchestrator(Arc::new(orchestrator(config, Arc::clone(&provider))?));
    let start = factory
        .by_name(agent)
        .ok_or_else(|| anyhow!("Unknown agent '{}'", agent))?;

    let mut swarm = Swarm::new(provider).with_call_timeout(config.model_timeout());
    if let Some(model) = &config.model {
        swarm = swarm.with_default_model(model.clone());
    }

    let mut context = ContextVariables::new();
    context.insert("channel".into(), json!(channel));
    context.insert("chat_id".into(), json!(chat_id));

    let response = swarm
        .run(start, vec![ChatMessage::user(message)], context, config.max_turns)
        .await;

    eprintln!("agent: {} ({:?})", response.agent.name, response.outcome);
    println!("{}", response.last_reply().unwrap_or_default());
    Ok(())
}
