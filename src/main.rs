//! botforge: turn a chatbot configuration into a deployable project.

use anyhow::{bail, Context};
use botforge_core::{Configuration, FactorySettings, RawConfiguration, RunId};
use botforge_llm::{CancellationToken, GroqProvider, LlmProvider};
use botforge_pipeline::templates::TemplateOrigin;
use botforge_pipeline::{
    ArchitecturePlanner, CancelAck, LlmPlanner, LocalFsStore, Orchestrator, Renderer, RetryPolicy,
    RuleBasedPlanner, RunRegistry, Stage, TemplateLibrary,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "botforge", version, about = "Chatbot project generator")]
struct Cli {
    /// Settings file (TOML); defaults apply when it does not exist
    #[arg(long, global = true, default_value = "botforge.toml")]
    settings: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArgs {
    /// Chatbot configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a chatbot project into the output root
    Generate {
        #[command(flatten)]
        input: ConfigArgs,
        /// Plan with rules and render templates only; no backend calls
        #[arg(long)]
        offline: bool,
    },
    /// Print the architecture plan as JSON
    Plan {
        #[command(flatten)]
        input: ConfigArgs,
        #[arg(long)]
        offline: bool,
    },
    /// Validate a configuration and print its normalized form
    Validate {
        #[command(flatten)]
        input: ConfigArgs,
    },
    /// List template keys and where each comes from
    Templates,
    /// Print the effective settings as TOML
    Settings,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "botforge=info,botforge_pipeline=info,botforge_llm=info,botforge_core=info".into()
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_raw(path: &Path) -> anyhow::Result<RawConfiguration> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    RawConfiguration::from_json(&text).with_context(|| format!("parsing {}", path.display()))
}

fn load_library(settings: &FactorySettings) -> anyhow::Result<Arc<TemplateLibrary>> {
    let library = match &settings.paths.templates {
        Some(dir) => TemplateLibrary::with_overlay(dir)
            .with_context(|| format!("loading templates from {}", dir.display()))?,
        None => TemplateLibrary::builtin(),
    };
    Ok(Arc::new(library))
}

fn backend(settings: &FactorySettings) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let Some(key) = settings.api_key() else {
        bail!("{} is not set (use --offline to generate without a backend)", settings.backend.api_key_env);
    };
    Ok(Arc::new(GroqProvider::new(key).with_base_url(&settings.backend.base_url)))
}

fn planner(
    settings: &FactorySettings,
    library: &Arc<TemplateLibrary>,
    offline: bool,
) -> anyhow::Result<Arc<dyn ArchitecturePlanner>> {
    if offline {
        return Ok(Arc::new(RuleBasedPlanner::new()));
    }
    let b = &settings.backend;
    let planner = LlmPlanner::new(backend(settings)?, library.clone())
        .with_retry(RetryPolicy::from_config(&settings.planner))
        .with_model(&b.model, b.temperature, b.max_tokens);
    Ok(Arc::new(planner))
}

fn renderer(settings: &FactorySettings, library: Arc<TemplateLibrary>, offline: bool) -> anyhow::Result<Renderer> {
    let renderer = Renderer::new(library);
    if offline {
        return Ok(renderer);
    }
    let b = &settings.backend;
    Ok(renderer
        .with_author(backend(settings)?, RetryPolicy::from_config(&settings.renderer))
        .with_model(&b.model, b.temperature, b.max_tokens))
}

/// Cancel before logging: tracing skips field expressions on disabled callsites.
fn interrupt(orchestrator: &Orchestrator, id: &RunId) -> CancelAck {
    let ack = orchestrator.cancel(id);
    warn!(run_id = %id, ?ack, "interrupted");
    ack
}

async fn generate(settings: FactorySettings, path: &Path, offline: bool) -> anyhow::Result<()> {
    let raw = load_raw(path)?;
    let library = load_library(&settings)?;
    let store = LocalFsStore::new(&settings.paths.output_root).with_retries(settings.orchestrator.finalize_retries);

    let orchestrator = Orchestrator::new(
        Arc::new(RunRegistry::new()),
        planner(&settings, &library, offline)?,
        Arc::new(renderer(&settings, library, offline)?),
        Arc::new(store),
        settings.orchestrator.max_concurrent_runs,
    );

    let id = orchestrator.submit(raw);
    let status = tokio::select! {
        status = orchestrator.wait(&id) => status,
        _ = tokio::signal::ctrl_c() => {
            interrupt(&orchestrator, &id);
            orchestrator.wait(&id).await
        }
    };
    let Some(status) = status else {
        bail!("run {} disappeared", id);
    };

    println!("{}", serde_json::to_string_pretty(&status)?);
    match (status.stage, &status.failure) {
        (Stage::Completed, _) => {
            if let Some(out) = &status.output_path {
                info!(run_id = %id, path = %out.display(), "done");
            }
            Ok(())
        }
        (_, Some(failure)) => bail!("run {} failed at {}: {}", id, failure.stage, failure.reason),
        (stage, None) => bail!("run {} ended in {}", id, stage),
    }
}

async fn plan(settings: FactorySettings, path: &Path, offline: bool) -> anyhow::Result<()> {
    let raw = load_raw(path)?;
    let config = Configuration::validate(&raw)?;
    let library = load_library(&settings)?;
    let planner = planner(&settings, &library, offline)?;

    let (result, attempts) = planner.plan_with_attempts(&config, &CancellationToken::new()).await;
    let plan = result.with_context(|| format!("planning failed after {} attempts", attempts))?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn templates(settings: &FactorySettings) -> anyhow::Result<()> {
    let library = load_library(settings)?;
    for key in library.keys() {
        let origin = match library.origin(key) {
            Some(TemplateOrigin::Overlay(p)) => p.display().to_string(),
            _ => "built-in".to_string(),
        };
        println!("{:<40} {}", key.to_string(), origin);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);
    let settings = FactorySettings::load_or_default(&cli.settings)?;

    match cli.command {
        Commands::Generate { input, offline } => generate(settings, &input.config, offline).await?,
        Commands::Plan { input, offline } => plan(settings, &input.config, offline).await?,
        Commands::Validate { input } => {
            let config = Configuration::validate(&load_raw(&input.config)?)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Templates => templates(&settings)?,
        Commands::Settings => print!("{}", settings.to_toml()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use botforge_llm::{ScriptStep, ScriptedProvider};
    use botforge_pipeline::FailureStage;
    use std::time::Duration;

    #[tokio::test]
    async fn interrupt_cancels_with_logging_disabled() {
        // No subscriber is installed, so every tracing callsite is disabled.
        let root = tempfile::tempdir().unwrap();
        let author: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::constant(ScriptStep::Hang));
        let retry = RetryPolicy { attempt_timeout: Duration::from_secs(30), ..RetryPolicy::default() };
        let renderer = Renderer::new(Arc::new(TemplateLibrary::builtin())).with_author(author, retry);
        let orchestrator = Orchestrator::new(
            Arc::new(RunRegistry::new()),
            Arc::new(RuleBasedPlanner::new().with_authored_readme(true)),
            Arc::new(renderer),
            Arc::new(LocalFsStore::new(root.path())),
            1,
        );

        let id = orchestrator.submit(RawConfiguration {
            name: Some("Support Bot".into()),
            chatbot_type: Some("customer_support".into()),
            ..Default::default()
        });
        let mut rx = orchestrator.registry().subscribe(&id).unwrap();
        rx.wait_for(|r| r.stage == Stage::Rendering).await.unwrap();

        assert_eq!(interrupt(&orchestrator, &id), CancelAck::Accepted);
        let status = tokio::time::timeout(Duration::from_secs(5), orchestrator.wait(&id))
            .await
            .expect("cancelled run should finish")
            .unwrap();
        assert_eq!(status.failure.unwrap().stage, FailureStage::Cancelled);
    }
}
