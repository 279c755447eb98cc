//! surge-crew - command line entry point
//!
//! Runs, validates or replays the hospital surge preparedness pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use surge_crew::llm::GeminiClient;
use surge_crew::task::Task;
use surge_crew::{
    Config, FsSink, PipelineConfig, ResilientInvoker, RunInputs, RunOutcome, RunRecord,
    TaskGraphRunner,
};

#[derive(Parser)]
#[command(name = "surge-crew")]
#[command(about = "Hospital surge preparedness with role-specialised agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline
    Run,
    /// Check configuration, pipeline and inputs without calling the backend
    Validate,
    /// Re-run a pipeline from one task, reusing earlier outputs from a run record
    Replay {
        /// First task to re-execute
        task_id: String,
        /// Run record written by a previous run
        #[arg(long)]
        record: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "surge_crew=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    let pipeline = PipelineConfig::load_or_builtin(config.pipeline_path.as_deref())
        .context("invalid pipeline")?;
    info!(
        "Loaded configuration: {} key(s), models={}, tasks={}",
        config.api_keys.len(),
        config.models.join(","),
        pipeline.tasks.len()
    );

    match cli.command {
        Commands::Validate => {
            RunInputs::from_env().context("missing run inputs")?;
            // Building the tasks exercises pool construction without any backend call.
            let _ = build_tasks(&config, &pipeline)?;
            println!(
                "Configuration OK: {} agents, {} tasks ({})",
                pipeline.agents.len(),
                pipeline.tasks.len(),
                pipeline.task_ids().collect::<Vec<_>>().join(" -> ")
            );
            Ok(())
        }
        Commands::Run => {
            let inputs = RunInputs::from_env().context("missing run inputs")?;
            let (tasks, invoker) = build_tasks(&config, &pipeline)?;
            let runner = runner(&config, &inputs);
            let outcome = runner.run(&tasks).await?;
            finish(&config, &inputs, &outcome, &invoker).await
        }
        Commands::Replay { task_id, record } => {
            let previous = RunRecord::load(&record)
                .await
                .with_context(|| format!("cannot load run record {}", record.display()))?;
            // Prompts must render exactly as they did in the recorded run.
            let inputs = previous.run_inputs();
            let (tasks, invoker) = build_tasks(&config, &pipeline)?;
            let runner = runner(&config, &inputs);
            let outcome = runner
                .run_from(&tasks, previous.outputs(), Some(task_id.as_str()))
                .await?;
            finish(&config, &inputs, &outcome, &invoker).await
        }
    }
}

fn build_tasks(
    config: &Config,
    pipeline: &PipelineConfig,
) -> anyhow::Result<(Vec<Task>, Arc<ResilientInvoker>)> {
    let backend = match &config.base_url {
        Some(url) => GeminiClient::with_base_url(url.clone()),
        None => GeminiClient::new(),
    };
    let invoker = Arc::new(ResilientInvoker::from_config(config, Arc::new(backend))?);
    let tasks = pipeline.build(invoker.clone(), &config.generation)?;
    Ok((tasks, invoker))
}

/// Runner writing under the output directory, cancelled by Ctrl-C.
fn runner(config: &Config, inputs: &RunInputs) -> TaskGraphRunner {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current task and stopping");
            on_signal.cancel();
        }
    });

    TaskGraphRunner::new(Arc::new(FsSink::new(&config.output_dir)))
        .with_inputs(inputs.as_map().clone())
        .with_cancellation(cancel)
}

async fn finish(
    config: &Config,
    inputs: &RunInputs,
    outcome: &RunOutcome,
    invoker: &ResilientInvoker,
) -> anyhow::Result<()> {
    let record = RunRecord::from_outcome(outcome, inputs.as_map());
    let path = record.save(&config.results_dir).await?;

    println!("Run {} finished", outcome.run_id);
    for (id, output) in outcome.iter() {
        println!("  {:<40} {}", id, output.status.describe());
    }
    println!("Run record: {}", path.display());

    for health in invoker.credentials().snapshot().await {
        info!(
            credential = health.index,
            validity = ?health.validity,
            successes = health.total_successes,
            failures = health.total_failures,
            "Credential health"
        );
    }

    let unsuccessful = outcome.unsuccessful();
    if !unsuccessful.is_empty() {
        warn!(
            "{} task(s) did not complete: {}",
            unsuccessful.len(),
            unsuccessful.join(", ")
        );
    }
    Ok(())
}
