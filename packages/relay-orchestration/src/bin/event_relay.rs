use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use relay_backends::InMemoryBroker;
use relay_orchestration::{
    init_logging, DispatchResult, Event, ExecutionContext, HopReport, LocalRuntime,
    PipelineHandler, PipelineTopology, RelayConfig, RelayError, ScheduleTrigger, Stage,
};

#[derive(Parser)]
#[command(
    name = "event-relay",
    version,
    about = "Relay a tracking id through queue, topic and event bus hops"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Handler configuration YAML (environment overrides still apply)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level; defaults to the configured `log_level`
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the pipeline topology
    Plan,
    /// Run one handler invocation against in-memory backends
    Hop {
        /// Stage of the handler (queue, topic, bus, terminal); overrides config
        #[arg(long)]
        stage: Option<String>,
        /// Incoming event as a JSON object
        #[arg(long, default_value = "{}")]
        event: String,
        /// Trace header seen by this invocation; defaults to `_X_AMZN_TRACE_ID`
        #[arg(long)]
        trace_header: Option<String>,
    },
    /// Run the full chain for a number of schedule ticks
    Simulate {
        #[arg(long, default_value_t = 1)]
        ticks: u64,
        /// Milliseconds between ticks
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = RelayConfig::load(cli.config.as_deref()).map_err(RelayError::from)?;
    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));

    match cli.command {
        Commands::Plan => plan(&config),
        Commands::Hop {
            stage,
            event,
            trace_header,
        } => hop(config, stage, &event, trace_header).await,
        Commands::Simulate { ticks, interval_ms } => simulate(&config, ticks, interval_ms).await,
    }
}

fn plan(config: &RelayConfig) -> anyhow::Result<()> {
    let topology = PipelineTopology::default_topology(config)?;
    println!("{}", topology.execution_plan());
    Ok(())
}

async fn hop(
    config: RelayConfig,
    stage: Option<String>,
    event: &str,
    trace_header: Option<String>,
) -> anyhow::Result<()> {
    let config = match stage {
        Some(stage) => config.for_stage(Stage::parse(&stage)),
        None => config,
    };
    let mut event: Event = serde_json::from_str(event).context("--event must be a JSON object")?;

    let broker = InMemoryBroker::new()
        .with_queue(config.queue_identifier.as_str())
        .with_topic(config.topic_identifier.as_str());
    let handler = PipelineHandler::new(Arc::new(config), Arc::new(broker.clone()));

    let exec = match trace_header {
        Some(header) => ExecutionContext::new(Some(header)),
        None => ExecutionContext::from_env(),
    };
    let report = handler.handle(&mut event, &exec).await?;

    print_report(&report);
    println!("event: {}", serde_json::Value::Object(event));
    Ok(())
}

async fn simulate(config: &RelayConfig, ticks: u64, interval_ms: u64) -> anyhow::Result<()> {
    if interval_ms == 0 {
        bail!("--interval-ms must be positive");
    }

    let runtime = LocalRuntime::with_defaults(config)?;
    let terminal = runtime.topology().terminal().name.clone();
    println!("{}\n", runtime.topology().execution_plan());

    let handle = runtime.start()?;
    let trigger = ScheduleTrigger::new(Duration::from_millis(interval_ms)).with_max_ticks(ticks);
    let wait = config.backend_timeout() * 4 + retry_budget(config);
    let completed = AtomicU64::new(0);

    trigger
        .run(|tick, event| {
            let (handle, terminal, completed) = (&handle, &terminal, &completed);
            async move {
                // failures also land on the outcome stream
                let _ = handle.inject(event).await;

                let outcomes = match tokio::time::timeout(wait, handle.wait_for(terminal)).await {
                    Ok(outcomes) => outcomes,
                    Err(_) => {
                        println!("tick {}: no {} invocation within {:?}", tick, terminal, wait);
                        return;
                    }
                };

                println!("tick {}:", tick);
                for outcome in &outcomes {
                    match &outcome.result {
                        Ok(report) => print_report(report),
                        Err(e) => println!(
                            "  {} failed after {} attempt(s): {}",
                            outcome.node, outcome.attempts, e
                        ),
                    }
                }
                if outcomes.last().is_some_and(|o| o.node == *terminal && o.is_success()) {
                    completed.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
        .await;

    let leftovers = handle.shutdown().await;
    let completed = completed.into_inner();
    println!(
        "\n{} of {} traversal(s) reached {}, {} late outcome(s)",
        completed,
        ticks,
        terminal,
        leftovers.len()
    );
    if completed < ticks {
        bail!("{} traversal(s) did not reach {}", ticks - completed, terminal);
    }
    Ok(())
}

fn retry_budget(config: &RelayConfig) -> Duration {
    let policy = config.rule_retry_policy();
    (0..policy.retry_attempts)
        .map(|retry| policy.backoff_for(retry) + config.backend_timeout())
        .sum()
}

fn print_report(report: &HopReport) {
    let outcome = match &report.dispatch {
        Some(DispatchResult::Accepted {
            backend,
            message_id,
        }) => format!(
            "forwarded to {} ({})",
            backend,
            message_id.as_deref().unwrap_or("-")
        ),
        Some(DispatchResult::Failed { backend, reason }) => {
            format!("dispatch to {} failed: {}", backend, reason)
        }
        None => "end of the road".to_string(),
    };
    println!(
        "  [{}] {} {}: {} in {}ms",
        report.stage,
        report.tracking_id,
        report.action.name(),
        outcome,
        (report.finished_at - report.started_at).num_milliseconds()
    );
}
