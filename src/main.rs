use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cloudgraph::config::{validate_subscription_id, IntegrationConfig};
use cloudgraph::graph::{GraphSnapshot, InMemoryJobState, JobState};
use cloudgraph::provider::ProviderClient;
use cloudgraph::steps::{
    compute_start_states, default_handlers, ExecutionReport, Scheduler, StepCatalog,
};
use cloudgraph::VERSION;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Ingest a cloud account's control plane into one property graph
#[derive(Parser, Debug)]
#[command(name = "cloudgraph", version = VERSION, about, long_about = None)]
struct Args {
    /// Config file (JSON or YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subscription to ingest
    #[arg(short, long, global = true)]
    subscription_id: Option<String>,

    /// Ingest directory users, groups and service principals
    #[arg(long, global = true)]
    ingest_active_directory: bool,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List catalog steps in execution order
    Steps,
    /// Print the start state of every step
    Plan,
    /// Run enabled steps and write the graph
    Run {
        /// Output file for the graph and execution report
        #[arg(short, long, default_value = "cloudgraph-output.json")]
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    // RUST_LOG narrows further, e.g. RUST_LOG=cloudgraph::provider=trace
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing_level.as_str().to_ascii_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudgraph {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("cloudgraph").join("cloudgraph.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cloudgraph").join("cloudgraph.log");
    }
    PathBuf::from("cloudgraph.log")
}

/// Config file, then environment, then flags
fn load_config(args: &Args) -> Result<IntegrationConfig> {
    let mut config = IntegrationConfig::load(args.config.as_deref())?;
    config.apply_env();

    if let Some(subscription_id) = &args.subscription_id {
        if !validate_subscription_id(subscription_id) {
            anyhow::bail!("--subscription-id '{}' is not a valid id", subscription_id);
        }
        config.subscription_id = Some(subscription_id.clone());
    }
    if args.ingest_active_directory {
        config.ingest_active_directory = true;
    }

    Ok(config)
}

#[derive(Serialize)]
struct RunOutput {
    report: ExecutionReport,
    graph: GraphSnapshot,
}

async fn run(config: IntegrationConfig, output: PathBuf) -> Result<()> {
    let catalog = StepCatalog::embedded();
    let start_states = compute_start_states(&config, catalog);

    let client = Arc::new(ProviderClient::new(&config)?);
    let handlers = default_handlers(client, catalog);
    let job_state = Arc::new(InMemoryJobState::new());

    let report = Scheduler::run(
        catalog,
        &start_states,
        &handlers,
        Arc::new(config),
        job_state.clone(),
    )
    .await?;

    let graph = job_state.snapshot();
    eprintln!(
        "{} entities, {} relationships",
        graph.entities.len(),
        graph.relationships.len()
    );
    for step in &report.steps {
        eprintln!("  {:<32} {:?}", step.id, step.status);
    }

    let failed = report.failed_steps().len();
    let json = serde_json::to_string_pretty(&RunOutput { report, graph })?;
    std::fs::write(&output, json)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    eprintln!("Wrote {}", output.display());

    if failed > 0 {
        anyhow::bail!("{} step(s) failed", failed);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let config = load_config(&args)?;

    match args.command {
        Command::Steps => {
            for step in StepCatalog::embedded().execution_order()? {
                let source = step.ingestion_source_id.as_deref().unwrap_or("-");
                println!("{:<32} {:<20} {}", step.id, source, step.depends_on.join(", "));
            }
        }
        Command::Plan => {
            let states = compute_start_states(&config, StepCatalog::embedded());
            println!("{}", serde_json::to_string_pretty(&states)?);
        }
        Command::Run { output } => run(config, output).await?,
    }

    Ok(())
}
