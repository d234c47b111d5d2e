use anyhow::Result;
use clap::Parser;
use itertools::Itertools;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tablechat::config::AppConfig;
use tablechat::events::{EventSink, PipelineEvent, Stage, TurnState};
use tablechat::execution::{PolarsWarehouse, ResultSet, SnowflakeWarehouse, Warehouse};
use tablechat::history::{self, FileHistoryStore, HistoryStore, InteractionLog, PgHistoryStore};
use tablechat::llm::LlmClient;
use tablechat::orchestrator::{ChartStatus, Orchestrator, TurnOutcome, TurnReport};
use tablechat::session::SessionRegistry;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Rows printed per result table
const DISPLAY_ROWS: usize = 50;

#[derive(Parser)]
#[command(name = "tablechat")]
#[command(about = "Ask questions about a warehouse table in plain language")]
struct Args {
    /// JSON configuration file (env vars still override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session id to resume (default: a new session)
    #[arg(short, long)]
    session: Option<String>,

    /// Query local CSV/Parquet files in this directory instead of Snowflake
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Answer a single question and exit
    #[arg(short, long)]
    ask: Option<String>,

    /// Directory for history files and interaction snapshots
    #[arg(long)]
    history_dir: Option<PathBuf>,

    /// Directory for rendered Vega-Lite charts
    #[arg(long, default_value = "charts")]
    charts_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tablechat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(dir) = &args.history_dir {
        config.history.dir = dir.clone();
    }
    config.validate(true)?;

    let warehouse: Arc<dyn Warehouse> = match &args.data_dir {
        Some(dir) => Arc::new(PolarsWarehouse::open(dir)?),
        None => Arc::new(SnowflakeWarehouse::new(config.warehouse.clone())?),
    };
    let llm = Arc::new(LlmClient::new(&config.llm)?);

    let store: Arc<dyn HistoryStore> = match &config.history.database_url {
        Some(url) => match PgHistoryStore::connect(url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!("Postgres history unavailable ({}), using files", e);
                Arc::new(FileHistoryStore::new(&config.history.dir))
            }
        },
        None => Arc::new(FileHistoryStore::new(&config.history.dir)),
    };

    let (events, rx) = EventSink::channel();
    tokio::spawn(print_events(rx));

    let mut orchestrator =
        Orchestrator::new(llm, warehouse, &config.pipeline, events).with_history(store.clone());
    if config.history.interaction_log {
        orchestrator = orchestrator.with_interaction_log(InteractionLog::new(&config.history.dir));
    }

    let session_id = args.session.unwrap_or_else(|| Uuid::new_v4().to_string());
    let registry = SessionRegistry::new();
    registry.insert(history::load_session(store.as_ref(), &session_id).await);
    info!("Session {} ready", session_id);

    if let Some(question) = args.ask {
        answer(&orchestrator, &registry, &session_id, &question, &args.charts_dir).await?;
        return Ok(());
    }

    println!("tablechat session {} (type 'exit' to quit)", session_id);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        answer(&orchestrator, &registry, &session_id, line, &args.charts_dir).await?;
    }

    Ok(())
}

async fn answer(
    orchestrator: &Orchestrator,
    registry: &SessionRegistry,
    session_id: &str,
    question: &str,
    charts_dir: &Path,
) -> Result<()> {
    let mut session = match registry.acquire(session_id) {
        Ok(session) => session,
        Err(e) => {
            println!("{}", e.user_message());
            return Ok(());
        }
    };

    match orchestrator.handle_turn(&mut session, question).await {
        Ok(report) => print_report(&report, charts_dir)?,
        Err(e) => println!("\n{}", e.user_message()),
    }
    Ok(())
}

fn print_report(report: &TurnReport, charts_dir: &Path) -> Result<()> {
    match &report.outcome {
        // already streamed
        TurnOutcome::Simple { .. } => println!(),
        TurnOutcome::Answered {
            results,
            chart,
            attempts,
        } => {
            println!();
            for result in results {
                println!("{}\n", result.candidate.sql());
                print_table(&result.result_set);
            }
            if *attempts > 1 {
                println!("(answered on attempt {})", attempts);
            }

            match chart {
                ChartStatus::NotRequested => {}
                ChartStatus::Rendered(artifact) => {
                    std::fs::create_dir_all(charts_dir)?;
                    let path = charts_dir.join(format!("{}.vl.json", report.turn_id));
                    std::fs::write(&path, serde_json::to_vec_pretty(&artifact.vega_lite)?)?;
                    println!("Chart \"{}\" written to {}", artifact.title, path.display());
                }
                ChartStatus::Unavailable(reason) => println!("Chart unavailable: {}", reason),
            }
        }
    }
    Ok(())
}

fn print_table(result: &ResultSet) {
    println!("{}", result.columns.iter().join(" | "));
    for row in result.rows.iter().take(DISPLAY_ROWS) {
        println!(
            "{}",
            row.values()
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .join(" | ")
        );
    }
    if result.len() > DISPLAY_ROWS {
        println!("... {} more rows", result.len() - DISPLAY_ROWS);
    }
    println!("({} rows)\n", result.len());
}

async fn print_events(mut rx: UnboundedReceiver<PipelineEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::TextDelta {
                stage: Stage::SimpleAnswer,
                delta,
            } => {
                print!("{}", delta);
                let _ = std::io::stdout().flush();
            }
            PipelineEvent::State(TurnState::Querying { attempt }) if attempt > 1 => {
                eprintln!("retrying (attempt {})...", attempt);
            }
            PipelineEvent::AttemptFailed { attempt, class, .. } => {
                eprintln!("attempt {} failed: {}", attempt, class);
            }
            _ => {}
        }
    }
}
