use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use serde_json::Value;
use tokio::io::AsyncReadExt;

use xworkflow_function::{load_flow_file, DslFormat, FlowRunner, Message};

/// Run the function units of a flow over JSON-line input messages.
///
/// Unit events are written to stdout as JSON lines; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "xworkflow-function", version)]
struct Cli {
    /// Flow definition file (YAML, JSON or TOML)
    flow: PathBuf,

    /// Unit receiving the input messages; defaults to the first unit of the flow
    #[arg(long)]
    node: Option<String>,

    /// JSON-lines file of input messages; stdin when omitted
    #[arg(long)]
    input: Option<PathBuf>,

    /// Flow file format; inferred from the extension when omitted
    #[arg(long, value_enum)]
    format: Option<DslFormat>,

    /// Keep units alive this many milliseconds after the last input, for pending timers
    #[arg(long, default_value_t = 0)]
    linger_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let schema = load_flow_file(&cli.flow, cli.format)?;
    let mut runner = FlowRunner::builder(schema)
        .env_overrides(true)
        .deploy()
        .await?;

    let mut events = runner
        .take_events()
        .context("event channel already taken")?;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "cannot serialize unit event"),
            }
        }
    });

    let node = match cli.node {
        Some(node) => node,
        None => runner
            .unit_ids()
            .next()
            .map(str::to_string)
            .context("flow defines no units")?,
    };

    let input = match &cli.input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    for (index, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .with_context(|| format!("input line {} is not valid JSON", index + 1))?;
        let message = Message::from_value(value)
            .with_context(|| format!("input line {} is not a JSON object", index + 1))?;
        if let Err(e) = runner.receive(&node, message).await {
            tracing::error!(unit_id = %node, error = %e, "input rejected");
        }
    }

    if cli.linger_ms > 0 {
        tokio::time::sleep(Duration::from_millis(cli.linger_ms)).await;
    }

    for (unit_id, report) in runner.close_all().await? {
        tracing::debug!(
            unit_id = %unit_id,
            cancelled_timeouts = report.cancelled_timeouts,
            cancelled_intervals = report.cancelled_intervals,
            "unit torn down"
        );
    }
    drop(runner);

    // Every unit has stopped; drain whatever events are still queued.
    let _ = tokio::time::timeout(Duration::from_secs(2), printer).await;
    Ok(())
}
