use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alerting::{AlertPipeline, ManualClock, SystemClock};
use alertd::{
    replay_lines, DaemonConfig, JsonlEventSource, JsonlSink, LogSink, NotificationSink, Runner,
    SourceRecord, WebhookSink,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Alert policy TOML (default: built-in policy plus ALERT_* overrides)
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the events file and emit notifications until interrupted
    Run {
        /// JSONL file of classified events
        #[arg(long)]
        events: Option<PathBuf>,

        /// Dedup store snapshot, restored at start and written every tick
        #[arg(long)]
        state: Option<PathBuf>,

        /// Event cursor file
        #[arg(long)]
        cursor: Option<PathBuf>,

        /// Append emitted notifications to this JSONL file
        #[arg(long)]
        decisions: Option<PathBuf>,

        /// POST emitted notifications to this URL
        #[arg(long)]
        webhook_url: Option<String>,

        /// Rewrite daily statistics rows to this JSON file every poll
        #[arg(long)]
        daily: Option<PathBuf>,

        /// Days of daily statistics to keep
        #[arg(long)]
        daily_retention_days: Option<u64>,

        /// Seconds between polls
        #[arg(long)]
        interval_secs: Option<u64>,

        /// Also accept events as JSON lines on stdin
        #[arg(long, default_value_t = false)]
        stdin: bool,
    },

    /// Re-feed a JSONL file using each event's own timestamp as the clock
    Replay {
        file: PathBuf,

        /// Write the resulting store snapshot here
        #[arg(long)]
        state_out: Option<PathBuf>,

        /// Append emitted notifications to this JSONL file
        #[arg(long)]
        decisions: Option<PathBuf>,
    },

    /// Validate the policy and print it with overrides applied
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = DaemonConfig::default();
    if let Some(policy) = cli.policy {
        config.policy_path = Some(policy);
    }

    match cli.command {
        Command::Run {
            events,
            state,
            cursor,
            decisions,
            webhook_url,
            daily,
            daily_retention_days,
            interval_secs,
            stdin,
        } => {
            if let Some(events) = events {
                if cursor.is_none() {
                    config.cursor_path = events.with_extension("cursor");
                }
                config.events_path = events;
            }
            if let Some(cursor) = cursor {
                config.cursor_path = cursor;
            }
            if let Some(state) = state {
                config.state_path = state;
            }
            if decisions.is_some() {
                config.decisions_path = decisions;
            }
            if webhook_url.is_some() {
                config.webhook_url = webhook_url;
            }
            if daily.is_some() {
                config.daily_path = daily;
            }
            if let Some(days) = daily_retention_days.filter(|d| *d > 0) {
                config.daily_retention_days = days;
            }
            if let Some(secs) = interval_secs.filter(|s| *s > 0) {
                config.poll_interval = Duration::from_secs(secs);
            }
            config.stdin_injection = stdin;
            run(config).await
        }
        Command::Replay {
            file,
            state_out,
            decisions,
        } => replay(&config, file, state_out, decisions).await,
        Command::CheckConfig => {
            let policy = config.load_policy().context("Alert policy is invalid")?;
            print!("{}", toml::to_string_pretty(&policy)?);
            Ok(())
        }
    }
}

async fn run(config: DaemonConfig) -> Result<()> {
    let policy = config.load_policy().context("Alert policy is invalid")?;
    let pipeline = AlertPipeline::restore(policy, &config.state_path, Arc::new(SystemClock))
        .context("Failed to restore alert state")?;
    info!(
        events = %config.events_path.display(),
        state = %config.state_path.display(),
        live_groups = pipeline.live_groups()?,
        "alertd starting"
    );

    let mut runner = Runner::new(Arc::new(pipeline), config.poll_interval)
        .with_state_path(&config.state_path)
        .with_daily_retention(config.daily_retention_days)
        .with_sink(Arc::new(LogSink));
    if let Some(path) = &config.daily_path {
        runner = runner.with_daily_path(path);
    }
    if let Some(path) = &config.decisions_path {
        runner = runner.with_sink(Arc::new(JsonlSink::new(path)));
    }
    if let Some(url) = &config.webhook_url {
        runner = runner.with_sink(Arc::new(WebhookSink::new(url)?));
    }

    let source = JsonlEventSource::with_cursor_file(&config.events_path, &config.cursor_path)
        .await
        .context("Failed to open event cursor")?;

    let (tx, rx) = mpsc::channel(64);
    if config.stdin_injection {
        tokio::spawn(read_stdin(tx));
    } else {
        drop(tx);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {e}");
            return;
        }
        info!("Shutdown requested");
        on_signal.cancel();
    });

    runner.run(Box::new(source), rx, cancel).await?;
    Ok(())
}

/// Forward JSON lines from stdin as manually injected records.
async fn read_stdin(tx: mpsc::Sender<SourceRecord>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                let record = SourceRecord::from_json_line(&line, format!("stdin:{line_no}"));
                if tx.send(record).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {e}");
                break;
            }
        }
    }
}

async fn replay(
    config: &DaemonConfig,
    file: PathBuf,
    state_out: Option<PathBuf>,
    decisions: Option<PathBuf>,
) -> Result<()> {
    let policy = config.load_policy().context("Alert policy is invalid")?;
    let clock = Arc::new(ManualClock::at_epoch());
    let pipeline = AlertPipeline::new(policy, clock.clone())?;
    let sink = decisions.map(JsonlSink::new);

    let text = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let report = replay_lines(
        &pipeline,
        &clock,
        &file.display().to_string(),
        &text,
        sink.as_ref().map(|s| s as &dyn NotificationSink),
    )
    .await?;

    if let Some(path) = &state_out {
        pipeline.save_snapshot(path)?;
    }

    let summary = serde_json::json!({
        "report": report,
        "gate": pipeline.gate_stats(),
        "live_groups": pipeline.live_groups()?,
        "daily": pipeline.daily_rows()?,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
