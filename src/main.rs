//! toolgate - command-line batch runner

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use serde_json::Value;
use toolgate::cli::{Args, Settings};
use toolgate::tools::builtin::register_builtins;
use toolgate::tools::{AutoApprove, AutoDeny, ToolStats};
use toolgate::{Dispatcher, Event, EventType, ToolCall, ToolRegistry};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let verbosity = args.verbosity();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    let contents = std::fs::read_to_string(&args.calls)
        .with_context(|| format!("Failed to read {}", args.calls.display()))?;
    let calls: Vec<ToolCall> =
        serde_json::from_str(&contents).context("Failed to parse tool calls")?;

    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry)?;

    // Neither flag: gated calls are denied for lack of a decision function
    let mut approval = settings.approval_config();
    if args.approve {
        approval = approval.with_handler(AutoApprove);
    } else if args.deny {
        approval = approval.with_handler(AutoDeny);
    }

    let config = settings.dispatch_config(registry).with_approval(approval);
    let (emitter, mut stream) = settings.event_channel();
    let dispatcher = Dispatcher::new(config, emitter);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling batch");
                cancel.cancel();
            }
        });
    }

    let show_events = verbosity.show_events();
    let printer = tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            if show_events {
                print_event(&event);
            }
        }
    });

    let results = dispatcher.execute(&cancel, &calls).await;
    let stats = dispatcher.stats();

    // Last emitter goes with the dispatcher; the printer then drains and exits
    drop(dispatcher);
    printer.await.context("event printer failed")?;

    println!("{}", serde_json::to_string_pretty(&results)?);
    if show_events {
        print_summary(&stats);
    }

    Ok(())
}

fn print_event(event: &Event) {
    let tool = event.tool_name().unwrap_or("?");
    let call_id = event.call_id().unwrap_or("?");
    let tag = format!("[{}]", event.event_type);
    let tag = match event.event_type {
        EventType::ExecutionSuccess | EventType::ApprovalGranted => tag.green(),
        EventType::ExecutionError | EventType::ToolNotFound => tag.red(),
        EventType::ApprovalDenied => tag.yellow(),
        EventType::ApprovalRequested | EventType::ExecutionStarted => tag.cyan(),
    };

    let detail = ["reason", "error"]
        .iter()
        .find_map(|key| event.get(key).and_then(Value::as_str))
        .map(|text| format!(" - {}", text))
        .unwrap_or_default();

    eprintln!(
        "{} {} {} ({}){}",
        event.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
        tag,
        tool.bold(),
        call_id,
        detail
    );
}

fn print_summary(stats: &ToolStats) {
    eprintln!();
    eprintln!("📊 Batch Summary");
    eprintln!("─────────────────────────────────────");
    eprintln!("Executed:          {}", stats.total_executions);
    eprintln!("Success rate:      {:.1}%", stats.success_rate() * 100.0);
    eprintln!("Retries:           {}", stats.retry_attempts);
    eprintln!("Denied:            {}", stats.denied);
    eprintln!("Not found:         {}", stats.not_found);
    eprintln!("Peak concurrency:  {}", stats.peak_in_flight);
}
