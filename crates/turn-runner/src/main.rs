//! turn-runner CLI
//!
//! Runs one agent turn and prints the result as JSON on stdout.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use turn_runner::{
    env_flag, AgentIdentity, BroadcastEvent, ChannelBroadcast, Language, Provider, RunController,
    RunOptions, RunRequest, RunnerConfig, CLI_OUTPUT_EVENT,
};

#[derive(Debug, Parser)]
#[command(name = "turn-runner", version, about = "Run one agent turn and print the result")]
struct Args {
    /// Agent provider (claude, codex, gemini, opencode, ...)
    #[arg(long, default_value = "claude")]
    provider: String,

    /// Agent ID, used to name the run log
    #[arg(long, default_value = "cli")]
    agent_id: String,

    #[arg(long)]
    model: Option<String>,

    /// Reasoning effort passed to providers that support it
    #[arg(long)]
    reasoning: Option<String>,

    /// Working directory for the agent
    #[arg(long, default_value = ".")]
    project_path: PathBuf,

    /// Wall-clock budget; defaults to TURN_RUNNER_TIMEOUT_MS
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print the captured output instead of a short reply
    #[arg(long)]
    raw: bool,

    /// Stop the agent as soon as it tries to use a tool
    #[arg(long)]
    no_tools: bool,

    /// Acknowledgment language (en, ja, zh, ko)
    #[arg(long)]
    lang: Option<String>,

    /// Task ID attached to streamed output
    #[arg(long)]
    task_id: Option<String>,

    /// Prompt text; read from stdin when omitted
    prompt: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turn_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let prompt = match args.prompt {
        Some(prompt) => prompt,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read prompt from stdin")?;
            buf
        }
    };
    if prompt.trim().is_empty() {
        bail!("prompt is empty");
    }

    let config = RunnerConfig::from_env();
    tracing::debug!("Using log directory: {:?}", config.log_dir);

    let mut agent = AgentIdentity::new(args.agent_id, Provider::parse(&args.provider));
    agent.model = args.model;
    agent.reasoning_level = args.reasoning;

    let mirror_stderr = env_flag("TURN_RUNNER_BROADCAST_STDERR", false);
    let task_id = match args.task_id {
        Some(id) => Some(id),
        None if mirror_stderr => Some(agent.id.clone()),
        None => None,
    };

    let options = RunOptions {
        project_path: args.project_path,
        timeout_ms: args.timeout_ms.unwrap_or(config.default_timeout_ms),
        stream_task_id: task_id,
        raw_output: args.raw,
        no_tools: args.no_tools,
        language: args.lang.as_deref().map(Language::parse),
    };
    let request = RunRequest::new(agent, prompt).with_options(options);

    let mut controller = RunController::new(config);

    // Mirror live output to stderr when asked
    let mut mirror = None;
    if mirror_stderr {
        let sink = Arc::new(ChannelBroadcast::new(256));
        let rx = sink.subscribe();
        mirror = Some(tokio::spawn(mirror_output(rx, std::io::stderr())));
        controller = controller.with_broadcaster(sink);
    }

    let result = controller.execute(&request).await;

    // The controller holds the only sender; dropping it lets the mirror drain and stop
    drop(controller);
    if let Some(mirror) = mirror {
        if let Err(e) = mirror.await {
            tracing::warn!("stderr mirror task failed: {}", e);
        }
    }

    println!(
        "{}",
        serde_json::to_string(&result).context("Failed to encode result")?
    );

    if result.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

/// Copy `cli_output` chunks to `out` until every sender is gone
async fn mirror_output<W: Write>(mut rx: broadcast::Receiver<BroadcastEvent>, mut out: W) -> W {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Dropped {} output chunks from stderr mirror", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if event.event != CLI_OUTPUT_EVENT {
            continue;
        }
        if let Some(data) = event.payload.get("data").and_then(|d| d.as_str()) {
            if out.write_all(data.as_bytes()).is_err() {
                break;
            }
        }
    }
    let _ = out.flush();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use turn_runner::BroadcastSink;

    #[tokio::test]
    async fn test_mirror_drains_everything_before_stopping() {
        let sink = ChannelBroadcast::new(16);
        let rx = sink.subscribe();

        for data in ["first ", "second ", "last"] {
            sink.broadcast(
                CLI_OUTPUT_EVENT,
                json!({"task_id": "t", "stream": "stdout", "data": data}),
            );
        }
        sink.broadcast("other_event", json!({"data": "ignored"}));
        drop(sink);

        let out = mirror_output(rx, Vec::new()).await;
        assert_eq!(String::from_utf8(out).unwrap(), "first second last");
    }
}
