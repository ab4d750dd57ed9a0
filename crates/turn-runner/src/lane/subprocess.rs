//! Subprocess lane: runs an agent CLI as a local child process

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Canceller, LaneContext, LaneSubscription};
use crate::error::{Result, RunnerError};
use crate::event::{LaneEvent, OutputStream};
use crate::process_tree::ProcessTreeKiller;
use crate::request::Provider;

/// Markers that make an agent CLI believe it is nested inside another agent
const NESTED_AGENT_MARKERS: &[&str] = &["CLAUDECODE", "CLAUDE_CODE_ENTRYPOINT"];

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// How long the pipes may keep draining after the agent itself has exited.
/// Backgrounded helpers can hold stdout open indefinitely.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Build the command line for a provider's CLI
pub fn build_argv(
    provider: &Provider,
    model: Option<&str>,
    reasoning_level: Option<&str>,
    default_binary: &str,
) -> Vec<String> {
    let mut argv: Vec<String> = Vec::new();

    match provider {
        Provider::Codex => {
            extend(
                &mut argv,
                &[
                    "codex",
                    "exec",
                    "--json",
                    "--skip-git-repo-check",
                    "--dangerously-bypass-approvals-and-sandbox",
                ],
            );
            if let Some(model) = model {
                extend(&mut argv, &["-m", model]);
            }
            if let Some(level) = reasoning_level {
                let effort = format!("model_reasoning_effort=\"{}\"", level);
                extend(&mut argv, &["-c", effort.as_str()]);
            }
            // Prompt arrives on stdin.
            extend(&mut argv, &["-"]);
        }
        Provider::Gemini => {
            extend(&mut argv, &["gemini", "--yolo", "--output-format=stream-json"]);
            if let Some(model) = model {
                extend(&mut argv, &["-m", model]);
            }
        }
        Provider::Opencode => {
            extend(&mut argv, &["opencode", "run", "--format", "json"]);
            if let Some(model) = model {
                extend(&mut argv, &["-m", model]);
            }
        }
        Provider::Claude => {
            extend(&mut argv, &["claude"]);
            push_claude_flags(&mut argv, model);
        }
        Provider::Copilot | Provider::Antigravity | Provider::Api | Provider::Other(_) => {
            extend(&mut argv, &[default_binary]);
            push_claude_flags(&mut argv, model);
        }
    }

    argv
}

fn push_claude_flags(argv: &mut Vec<String>, model: Option<&str>) {
    extend(
        argv,
        &[
            "--print",
            "--verbose",
            "--output-format=stream-json",
            "--include-partial-messages",
            "--dangerously-skip-permissions",
        ],
    );
    if let Some(model) = model {
        extend(argv, &["--model", model]);
    }
}

fn extend(argv: &mut Vec<String>, items: &[&str]) {
    argv.extend(items.iter().map(|s| s.to_string()));
}

/// Environment for a spawned agent: nested-agent markers removed, color and
/// interactivity disabled, fallback PATH entries appended.
pub fn sanitized_env(
    base: impl IntoIterator<Item = (OsString, OsString)>,
    fallback_path: &[PathBuf],
) -> HashMap<OsString, OsString> {
    let mut env: HashMap<OsString, OsString> = base
        .into_iter()
        .filter(|(key, _)| {
            !NESTED_AGENT_MARKERS
                .iter()
                .any(|marker| key.as_os_str() == *marker)
        })
        .collect();

    for (key, value) in [
        ("NO_COLOR", "1"),
        ("FORCE_COLOR", "0"),
        ("CI", "1"),
        ("TERM", "dumb"),
    ] {
        env.insert(key.into(), value.into());
    }

    let mut paths: Vec<PathBuf> = env
        .get(&OsString::from("PATH"))
        .map(|p| std::env::split_paths(p).collect())
        .unwrap_or_default();
    for extra in fallback_path {
        if !paths.contains(extra) {
            paths.push(extra.clone());
        }
    }
    match std::env::join_paths(&paths) {
        Ok(joined) => {
            env.insert("PATH".into(), joined);
        }
        Err(e) => warn!("Could not extend PATH for agent process: {}", e),
    }

    env
}

/// Local child-process lane
pub struct SubprocessLane {
    provider: Provider,
    argv: Vec<String>,
    env: HashMap<OsString, OsString>,
    killer: Arc<dyn ProcessTreeKiller>,
}

impl SubprocessLane {
    pub fn new(
        provider: Provider,
        argv: Vec<String>,
        env: HashMap<OsString, OsString>,
        killer: Arc<dyn ProcessTreeKiller>,
    ) -> Self {
        Self {
            provider,
            argv,
            env,
            killer,
        }
    }

    fn command(&self) -> Result<Command> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| RunnerError::spawn_failed("empty command line"))?;

        let cmd = if cfg!(target_os = "windows") && program.ends_with(".cmd") {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(program).args(args);
            c
        } else {
            let mut c = Command::new(program);
            c.args(args);
            c
        };
        Ok(cmd)
    }

    pub(crate) async fn start(self, ctx: LaneContext) -> Result<LaneSubscription> {
        let mut cmd = self.command()?;

        info!(
            "Spawning {} for {} in {:?}",
            self.argv.join(" "),
            self.provider,
            ctx.cwd
        );

        cmd.current_dir(&ctx.cwd)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            RunnerError::spawn_failed_with_source(
                format!("Failed to spawn {}: {}", self.argv[0], e),
                e,
            )
        })?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RunnerError::spawn_failed("Failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::spawn_failed("Failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::spawn_failed("Failed to capture stderr"))?;

        let (tx, rx) = mpsc::unbounded_channel();

        let prompt = ctx.prompt;
        let stdin_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                debug!("Failed to write prompt to agent stdin: {}", e);
            }
            // Dropping stdin closes it so the agent sees EOF.
            let _ = stdin.shutdown().await;
        });

        let mut stdout_handle = tokio::spawn(pump(stdout, OutputStream::Stdout, tx.clone()));
        let mut stderr_handle = tokio::spawn(pump(stderr, OutputStream::Stderr, tx.clone()));

        let mut tasks = vec![
            stdin_handle.abort_handle(),
            stdout_handle.abort_handle(),
            stderr_handle.abort_handle(),
        ];

        let wait_handle = tokio::spawn(async move {
            let status = child.wait().await;

            // Readers drain whatever is left in the pipes before completion.
            let drained = tokio::time::timeout(PIPE_DRAIN_GRACE, async {
                let _ = (&mut stdout_handle).await;
                let _ = (&mut stderr_handle).await;
            })
            .await;
            if drained.is_err() {
                debug!("Agent exited but its pipes are still open, completing anyway");
                stdout_handle.abort();
                stderr_handle.abort();
            }

            let event = match status {
                Ok(status) => LaneEvent::Completed {
                    exit_code: status.code().unwrap_or(-1),
                },
                Err(e) => LaneEvent::error(format!("Failed to wait for agent process: {}", e)),
            };
            let _ = tx.send(event);
        });
        tasks.push(wait_handle.abort_handle());

        Ok(LaneSubscription::new(
            rx,
            Canceller::ProcessTree {
                pid,
                killer: self.killer,
                killed: AtomicBool::new(false),
                token: ctx.cancel,
            },
            tasks,
        ))
    }
}

/// Forward raw output chunks from one pipe until EOF
async fn pump<R>(mut reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<LaneEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut decoder = Utf8Decoder::default();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = decoder.decode(&buf[..n]);
                if chunk.is_empty() {
                    continue;
                }
                if tx.send(LaneEvent::Data { stream, chunk }).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("{} read failed: {}", stream.as_str(), e);
                break;
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = tx.send(LaneEvent::Data {
            stream,
            chunk: rest,
        });
    }
}

/// Lossy UTF-8 decoding that carries incomplete sequences to the next read
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let keep = incomplete_tail_len(&self.pending);
        let ready = self.pending.len() - keep;
        let text = String::from_utf8_lossy(&self.pending[..ready]).into_owned();
        self.pending.drain(..ready);
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of a truncated multi-byte sequence at the end of `bytes`
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}
