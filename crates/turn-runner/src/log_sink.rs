//! Per-run log artifact
//!
//! Every run writes the chunks it observes to one file under the log
//! directory:
//! ```text
//! {log_dir}/
//!   {agent_id}-{yyyymmddHHMMSSmmm}-{suffix}.log
//! ```
//!
//! The sink can be closed from several failure paths racing each other. The
//! first close flushes and drops the file; every later close only runs its
//! callback, and every later write returns `false`.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};

type Writer = Box<dyn Write + Send>;

/// Callback invoked once per `close` call
pub type CloseCallback = Box<dyn FnOnce() + Send>;

struct SinkInner {
    path: Option<PathBuf>,
    writer: Mutex<Option<Writer>>,
    bytes_written: AtomicU64,
}

/// Idempotent-close wrapper around one append destination.
///
/// Cloning shares the same destination.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("path", &self.inner.path)
            .field("closed", &self.is_closed())
            .field("bytes_written", &self.bytes_written())
            .finish()
    }
}

impl LogSink {
    /// Create a new log file for `agent_id` under `log_dir`
    pub fn create(log_dir: impl AsRef<Path>, agent_id: &str) -> Result<Self> {
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)?;

        let path = log_dir.join(log_file_name(agent_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| RunnerError::LogOpen {
                path: path.clone(),
                source,
            })?;

        debug!("Opened run log {:?}", path);
        Ok(Self::new(Some(path), Box::new(BufWriter::new(file))))
    }

    /// Wrap an arbitrary writer
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self::new(None, Box::new(writer))
    }

    /// A sink that is already closed; every write is a no-op
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(SinkInner {
                path: None,
                writer: Mutex::new(None),
                bytes_written: AtomicU64::new(0),
            }),
        }
    }

    fn new(path: Option<PathBuf>, writer: Writer) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                path,
                writer: Mutex::new(Some(writer)),
                bytes_written: AtomicU64::new(0),
            }),
        }
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Total bytes successfully written so far
    pub fn bytes_written(&self) -> u64 {
        self.inner.bytes_written.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        match self.inner.writer.lock() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }

    /// Append `text`. Returns `false` if the sink is closed or the write failed;
    /// a failed write closes the sink.
    pub fn write(&self, text: &str) -> bool {
        let Ok(mut guard) = self.inner.writer.lock() else {
            return false;
        };
        let Some(writer) = guard.as_mut() else {
            return false;
        };

        match writer.write_all(text.as_bytes()).and_then(|_| writer.flush()) {
            Ok(()) => {
                self.inner
                    .bytes_written
                    .fetch_add(text.len() as u64, Ordering::SeqCst);
                true
            }
            Err(e) => {
                warn!("Run log write failed, closing sink: {}", e);
                *guard = None;
                false
            }
        }
    }

    /// Close the sink. Only the first call touches the destination; `on_done`
    /// runs on every call.
    pub fn close(&self, on_done: Option<CloseCallback>) {
        let writer = match self.inner.writer.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };

        if let Some(mut writer) = writer {
            if let Err(e) = writer.flush() {
                warn!("Failed to flush run log on close: {}", e);
            }
            drop(writer);
            debug!("Closed run log {:?}", self.inner.path);
        }

        if let Some(on_done) = on_done {
            on_done();
        }
    }

    /// Close and wait for the close callback
    pub async fn close_async(&self) {
        let (tx, rx) = oneshot::channel();
        self.close(Some(Box::new(move || {
            let _ = tx.send(());
        })));
        let _ = rx.await;
    }

    /// Read the log file back from disk
    pub fn read_back(&self) -> Option<String> {
        let path = self.inner.path.as_ref()?;
        match fs::read(path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!("Failed to read back run log {:?}: {}", path, e);
                None
            }
        }
    }
}

impl Drop for SinkInner {
    fn drop(&mut self) {
        if let Ok(guard) = self.writer.get_mut() {
            if let Some(mut writer) = guard.take() {
                let _ = writer.flush();
            }
        }
    }
}

/// `{agent_id}-{timestamp}-{suffix}.log`, with the agent ID reduced to file-safe characters
fn log_file_name(agent_id: &str) -> String {
    let safe_id: String = agent_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe_id = if safe_id.is_empty() {
        "agent".to_string()
    } else {
        safe_id
    };

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();

    format!(
        "{}-{}-{}.log",
        safe_id,
        Utc::now().format("%Y%m%d%H%M%S%3f"),
        suffix
    )
}

/// Helper so callers can open a sink without caring whether logging works
pub fn open_or_disabled(log_dir: &Path, agent_id: &str) -> LogSink {
    match LogSink::create(log_dir, agent_id) {
        Ok(sink) => sink,
        Err(e) => {
            warn!("Run log unavailable, continuing without it: {}", e);
            LogSink::disabled()
        }
    }
}
