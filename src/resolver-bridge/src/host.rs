//! Exec-based dispatcher: runs a plugin as a child process and speaks the
//! line-delimited JSON protocol over its stdio.

use crate::dispatcher::{Job, JobCallback, JobDispatcher, JobError};
use crate::manifest::ResolverIdentity;
use crate::protocol::{parse_message, PluginMessage, PluginRequest, PluginSignal};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Errors from plugin host operations.
#[derive(Debug, Error)]
pub enum PluginHostError {
    #[error("failed to spawn plugin process {executable}: {source}")]
    SpawnFailed {
        executable: PathBuf,
        source: std::io::Error,
    },
    #[error("plugin process has no stdin")]
    NoStdin,
    #[error("plugin process has no stdout")]
    NoStdout,
}

/// How to launch an external plugin.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Path to the plugin executable.
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl PluginConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Run the manifest's main entry from inside the plugin's content dir.
    pub fn for_identity(identity: &ResolverIdentity) -> Self {
        let content_dir = identity.content_dir();
        Self {
            executable: content_dir.join(&identity.manifest.manifest.main),
            args: Vec::new(),
            working_dir: Some(content_dir),
            env: vec![(
                "RESOLVER_ID".to_string(),
                identity.id.as_str().to_string(),
            )],
        }
    }
}

#[derive(Default)]
struct HostState {
    pending: HashMap<u64, JobCallback>,
    closed: bool,
}

type SharedState = Arc<Mutex<HostState>>;

fn lock(state: &SharedState) -> std::sync::MutexGuard<'_, HostState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`JobDispatcher`] backed by a child process.
///
/// Requests are written by a background writer task; a reader task routes
/// responses to callbacks by id and forwards plugin-initiated calls as
/// [`PluginSignal`]s. When the process exits every outstanding call fails
/// with [`JobError::Terminated`], as does every later call.
pub struct ExecDispatcher {
    outgoing: mpsc::UnboundedSender<PluginRequest>,
    state: SharedState,
    next_id: AtomicU64,
    child: Mutex<Option<Child>>,
}

impl ExecDispatcher {
    /// Spawn the plugin. Must be called within a tokio runtime.
    pub fn spawn(
        config: &PluginConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PluginSignal>), PluginHostError> {
        let mut cmd = Command::new(&config.executable);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| PluginHostError::SpawnFailed {
            executable: config.executable.clone(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or(PluginHostError::NoStdin)?;
        let stdout = child.stdout.take().ok_or(PluginHostError::NoStdout)?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(stderr_loop(stderr));
        }
        tracing::info!(
            executable = %config.executable.display(),
            pid = child.id(),
            "plugin process started"
        );

        let (dispatcher, signals) = Self::from_io(stdin, stdout);
        *dispatcher
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(child);
        Ok((dispatcher, signals))
    }

    /// Speak the protocol over arbitrary streams.
    pub fn from_io<W, R>(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<PluginSignal>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (outgoing, requests) = mpsc::unbounded_channel();
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let state = SharedState::default();

        tokio::spawn(writer_loop(writer, requests, Arc::clone(&state)));
        tokio::spawn(reader_loop(reader, Arc::clone(&state), signals_tx));

        let dispatcher = Self {
            outgoing,
            state,
            next_id: AtomicU64::new(1),
            child: Mutex::new(None),
        };
        (dispatcher, signals)
    }

    /// Whether the plugin can still accept calls.
    pub fn is_running(&self) -> bool {
        !lock(&self.state).closed
    }

    /// Kill the plugin process. Outstanding calls fail once its stdout closes.
    pub fn shutdown(&self) {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(child) = child.as_mut() {
            if let Err(err) = child.start_kill() {
                tracing::debug!(error = %err, "plugin process already gone");
            }
        }
    }
}

impl JobDispatcher for ExecDispatcher {
    fn invoke(&self, job: Job, on_complete: Option<JobCallback>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = PluginRequest::from_job(id, job);

        if let Some(callback) = on_complete {
            let mut state = lock(&self.state);
            if state.closed {
                drop(state);
                callback(Err(JobError::Terminated));
                return;
            }
            state.pending.insert(id, callback);
        }

        tracing::trace!(id, method = %request.method, "sending plugin request");
        if self.outgoing.send(request).is_err() {
            fail_pending(&self.state, id, JobError::Terminated);
        }
    }
}

fn fail_pending(state: &SharedState, id: u64, error: JobError) {
    let callback = lock(state).pending.remove(&id);
    if let Some(callback) = callback {
        callback(Err(error));
    }
}

async fn writer_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut requests: mpsc::UnboundedReceiver<PluginRequest>,
    state: SharedState,
) {
    while let Some(request) = requests.recv().await {
        let id = request.id;
        let mut line = match serde_json::to_string(&request) {
            Ok(line) => line,
            Err(err) => {
                fail_pending(&state, id, JobError::Transport(err.to_string()));
                continue;
            }
        };
        line.push('\n');

        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = written {
            tracing::warn!(id, error = %err, "failed to write to plugin");
            fail_pending(&state, id, JobError::Transport(err.to_string()));
            break;
        }
    }
}

async fn reader_loop<R: AsyncRead + Unpin>(
    reader: R,
    state: SharedState,
    signals: mpsc::UnboundedSender<PluginSignal>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read from plugin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_message(&line) {
            Ok(PluginMessage::Response(response)) => {
                let callback = lock(&state).pending.remove(&response.id);
                match callback {
                    Some(callback) => callback(response.into_outcome()),
                    None => tracing::debug!(id = response.id, "reply to a call without callback"),
                }
            }
            Ok(PluginMessage::Notification(notification)) => match notification.into_signal() {
                Ok(signal) => {
                    let _ = signals.send(signal);
                }
                Err(err) => tracing::warn!(error = %err, "ignoring plugin notification"),
            },
            Err(err) => tracing::warn!(error = %err, "ignoring plugin output"),
        }
    }

    let orphaned: Vec<JobCallback> = {
        let mut state = lock(&state);
        state.closed = true;
        state.pending.drain().map(|(_, callback)| callback).collect()
    };
    tracing::info!(pending = orphaned.len(), "plugin output closed");
    for callback in orphaned {
        callback(Err(JobError::Terminated));
    }
}

async fn stderr_loop<R: AsyncRead + Unpin>(stderr: R) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "resolver_bridge::plugin", "{line}");
    }
}
