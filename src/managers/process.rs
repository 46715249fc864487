use crate::constants::network::PIPE_DRAIN_GRACE_MS;
use crate::constants::shell::ENV_REMOTE_COMMAND;
use crate::errors::GateError;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;

/// argv-style spawn request. `env` carries invocation parameters (including
/// credentials) and is never printed by `Debug`.
#[derive(Clone)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ProcessRequest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, pairs: Vec<(String, String)>) -> Self {
        self.env.extend(pairs);
        self
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The operator's command: the remote parameter when present, otherwise
    /// the last argv entry.
    pub fn command_text(&self) -> Option<&str> {
        self.env_value(ENV_REMOTE_COMMAND)
            .or_else(|| self.args.last().map(String::as_str))
    }
}

impl fmt::Debug for ProcessRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ProcessRequest")
            .field("program", &self.program)
            .field("args", &self.args.len())
            .field("env", &env_keys)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn exited(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            ..Self::default()
        }
    }
}

/// Request-scoped cancellation. Cloned handles observe the same signal.
#[derive(Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Outbound process primitive used by the gateway.
///
/// Implementations must return `GateErrorKind::ProcessSpawn` only when the
/// child could not be started at all; everything after a successful spawn is
/// reported through `ProcessOutput`.
#[async_trait::async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn run(
        &self,
        request: ProcessRequest,
        timeout: Duration,
        cancel: Option<&CancelSignal>,
    ) -> Result<ProcessOutput, GateError>;
}

async fn wait_cancelled(cancel: Option<&CancelSignal>) {
    match cancel {
        Some(signal) => signal.cancelled().await,
        None => std::future::pending::<()>().await,
    }
}

async fn drain<R>(reader: Option<R>, sink: Arc<Mutex<Vec<u8>>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if let Ok(mut guard) = sink.lock() {
            guard.extend_from_slice(&buf[..n]);
        }
    }
}

fn take_buffer(buf: &Mutex<Vec<u8>>) -> String {
    let guard = buf.lock().unwrap_or_else(|err| err.into_inner());
    String::from_utf8_lossy(&guard).to_string()
}

enum Finish {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Spawns real child processes with tokio. Children are killed on timeout,
/// on cancellation, and when the owning future is dropped.
#[derive(Debug, Clone, Default)]
pub struct TokioSpawner;

impl TokioSpawner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ProcessSpawner for TokioSpawner {
    async fn run(
        &self,
        request: ProcessRequest,
        timeout: Duration,
        cancel: Option<&CancelSignal>,
    ) -> Result<ProcessOutput, GateError> {
        let mut cmd = tokio::process::Command::new(&request.program);
        cmd.args(&request.args);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|err| GateError::process_spawn(&request.program, err))?;
        drop(request);

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let stdout_task = tokio::spawn(drain(child.stdout.take(), stdout_buf.clone()));
        let stderr_task = tokio::spawn(drain(child.stderr.take(), stderr_buf.clone()));

        let finish = tokio::select! {
            status = child.wait() => Finish::Exited(status),
            _ = tokio::time::sleep(timeout) => Finish::TimedOut,
            _ = wait_cancelled(cancel) => Finish::Cancelled,
        };

        let (status, timed_out, cancelled) = match finish {
            Finish::Exited(status) => (status, false, false),
            Finish::TimedOut => {
                let _ = child.kill().await;
                (child.wait().await, true, false)
            }
            Finish::Cancelled => {
                let _ = child.kill().await;
                (child.wait().await, false, true)
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        let status = status
            .map_err(|err| GateError::internal(format!("Failed to wait for process: {}", err)))?;

        // Grandchildren may keep the pipes open after the direct child exits.
        for task in [stdout_task, stderr_task] {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_millis(PIPE_DRAIN_GRACE_MS), task)
                .await
                .is_err()
            {
                abort.abort();
            }
        }
        let stdout = take_buffer(&stdout_buf);
        let stderr = take_buffer(&stderr_buf);

        Ok(ProcessOutput {
            stdout,
            stderr,
            exit_code: if timed_out || cancelled {
                None
            } else {
                status.code()
            },
            timed_out,
            cancelled,
            duration_ms,
        })
    }
}
