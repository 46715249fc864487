//! Scripted process spawner for exercising the gateway without PowerShell.
//!
//! Public on purpose: it is the test seam for this crate's integration tests
//! and for embedders testing their own handlers against `Console`. Nothing
//! in the runtime path constructs it; `Console::initialize` always wires
//! `TokioSpawner`.
//!
//! Requests are recorded and answered by a caller-supplied closure, so tests
//! can simulate remote hosts, bad credentials, hung commands and malformed
//! probe output.

use crate::constants::shell::{ENV_REMOTE_HOST, ENV_REMOTE_SECRET, REMOTE_FAILURE_MARKER};
use crate::errors::GateError;
use crate::managers::process::{CancelSignal, ProcessOutput, ProcessRequest, ProcessSpawner};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = dyn Fn(&ProcessRequest) -> Result<ProcessOutput, GateError> + Send + Sync;

#[derive(Clone)]
pub struct ScriptedSpawner {
    responder: Arc<Responder>,
    requests: Arc<Mutex<Vec<ProcessRequest>>>,
}

impl ScriptedSpawner {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ProcessRequest) -> Result<ProcessOutput, GateError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Simulated PowerShell: `echo <text>` prints text, `exit <n>` exits
    /// with n, anything else prints nothing. Remote calls authenticate
    /// against `password`; a mismatch fails the way the remote envelope
    /// does, with the failure marker on stderr.
    pub fn simulated(password: &str) -> Self {
        let expected = password.to_string();
        Self::new(move |request| {
            if let Some(host) = request.env_value(ENV_REMOTE_HOST) {
                if request.env_value(ENV_REMOTE_SECRET) != Some(expected.as_str()) {
                    return Ok(ProcessOutput::exited(
                        1,
                        "",
                        format!(
                            "{} Connecting to remote server {} failed: Access is denied.",
                            REMOTE_FAILURE_MARKER, host
                        ),
                    ));
                }
            }
            Ok(simulate_command(request.command_text().unwrap_or("")))
        })
    }

    pub fn requests(&self) -> Vec<ProcessRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .len()
    }
}

fn simulate_command(command: &str) -> ProcessOutput {
    let trimmed = command.trim();
    if let Some(text) = trimmed.strip_prefix("echo ") {
        return ProcessOutput::exited(0, format!("{}\n", text.trim_matches('"')), "");
    }
    if let Some(code) = trimmed.strip_prefix("exit ") {
        return ProcessOutput::exited(code.trim().parse().unwrap_or(1), "", "");
    }
    ProcessOutput::exited(0, "", "")
}

#[async_trait::async_trait]
impl ProcessSpawner for ScriptedSpawner {
    async fn run(
        &self,
        request: ProcessRequest,
        timeout: Duration,
        cancel: Option<&CancelSignal>,
    ) -> Result<ProcessOutput, GateError> {
        if let Ok(mut guard) = self.requests.lock() {
            guard.push(request.clone());
        }
        if cancel.map(CancelSignal::is_cancelled).unwrap_or(false) {
            return Ok(ProcessOutput {
                cancelled: true,
                ..ProcessOutput::default()
            });
        }
        let mut output = (self.responder)(&request)?;
        if output.timed_out {
            output.duration_ms = timeout.as_millis() as u64;
            output.exit_code = None;
        }
        Ok(output)
    }
}
