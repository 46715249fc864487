//! Remote command gateway.
//!
//! Success policy, applied per call:
//! - a nonzero (or missing) exit code is always an error;
//! - in remote mode, the envelope's failure marker on stderr is an error
//!   even when the exit code is 0, because PowerShell remoting can surface
//!   failures as text;
//! - local commands rely on the exit code alone;
//! - timeouts and cancellations are errors.

use crate::constants::limits::{COMMAND_SUBSTRING_LENGTH, ERROR_SUBSTRING_LENGTH};
use crate::constants::shell::{
    BASE_ARGS, CONNECTIVITY_PROBE_COMMAND, ENV_REMOTE_COMMAND, ENV_REMOTE_HOST,
    REMOTE_FAILURE_MARKER, STDERR_SEPARATOR,
};
use crate::errors::{GateError, GateErrorKind, VaultError};
use crate::managers::process::{CancelSignal, ProcessOutput, ProcessRequest, ProcessSpawner};
use crate::services::catalog::HostId;
use crate::services::logger::Logger;
use crate::services::registry::SessionRegistry;
use crate::services::vault::Vault;
use crate::utils::redact::redact_text;
use crate::utils::text::command_preview;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub command: String,
    pub output: String,
    pub status: ExecutionStatus,
    pub mode: ExecutionMode,
    pub host: String,
    pub had_stderr: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    fn failed(command: &str, host: &HostId, mode: ExecutionMode, cause: String) -> Self {
        Self {
            command: command.to_string(),
            output: cause.clone(),
            status: ExecutionStatus::Error,
            mode,
            host: host.to_string(),
            had_stderr: false,
            exit_code: None,
            timed_out: false,
            cancelled: false,
            duration_ms: 0,
            error: Some(cause),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelSignal>,
}

impl ExecOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Fixed remote envelope. The credential snippet and the user command both
/// arrive as child environment parameters; nothing is spliced into this text.
pub fn remote_envelope(credential_script: &str) -> String {
    format!(
        r#"$ErrorActionPreference = 'Stop'
try {{
{credential_script}
$envgateBlock = [scriptblock]::Create($env:{command_var})
Invoke-Command -ComputerName $env:{host_var} -Credential $envgateCredential -ScriptBlock $envgateBlock -ErrorAction Stop
}} catch {{
[Console]::Error.WriteLine('{marker} ' + $_.Exception.Message)
exit 1
}}"#,
        credential_script = credential_script,
        command_var = ENV_REMOTE_COMMAND,
        host_var = ENV_REMOTE_HOST,
        marker = REMOTE_FAILURE_MARKER,
    )
}

fn merge_output(stdout: &str, stderr: &str) -> String {
    if stderr.trim().is_empty() {
        return stdout.to_string();
    }
    format!("{}{}{}", stdout, STDERR_SEPARATOR, stderr)
}

/// The envelope reports failures on stderr only; stdout belongs to the
/// remote command and may legitimately contain the marker text.
fn marker_message(output: &ProcessOutput) -> Option<String> {
    output
        .stderr
        .lines()
        .find_map(|line| line.split_once(REMOTE_FAILURE_MARKER))
        .map(|(_, rest)| rest.trim().to_string())
}

#[derive(Clone)]
pub struct Gateway {
    vault: Vault,
    registry: SessionRegistry,
    spawner: Arc<dyn ProcessSpawner>,
    shell_program: String,
    default_timeout: Duration,
    logger: Logger,
}

impl Gateway {
    pub fn new(
        vault: Vault,
        registry: SessionRegistry,
        spawner: Arc<dyn ProcessSpawner>,
        shell_program: impl Into<String>,
        default_timeout: Duration,
        logger: &Logger,
    ) -> Self {
        Self {
            vault,
            registry,
            spawner,
            shell_program: shell_program.into(),
            default_timeout,
            logger: logger.child("gateway"),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn local_request(&self, command: &str) -> ProcessRequest {
        ProcessRequest::new(self.shell_program.as_str())
            .args(BASE_ARGS.iter().copied())
            .arg(command)
    }

    /// Runs `command` on `host`.
    ///
    /// Expected failures (bad credentials, unreachable host, nonzero exit,
    /// timeout) come back as `Ok` with an error status. `Err` is reserved for
    /// `NotConnected` and for `ProcessSpawn` when the shell cannot start.
    pub async fn execute(
        &self,
        host: &HostId,
        command: &str,
        options: &ExecOptions,
    ) -> Result<ExecutionResult, GateError> {
        let (mode, request) = match host {
            HostId::Local => (ExecutionMode::Local, self.local_request(command)),
            HostId::Remote(name) => {
                let entry = self
                    .registry
                    .get(name)
                    .ok_or_else(|| GateError::not_connected(name))?;
                let credential = match self
                    .vault
                    .render_credential_script(&entry.username, &entry.secret)
                {
                    Ok(credential) => credential,
                    Err(err @ VaultError::Decryption(_)) => {
                        self.logger.warn(
                            "stored credential rejected",
                            Some(&serde_json::json!({ "host": name, "error": err.to_string() })),
                        );
                        return Ok(ExecutionResult::failed(
                            command,
                            host,
                            ExecutionMode::Remote,
                            format!(
                                "Stored credentials for '{}' could not be decrypted; re-authenticate",
                                name
                            ),
                        ));
                    }
                    Err(err) => return Err(err.into()),
                };
                let envelope = remote_envelope(credential.script);
                let request = ProcessRequest::new(self.shell_program.as_str())
                    .args(BASE_ARGS.iter().copied())
                    .arg(envelope)
                    .env(ENV_REMOTE_HOST, name.as_str())
                    .env(ENV_REMOTE_COMMAND, command)
                    .envs(credential.into_bindings());
                (ExecutionMode::Remote, request)
            }
        };

        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let output = match self
            .spawner
            .run(request, timeout, options.cancel.as_ref())
            .await
        {
            Ok(output) => output,
            Err(err) if err.kind == GateErrorKind::ProcessSpawn => {
                self.logger.error(
                    "failed to spawn shell",
                    Some(&serde_json::json!({
                        "host": host.to_string(),
                        "program": self.shell_program,
                        "error": err.message,
                    })),
                );
                return Err(err);
            }
            Err(err) => {
                return Ok(ExecutionResult::failed(
                    command,
                    host,
                    mode,
                    format!("Error executing command: {}", err.message),
                ))
            }
        };

        let result = self.normalize(command, host, mode, output, timeout);
        if mode == ExecutionMode::Remote && result.is_success() {
            if let Some(name) = host.remote_name() {
                self.registry.touch(name);
            }
        }
        self.logger.info(
            "command executed",
            Some(&serde_json::json!({
                "host": result.host,
                "mode": result.mode,
                "status": result.status,
                "exit_code": result.exit_code,
                "duration_ms": result.duration_ms,
                "command": command_preview(command, COMMAND_SUBSTRING_LENGTH),
            })),
        );
        Ok(result)
    }

    fn normalize(
        &self,
        command: &str,
        host: &HostId,
        mode: ExecutionMode,
        output: ProcessOutput,
        timeout: Duration,
    ) -> ExecutionResult {
        let marker = match mode {
            ExecutionMode::Remote => marker_message(&output),
            ExecutionMode::Local => None,
        };
        let error = if output.timed_out {
            Some(format!("Command timed out after {} ms", timeout.as_millis()))
        } else if output.cancelled {
            Some("Command was cancelled".to_string())
        } else if let Some(message) = marker {
            Some(format!("Remote execution failed: {}", message))
        } else {
            match output.exit_code {
                Some(0) => None,
                Some(code) => Some(format!("Command exited with code {}", code)),
                None => Some("Command terminated without an exit code".to_string()),
            }
        };
        ExecutionResult {
            command: command.to_string(),
            output: merge_output(&output.stdout, &output.stderr),
            status: if error.is_none() {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::Error
            },
            mode,
            host: host.to_string(),
            had_stderr: !output.stderr.trim().is_empty(),
            exit_code: output.exit_code,
            timed_out: output.timed_out,
            cancelled: output.cancelled,
            duration_ms: output.duration_ms,
            error: error.map(|e| redact_text(&e, ERROR_SUBSTRING_LENGTH, None)),
        }
    }

    /// Trivial remote command used to confirm a stored credential works.
    pub async fn probe_connectivity(
        &self,
        host: &HostId,
        timeout: Duration,
    ) -> Result<ExecutionResult, GateError> {
        self.execute(
            host,
            CONNECTIVITY_PROBE_COMMAND,
            &ExecOptions::default().with_timeout(timeout),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::shell::{ENV_REMOTE_SECRET, ENV_REMOTE_USER};
    use crate::managers::mock_spawner::ScriptedSpawner;

    fn fixture(spawner: ScriptedSpawner) -> (Gateway, SessionRegistry, Vault) {
        let logger = Logger::new("test");
        let vault = Vault::from_key_bytes(&[11u8; 32], logger.clone());
        let registry = SessionRegistry::new();
        let gateway = Gateway::new(
            vault.clone(),
            registry.clone(),
            Arc::new(spawner),
            "pwsh",
            Duration::from_secs(5),
            &logger,
        );
        (gateway, registry, vault)
    }

    fn remote(name: &str) -> HostId {
        HostId::Remote(name.to_string())
    }

    #[tokio::test]
    async fn local_command_passes_through_unmodified() {
        let spawner = ScriptedSpawner::simulated("pw");
        let (gateway, _, _) = fixture(spawner.clone());
        let result = gateway
            .execute(&HostId::Local, "echo hello", &ExecOptions::default())
            .await
            .expect("result");
        assert!(result.is_success());
        assert_eq!(result.mode, ExecutionMode::Local);
        assert_eq!(result.output.trim(), "hello");
        let requests = spawner.requests();
        assert_eq!(requests[0].program, "pwsh");
        assert_eq!(
            requests[0].args,
            vec!["-NoProfile", "-NonInteractive", "-Command", "echo hello"]
        );
        assert!(requests[0].env.is_empty());
    }

    #[tokio::test]
    async fn remote_without_entry_is_not_connected_for_any_command() {
        let spawner = ScriptedSpawner::simulated("pw");
        let (gateway, _, _) = fixture(spawner.clone());
        for command in ["echo hello", "", "Get-Process"] {
            let err = gateway
                .execute(&remote("prod1"), command, &ExecOptions::default())
                .await
                .expect_err("not connected");
            assert_eq!(err.kind, GateErrorKind::NotConnected);
        }
        assert_eq!(spawner.request_count(), 0);
    }

    #[tokio::test]
    async fn remote_command_is_parameterized() {
        let spawner = ScriptedSpawner::simulated("p\"w'$(x)");
        let (gateway, registry, vault) = fixture(spawner.clone());
        registry.store("prod1", "ops", vault.encrypt("p\"w'$(x)").unwrap());
        let result = gateway
            .execute(&remote("prod1"), "echo hello", &ExecOptions::default())
            .await
            .expect("result");
        assert!(result.is_success(), "{:?}", result);
        assert_eq!(result.mode, ExecutionMode::Remote);
        assert!(result.output.contains("hello"));

        let request = &spawner.requests()[0];
        let script = request.args.last().expect("script");
        assert!(!script.contains("p\"w'$(x)"));
        assert!(!script.contains("echo hello"));
        assert!(!script.contains("prod1"));
        assert_eq!(request.env_value(ENV_REMOTE_SECRET), Some("p\"w'$(x)"));
        assert_eq!(request.env_value(ENV_REMOTE_USER), Some("ops"));
        assert_eq!(request.env_value(ENV_REMOTE_HOST), Some("prod1"));
        assert_eq!(request.env_value(ENV_REMOTE_COMMAND), Some("echo hello"));
    }

    #[tokio::test]
    async fn failure_marker_wins_over_zero_exit_code() {
        let spawner = ScriptedSpawner::new(|_| {
            Ok(ProcessOutput::exited(
                0,
                "partial\n",
                format!("{} WinRM cannot complete the operation", REMOTE_FAILURE_MARKER),
            ))
        });
        let (gateway, registry, vault) = fixture(spawner);
        registry.store("prod1", "ops", vault.encrypt("pw").unwrap());
        let result = gateway
            .execute(&remote("prod1"), "Get-Date", &ExecOptions::default())
            .await
            .expect("result");
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.had_stderr);
        assert!(result.output.starts_with("partial\n\nErrors:\n"));
        assert_eq!(
            result.error.as_deref(),
            Some("Remote execution failed: WinRM cannot complete the operation")
        );
    }

    #[tokio::test]
    async fn marker_text_in_remote_stdout_is_command_output() {
        let spawner = ScriptedSpawner::new(|_| {
            Ok(ProcessOutput::exited(
                0,
                format!("12:00 {} WinRM timeout\n12:01 retry ok\n", REMOTE_FAILURE_MARKER),
                "",
            ))
        });
        let (gateway, registry, vault) = fixture(spawner);
        registry.store("prod1", "ops", vault.encrypt("pw").unwrap());
        let result = gateway
            .execute(
                &remote("prod1"),
                "Get-Content C:\\logs\\envgate.log",
                &ExecOptions::default(),
            )
            .await
            .expect("result");
        assert_eq!(result.status, ExecutionStatus::Success);
        assert!(result.error.is_none());
        assert!(!result.had_stderr);
        assert!(result.output.contains(REMOTE_FAILURE_MARKER));
    }

    #[tokio::test]
    async fn local_stderr_with_zero_exit_is_success_but_flagged() {
        let spawner = ScriptedSpawner::new(|_| Ok(ProcessOutput::exited(0, "ok", "warning: x")));
        let (gateway, _, _) = fixture(spawner);
        let result = gateway
            .execute(&HostId::Local, "Get-Thing", &ExecOptions::default())
            .await
            .expect("result");
        assert!(result.is_success());
        assert!(result.had_stderr);
        assert_eq!(result.output, "ok\nErrors:\nwarning: x");
    }

    #[tokio::test]
    async fn nonzero_exit_is_always_error() {
        let spawner = ScriptedSpawner::simulated("pw");
        let (gateway, _, _) = fixture(spawner);
        let result = gateway
            .execute(&HostId::Local, "exit 2", &ExecOptions::default())
            .await
            .expect("result");
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.exit_code, Some(2));
        assert_eq!(result.error.as_deref(), Some("Command exited with code 2"));
    }

    #[tokio::test]
    async fn undecryptable_entry_becomes_error_result() {
        let spawner = ScriptedSpawner::simulated("pw");
        let (gateway, registry, _) = fixture(spawner.clone());
        let foreign = Vault::from_key_bytes(&[99u8; 32], Logger::new("test"));
        registry.store("prod1", "ops", foreign.encrypt("pw").unwrap());
        let result = gateway
            .execute(&remote("prod1"), "echo hi", &ExecOptions::default())
            .await
            .expect("result");
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.output.contains("re-authenticate"));
        assert_eq!(spawner.request_count(), 0);
    }

    #[tokio::test]
    async fn timeout_and_cancel_are_errors() {
        let spawner = ScriptedSpawner::new(|_| {
            Ok(ProcessOutput {
                timed_out: true,
                ..ProcessOutput::default()
            })
        });
        let (gateway, _, _) = fixture(spawner);
        let result = gateway
            .execute(
                &HostId::Local,
                "Start-Sleep 600",
                &ExecOptions::default().with_timeout(Duration::from_millis(250)),
            )
            .await
            .expect("result");
        assert!(result.timed_out);
        assert_eq!(result.error.as_deref(), Some("Command timed out after 250 ms"));

        let (gateway, _, _) = fixture(ScriptedSpawner::simulated("pw"));
        let cancel = CancelSignal::new();
        cancel.cancel();
        let result = gateway
            .execute(&HostId::Local, "echo hi", &ExecOptions::default().with_cancel(cancel))
            .await
            .expect("result");
        assert!(result.cancelled);
        assert_eq!(result.status, ExecutionStatus::Error);
    }

    #[tokio::test]
    async fn spawn_failure_propagates() {
        let spawner =
            ScriptedSpawner::new(|req| Err(GateError::process_spawn(&req.program, "not found")));
        let (gateway, _, _) = fixture(spawner);
        let err = gateway
            .execute(&HostId::Local, "echo hi", &ExecOptions::default())
            .await
            .expect_err("spawn");
        assert_eq!(err.kind, GateErrorKind::ProcessSpawn);
    }

    #[tokio::test]
    async fn empty_command_is_still_dispatched() {
        let spawner = ScriptedSpawner::simulated("pw");
        let (gateway, _, _) = fixture(spawner.clone());
        let result = gateway
            .execute(&HostId::Local, "", &ExecOptions::default())
            .await
            .expect("result");
        assert!(result.is_success());
        assert_eq!(spawner.requests()[0].args.last().map(String::as_str), Some(""));
    }

    #[test]
    fn envelope_references_parameters_only() {
        let envelope = remote_envelope(crate::services::vault::CREDENTIAL_SCRIPT);
        assert!(envelope.contains("$env:ENVGATE_REMOTE_HOST"));
        assert!(envelope.contains("$env:ENVGATE_REMOTE_COMMAND"));
        assert!(envelope.contains("$env:ENVGATE_REMOTE_SECRET"));
        assert!(envelope.contains(REMOTE_FAILURE_MARKER));
    }
}
