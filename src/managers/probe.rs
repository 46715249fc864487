use crate::constants::shell::STDERR_SEPARATOR;
use crate::errors::GateError;
use crate::managers::gateway::{ExecOptions, ExecutionMode, Gateway};
use crate::services::catalog::HostId;
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    NotRunning,
    Error,
    Other(String),
}

impl ProcessState {
    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Running" => ProcessState::Running,
            "Not Running" | "Stopped" | "NotRunning" => ProcessState::NotRunning,
            "Error" => ProcessState::Error,
            other => ProcessState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProcessState::Running => "Running",
            ProcessState::NotRunning => "Not Running",
            ProcessState::Error => "Error",
            ProcessState::Other(raw) => raw.as_str(),
        }
    }
}

impl Serialize for ProcessState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Processes,
    Services,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub kind: ProbeKind,
    pub host: String,
    pub mode: ExecutionMode,
    pub statuses: BTreeMap<String, ProcessState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeReport {
    pub fn all_running(&self) -> bool {
        !self.statuses.is_empty()
            && self
                .statuses
                .values()
                .all(|state| *state == ProcessState::Running)
    }
}

/// Builds the fixed probe script. Names are validated against a character
/// set that is inert inside single quotes before they get here.
fn process_script(names: &[String]) -> String {
    format!(
        r#"$names = @({list})
$results = @{{}}
foreach ($name in $names) {{
    if (Get-Process -Name $name -ErrorAction SilentlyContinue) {{
        $results[$name] = "Running"
    }} else {{
        $results[$name] = "Not Running"
    }}
}}
ConvertTo-Json -Compress $results"#,
        list = quoted_list(names)
    )
}

fn service_script(patterns: &[String]) -> String {
    format!(
        r#"$patterns = @({list})
$results = @{{}}
foreach ($pattern in $patterns) {{
    $found = @(Get-Service -Name $pattern -ErrorAction SilentlyContinue)
    if ($found.Count -eq 0) {{
        $results[$pattern] = "Not Running"
    }}
    foreach ($svc in $found) {{
        $results[$svc.Name] = [string]$svc.Status
    }}
}}
ConvertTo-Json -Compress $results"#,
        list = quoted_list(patterns)
    )
}

fn quoted_list(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("'{}'", name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn stdout_part(output: &str) -> &str {
    output
        .split_once(STDERR_SEPARATOR)
        .map(|(stdout, _)| stdout)
        .unwrap_or(output)
}

/// Parses `{name: status}` JSON. Returns `None` on anything else.
fn parse_statuses(output: &str) -> Option<BTreeMap<String, ProcessState>> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&output[start..=end]).ok()?;
    let mut statuses = BTreeMap::new();
    for (name, value) in parsed {
        let state = match value {
            serde_json::Value::String(text) => ProcessState::parse(&text),
            // Service status can serialize as its enum ordinal.
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(4) => ProcessState::Running,
                Some(1) => ProcessState::NotRunning,
                _ => ProcessState::Other(n.to_string()),
            },
            _ => return None,
        };
        statuses.insert(name, state);
    }
    Some(statuses)
}

/// Read-only health check of a fixed allow-list of processes or services.
#[derive(Clone)]
pub struct HealthProbe {
    gateway: Gateway,
    processes: Vec<String>,
    services: Vec<String>,
    timeout: Duration,
    logger: Logger,
}

impl HealthProbe {
    pub fn new(
        gateway: Gateway,
        processes: &[String],
        services: &[String],
        timeout: Duration,
        logger: &Logger,
    ) -> Result<Self, GateError> {
        let validation = Validation::new();
        let processes = processes
            .iter()
            .map(|name| validation.ensure_monitored_name(name))
            .collect::<Result<Vec<_>, _>>()?;
        let services = services
            .iter()
            .map(|name| validation.ensure_monitored_name(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            gateway,
            processes,
            services,
            timeout,
            logger: logger.child("probe"),
        })
    }

    pub fn monitored_processes(&self) -> &[String] {
        &self.processes
    }

    pub fn monitored_services(&self) -> &[String] {
        &self.services
    }

    pub async fn check_processes(&self, host: &HostId) -> ProbeReport {
        self.run(ProbeKind::Processes, host, &self.processes, process_script(&self.processes))
            .await
    }

    pub async fn check_services(&self, host: &HostId) -> ProbeReport {
        self.run(ProbeKind::Services, host, &self.services, service_script(&self.services))
            .await
    }

    async fn run(&self, kind: ProbeKind, host: &HostId, names: &[String], script: String) -> ProbeReport {
        let mode = if host.is_local() {
            ExecutionMode::Local
        } else {
            ExecutionMode::Remote
        };
        let options = ExecOptions::default().with_timeout(self.timeout);
        let outcome = match self.gateway.execute(host, &script, &options).await {
            Ok(result) if result.is_success() => match parse_statuses(stdout_part(&result.output)) {
                Some(mut statuses) => {
                    if kind == ProbeKind::Processes {
                        for name in names {
                            statuses.entry(name.clone()).or_insert(ProcessState::Error);
                        }
                    }
                    Ok(statuses)
                }
                None => Err("probe output was not a JSON status map".to_string()),
            },
            Ok(result) => Err(result
                .error
                .unwrap_or_else(|| "probe command failed".to_string())),
            Err(err) => Err(err.message),
        };

        match outcome {
            Ok(statuses) => ProbeReport {
                kind,
                host: host.to_string(),
                mode,
                statuses,
                error: None,
            },
            Err(error) => {
                self.logger.warn(
                    "health probe failed",
                    Some(&serde_json::json!({
                        "host": host.to_string(),
                        "kind": kind,
                        "error": error,
                    })),
                );
                ProbeReport {
                    kind,
                    host: host.to_string(),
                    mode,
                    statuses: names
                        .iter()
                        .map(|name| (name.clone(), ProcessState::Error))
                        .collect(),
                    error: Some(error),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::mock_spawner::ScriptedSpawner;
    use crate::managers::process::ProcessOutput;
    use crate::services::registry::SessionRegistry;
    use crate::services::vault::Vault;
    use std::sync::Arc;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn probe_with(spawner: ScriptedSpawner) -> HealthProbe {
        let logger = Logger::new("test");
        let vault = Vault::from_key_bytes(&[1u8; 32], logger.clone());
        let gateway = Gateway::new(
            vault,
            SessionRegistry::new(),
            Arc::new(spawner),
            "pwsh",
            Duration::from_secs(5),
            &logger,
        );
        HealthProbe::new(
            gateway,
            &names(&["notepad", "calc"]),
            &names(&["*jboss*"]),
            Duration::from_secs(5),
            &logger,
        )
        .expect("probe")
    }

    #[tokio::test]
    async fn parses_status_map() {
        let probe = probe_with(ScriptedSpawner::new(|_| {
            Ok(ProcessOutput::exited(0, r#"{"notepad":"Running","calc":"Not Running"}"#, ""))
        }));
        let report = probe.check_processes(&HostId::Local).await;
        assert!(report.error.is_none());
        assert_eq!(report.statuses["notepad"], ProcessState::Running);
        assert_eq!(report.statuses["calc"], ProcessState::NotRunning);
        assert!(!report.all_running());
    }

    #[tokio::test]
    async fn malformed_output_marks_every_name_error() {
        let probe = probe_with(ScriptedSpawner::new(|_| {
            Ok(ProcessOutput::exited(0, "ParserError: Missing closing '}'", ""))
        }));
        let report = probe.check_processes(&HostId::Local).await;
        assert!(report.error.is_some());
        assert_eq!(report.statuses.len(), 2);
        assert!(report.statuses.values().all(|s| *s == ProcessState::Error));
    }

    #[tokio::test]
    async fn failing_command_and_disconnected_host_mark_error() {
        let probe = probe_with(ScriptedSpawner::new(|_| Ok(ProcessOutput::exited(1, "", "boom"))));
        let report = probe.check_processes(&HostId::Local).await;
        assert!(report.statuses.values().all(|s| *s == ProcessState::Error));

        let report = probe
            .check_processes(&HostId::Remote("prod1".to_string()))
            .await;
        assert_eq!(report.mode, ExecutionMode::Remote);
        assert!(report.error.unwrap().contains("No session"));
        assert!(report.statuses.values().all(|s| *s == ProcessState::Error));
    }

    #[tokio::test]
    async fn missing_names_are_reported_as_error() {
        let probe = probe_with(ScriptedSpawner::new(|_| {
            Ok(ProcessOutput::exited(0, r#"{"notepad":"Running"}"#, ""))
        }));
        let report = probe.check_processes(&HostId::Local).await;
        assert_eq!(report.statuses["calc"], ProcessState::Error);
    }

    #[tokio::test]
    async fn service_probe_expands_wildcards() {
        let spawner = ScriptedSpawner::new(|_| {
            Ok(ProcessOutput::exited(
                0,
                r#"{"jboss-eap":"Running","jboss-domain":"Stopped"}"#,
                "",
            ))
        });
        let probe = probe_with(spawner.clone());
        let report = probe.check_services(&HostId::Local).await;
        assert_eq!(report.kind, ProbeKind::Services);
        assert_eq!(report.statuses["jboss-eap"], ProcessState::Running);
        assert_eq!(report.statuses["jboss-domain"], ProcessState::NotRunning);
        let script = spawner.requests()[0].args.last().cloned().unwrap();
        assert!(script.contains("@('*jboss*')"));
    }

    #[test]
    fn rejects_unsafe_monitored_names() {
        let logger = Logger::new("test");
        let gateway = Gateway::new(
            Vault::from_key_bytes(&[1u8; 32], logger.clone()),
            SessionRegistry::new(),
            Arc::new(ScriptedSpawner::simulated("pw")),
            "pwsh",
            Duration::from_secs(5),
            &logger,
        );
        let result = HealthProbe::new(
            gateway,
            &names(&["calc'); Stop-Computer; ('"]),
            &[],
            Duration::from_secs(5),
            &logger,
        );
        assert!(result.is_err());
    }

    #[test]
    fn process_script_lists_names() {
        let script = process_script(&names(&["notepad", "mspaint"]));
        assert!(script.starts_with("$names = @('notepad', 'mspaint')"));
        assert!(script.contains("ConvertTo-Json"));
    }
}
