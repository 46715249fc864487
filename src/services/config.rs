use crate::constants::network::{
    TIMEOUT_EXEC_DEFAULT_MS, TIMEOUT_EXEC_MAX_MS, TIMEOUT_PROBE_DEFAULT_MS,
};
use crate::constants::probe::{DEFAULT_PROCESSES, DEFAULT_SERVICES};
use crate::constants::shell::DEFAULT_PROGRAM;
use crate::utils::paths::{resolve_environments_path, resolve_key_path};
use std::path::PathBuf;
use std::time::Duration;

fn read_positive_ms(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map(|v| v.min(TIMEOUT_EXEC_MAX_MS))
}

fn read_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Runtime settings, resolved once from `ENVGATE_*` variables.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub key_path: PathBuf,
    pub environments_path: Option<PathBuf>,
    pub shell_program: String,
    pub exec_timeout: Duration,
    pub probe_timeout: Duration,
    pub monitored_processes: Vec<String>,
    pub monitored_services: Vec<String>,
}

impl GateConfig {
    pub fn from_env() -> Self {
        let shell_program = std::env::var("ENVGATE_SHELL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_PROGRAM.to_string());
        Self {
            key_path: resolve_key_path(),
            environments_path: resolve_environments_path(),
            shell_program,
            exec_timeout: Duration::from_millis(
                read_positive_ms("ENVGATE_EXEC_TIMEOUT_MS").unwrap_or(TIMEOUT_EXEC_DEFAULT_MS),
            ),
            probe_timeout: Duration::from_millis(
                read_positive_ms("ENVGATE_PROBE_TIMEOUT_MS").unwrap_or(TIMEOUT_PROBE_DEFAULT_MS),
            ),
            monitored_processes: read_list("ENVGATE_MONITORED_PROCESSES")
                .unwrap_or_else(|| DEFAULT_PROCESSES.iter().map(|s| s.to_string()).collect()),
            monitored_services: read_list("ENVGATE_MONITORED_SERVICES")
                .unwrap_or_else(|| DEFAULT_SERVICES.iter().map(|s| s.to_string()).collect()),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            key_path: resolve_key_path(),
            environments_path: None,
            shell_program: DEFAULT_PROGRAM.to_string(),
            exec_timeout: Duration::from_millis(TIMEOUT_EXEC_DEFAULT_MS),
            probe_timeout: Duration::from_millis(TIMEOUT_PROBE_DEFAULT_MS),
            monitored_processes: DEFAULT_PROCESSES.iter().map(|s| s.to_string()).collect(),
            monitored_services: DEFAULT_SERVICES.iter().map(|s| s.to_string()).collect(),
        }
    }
}
