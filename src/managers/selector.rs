//! Environment selection state machine.
//!
//! `Unselected → LocalActive | RemoteDisconnected | RemoteConnected`.
//!
//! Registry lifecycle: the entry of a remote host is released when the
//! operator moves to another environment or closes the selection. A
//! selection that fails with `CredentialsRequired` leaves the registry
//! untouched; the previous host is carried and released by the next
//! transition instead.
//!
//! A failed connectivity probe after fresh credentials keeps the stored
//! entry, so a later `status()` can promote the selection once the host is
//! reachable without asking for the password again. Such an entry stays
//! unverified: reusing it re-checks the host instead of reporting connected.
//!
//! Live re-checks run under the same per-host lock as `select`, and every
//! selection carries a generation so a stale check never overwrites a newer
//! selection.

use crate::errors::GateError;
use crate::managers::gateway::Gateway;
use crate::services::catalog::{Environment, EnvironmentCatalog, HostId};
use crate::services::logger::Logger;
use crate::services::registry::SessionRegistry;
use crate::services::validation::Validation;
use crate::services::vault::Vault;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorState {
    Unselected,
    LocalActive,
    RemoteDisconnected,
    RemoteConnected,
}

pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both halves are required; a lone username or password counts as none.
    pub fn from_parts(username: Option<&str>, password: Option<&str>) -> Option<Self> {
        match (username, password) {
            (Some(user), Some(pass)) if !user.trim().is_empty() && !pass.is_empty() => {
                Some(Self::new(user, pass))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
struct Selection {
    environment: Environment,
    state: SelectorState,
    last_error: Option<String>,
    carried_host: Option<String>,
    generation: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectOutcome {
    pub environment: String,
    pub host: HostId,
    pub state: SelectorState,
    pub reused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SelectOutcome {
    pub fn connected(&self) -> bool {
        matches!(
            self.state,
            SelectorState::LocalActive | SelectorState::RemoteConnected
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentStatus {
    pub state: SelectorState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EnvironmentSelector {
    catalog: Arc<EnvironmentCatalog>,
    vault: Vault,
    registry: SessionRegistry,
    gateway: Gateway,
    validation: Validation,
    probe_timeout: Duration,
    logger: Logger,
    current: Arc<RwLock<Option<Selection>>>,
    generation: Arc<AtomicU64>,
    host_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl EnvironmentSelector {
    pub fn new(
        catalog: Arc<EnvironmentCatalog>,
        vault: Vault,
        registry: SessionRegistry,
        gateway: Gateway,
        probe_timeout: Duration,
        logger: &Logger,
    ) -> Self {
        Self {
            catalog,
            vault,
            registry,
            gateway,
            validation: Validation::new(),
            probe_timeout,
            logger: logger.child("selector"),
            current: Arc::new(RwLock::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            host_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn catalog(&self) -> &EnvironmentCatalog {
        &self.catalog
    }

    fn host_lock(&self, host: &str) -> Arc<Mutex<()>> {
        self.host_locks
            .entry(host.trim().to_lowercase())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn log_transition(
        &self,
        action: &str,
        environment: &Environment,
        state: SelectorState,
        error: Option<&str>,
    ) {
        let meta = serde_json::json!({
            "action": action,
            "environment": environment.name,
            "host": environment.host.to_string(),
            "outcome": state,
            "error": error,
        });
        if error.is_some() {
            self.logger.warn("environment transition", Some(&meta));
        } else {
            self.logger.info("environment transition", Some(&meta));
        }
    }

    /// Replaces the current selection, releasing registry entries that no
    /// longer belong to it.
    async fn switch_to(
        &self,
        environment: &Environment,
        state: SelectorState,
        last_error: Option<String>,
        release_previous: bool,
    ) {
        let mut guard = self.current.write().await;
        let previous = guard.take();
        let new_host = environment.host.remote_name().map(|h| h.to_lowercase());
        let mut carried_host = None;
        if let Some(previous) = previous {
            let stale = [
                previous.environment.host.remote_name().map(str::to_string),
                previous.carried_host,
            ];
            for host in stale.into_iter().flatten() {
                if Some(host.to_lowercase()) == new_host {
                    continue;
                }
                if release_previous {
                    self.registry.remove(&host);
                    self.logger.info(
                        "released session",
                        Some(&serde_json::json!({ "host": host })),
                    );
                } else {
                    carried_host = Some(host);
                }
            }
        }
        *guard = Some(Selection {
            environment: environment.clone(),
            state,
            last_error,
            carried_host,
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
        });
    }

    /// Probes `environment` with its stored credential and records the
    /// outcome on the registry entry. Callers hold the host lock.
    async fn check_host(&self, environment: &Environment) -> (SelectorState, Option<String>) {
        let (state, error) = match self
            .gateway
            .probe_connectivity(&environment.host, self.probe_timeout)
            .await
        {
            Ok(result) if result.is_success() => (SelectorState::RemoteConnected, None),
            Ok(result) => (
                SelectorState::RemoteDisconnected,
                Some(
                    result
                        .error
                        .unwrap_or_else(|| "Connectivity check failed".to_string()),
                ),
            ),
            Err(err) => (SelectorState::RemoteDisconnected, Some(err.message)),
        };
        if let Some(host) = environment.host.remote_name() {
            self.registry
                .mark_verified(host, state == SelectorState::RemoteConnected);
        }
        (state, error)
    }

    pub async fn select(
        &self,
        name: &str,
        credentials: Option<Credentials>,
    ) -> Result<SelectOutcome, GateError> {
        let Some(environment) = self.catalog.resolve(name).cloned() else {
            self.logger.warn(
                "unknown environment requested",
                Some(&serde_json::json!({ "action": "select", "environment": name })),
            );
            return Err(GateError::invalid_environment(name, &self.catalog.names()));
        };

        let host = match &environment.host {
            HostId::Local => {
                self.switch_to(&environment, SelectorState::LocalActive, None, true)
                    .await;
                self.log_transition("select", &environment, SelectorState::LocalActive, None);
                return Ok(SelectOutcome {
                    environment: environment.name.clone(),
                    host: HostId::Local,
                    state: SelectorState::LocalActive,
                    reused: false,
                    error: None,
                });
            }
            HostId::Remote(host) => host.clone(),
        };

        let lock = self.host_lock(&host);
        let _guard = lock.lock().await;

        let Some(credentials) = credentials else {
            if let Some(entry) = self.registry.get(&host) {
                let (state, error) = if entry.verified {
                    (SelectorState::RemoteConnected, None)
                } else {
                    self.check_host(&environment).await
                };
                self.switch_to(&environment, state, error.clone(), true).await;
                self.log_transition("reuse", &environment, state, error.as_deref());
                return Ok(SelectOutcome {
                    environment: environment.name.clone(),
                    host: environment.host.clone(),
                    state,
                    reused: true,
                    error,
                });
            }
            let err = GateError::credentials_required(&environment.name);
            self.switch_to(
                &environment,
                SelectorState::RemoteDisconnected,
                Some(err.message.clone()),
                false,
            )
            .await;
            self.log_transition(
                "select",
                &environment,
                SelectorState::RemoteDisconnected,
                Some(&err.message),
            );
            return Err(err);
        };

        let username = self
            .validation
            .ensure_identifier(&credentials.username, "Username")?;
        self.validation.ensure_password(&credentials.password)?;
        let secret = self.vault.encrypt(&credentials.password)?;
        drop(credentials);
        self.registry.store(&host, &username, secret);

        let (state, error) = self.check_host(&environment).await;
        self.switch_to(&environment, state, error.clone(), true).await;
        self.log_transition("connect", &environment, state, error.as_deref());
        Ok(SelectOutcome {
            environment: environment.name.clone(),
            host: environment.host.clone(),
            state,
            reused: false,
            error,
        })
    }

    /// Current environment, if any. Commands without an explicit host
    /// resolve against this.
    pub async fn current_environment(&self) -> Option<Environment> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|selection| selection.environment.clone())
    }

    pub async fn state(&self) -> SelectorState {
        self.current
            .read()
            .await
            .as_ref()
            .map(|selection| selection.state)
            .unwrap_or(SelectorState::Unselected)
    }

    /// Observational status. Remote selections are re-checked live and may
    /// move between connected and disconnected without a `select` call.
    pub async fn status(&self) -> EnvironmentStatus {
        let snapshot = self.current.read().await.clone();
        let Some(selection) = snapshot else {
            return Self::unselected_status();
        };
        let Some(host) = selection.environment.host.remote_name() else {
            return Self::status_of(&selection, SelectorState::LocalActive, None);
        };

        let lock = self.host_lock(host);
        let _guard = lock.lock().await;
        // A select may have replaced the selection while we waited.
        let Some(selection) = self.current.read().await.clone() else {
            return Self::unselected_status();
        };

        let (state, error) = match selection.environment.host.remote_name() {
            None => (SelectorState::LocalActive, None),
            Some(host) if !self.registry.has_entry(host) => (
                SelectorState::RemoteDisconnected,
                selection
                    .last_error
                    .clone()
                    .or_else(|| Some(GateError::not_connected(host).message)),
            ),
            Some(_) => self.check_host(&selection.environment).await,
        };

        if state != selection.state || error != selection.last_error {
            let mut guard = self.current.write().await;
            let updated = match guard.as_mut() {
                Some(current) if current.generation == selection.generation => {
                    current.state = state;
                    current.last_error = error.clone();
                    true
                }
                _ => false,
            };
            drop(guard);
            if updated && state != selection.state {
                self.log_transition("status", &selection.environment, state, error.as_deref());
            }
        }

        Self::status_of(&selection, state, error)
    }

    fn unselected_status() -> EnvironmentStatus {
        EnvironmentStatus {
            state: SelectorState::Unselected,
            environment: None,
            host: None,
            error: None,
            checked_at: Utc::now(),
        }
    }

    fn status_of(
        selection: &Selection,
        state: SelectorState,
        error: Option<String>,
    ) -> EnvironmentStatus {
        EnvironmentStatus {
            state,
            environment: Some(selection.environment.name.clone()),
            host: Some(selection.environment.host.to_string()),
            error,
            checked_at: Utc::now(),
        }
    }

    /// Releases the current host's entry and returns to `Unselected`.
    /// Idempotent; returns the environment that was closed, if any.
    pub async fn close(&self) -> Option<String> {
        let previous = self.current.write().await.take()?;
        let hosts = [
            previous.environment.host.remote_name().map(str::to_string),
            previous.carried_host.clone(),
        ];
        for host in hosts.into_iter().flatten() {
            self.registry.remove(&host);
        }
        self.log_transition("close", &previous.environment, SelectorState::Unselected, None);
        Some(previous.environment.name)
    }
}
