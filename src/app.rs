use crate::errors::{GateError, GateErrorKind};
use crate::managers::gateway::{ExecOptions, ExecutionResult, Gateway};
use crate::managers::probe::{HealthProbe, ProbeReport};
use crate::managers::process::{ProcessSpawner, TokioSpawner};
use crate::managers::selector::{
    Credentials, EnvironmentSelector, EnvironmentStatus, SelectorState,
};
use crate::services::catalog::EnvironmentCatalog;
use crate::services::config::GateConfig;
use crate::services::logger::Logger;
use crate::services::operator::{OperatorSession, OperatorSessions, SessionToken};
use crate::services::registry::SessionRegistry;
use crate::services::vault::Vault;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct SelectResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub state: SelectorState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GateError>,
}

/// Owned context handed to every request handler. Nothing in the core is a
/// process-wide singleton; tests build as many independent consoles as they
/// need.
#[derive(Clone)]
pub struct Console {
    pub logger: Logger,
    vault: Vault,
    registry: SessionRegistry,
    operators: OperatorSessions,
    gateway: Gateway,
    selector: EnvironmentSelector,
    probe: HealthProbe,
}

impl Console {
    /// Loads configuration from the environment, opens (or creates) the key
    /// file and wires real process spawning. A key file problem aborts here.
    pub fn initialize() -> Result<Self, GateError> {
        let logger = Logger::new("envgate");
        let config = GateConfig::from_env();
        let vault = Vault::open(&config.key_path, &logger)?;
        let catalog = match config.environments_path.as_ref() {
            Some(path) => EnvironmentCatalog::load(path)?,
            None => EnvironmentCatalog::builtin(),
        };
        Self::with_components(logger, &config, vault, catalog, Arc::new(TokioSpawner::new()))
    }

    pub fn with_components(
        logger: Logger,
        config: &GateConfig,
        vault: Vault,
        catalog: EnvironmentCatalog,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Result<Self, GateError> {
        let registry = SessionRegistry::new();
        let operators = OperatorSessions::new(vault.clone(), &logger);
        let gateway = Gateway::new(
            vault.clone(),
            registry.clone(),
            spawner,
            config.shell_program.clone(),
            config.exec_timeout,
            &logger,
        );
        let selector = EnvironmentSelector::new(
            Arc::new(catalog),
            vault.clone(),
            registry.clone(),
            gateway.clone(),
            config.probe_timeout,
            &logger,
        );
        let probe = HealthProbe::new(
            gateway.clone(),
            &config.monitored_processes,
            &config.monitored_services,
            config.probe_timeout,
            &logger,
        )?;
        logger.info(
            "console ready",
            Some(&serde_json::json!({
                "environments": selector.catalog().names(),
                "shell": config.shell_program,
                "exec_timeout_ms": config.exec_timeout.as_millis() as u64,
            })),
        );
        Ok(Self {
            logger,
            vault,
            registry,
            operators,
            gateway,
            selector,
            probe,
        })
    }

    pub fn authenticate(&self, username: &str, password: &str) -> Result<SessionToken, GateError> {
        self.operators.authenticate(username, password)
    }

    pub fn authorize(&self, token: &SessionToken) -> Result<OperatorSession, GateError> {
        self.operators.authorize(token)
    }

    pub fn logout(&self, token: &SessionToken) -> bool {
        self.operators.logout(token)
    }

    pub fn environments(&self) -> Vec<String> {
        self.selector.catalog().names()
    }

    /// Selection never raises: every failure is folded into the response.
    pub async fn select_environment(
        &self,
        name: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> SelectResponse {
        let credentials = Credentials::from_parts(username, password);
        match self.selector.select(name, credentials).await {
            Ok(outcome) => SelectResponse {
                success: outcome.connected(),
                environment: Some(outcome.environment.clone()),
                state: outcome.state,
                error: outcome.error.map(|message| {
                    GateError::new(
                        GateErrorKind::NotConnected,
                        "CONNECTIVITY_CHECK_FAILED",
                        message,
                    )
                }),
            },
            Err(err) => SelectResponse {
                success: false,
                environment: self
                    .selector
                    .current_environment()
                    .await
                    .map(|env| env.name),
                state: self.selector.state().await,
                error: Some(err),
            },
        }
    }

    pub async fn run_command(&self, command: &str) -> Result<ExecutionResult, GateError> {
        self.run_command_with(command, &ExecOptions::default()).await
    }

    pub async fn run_command_with(
        &self,
        command: &str,
        options: &ExecOptions,
    ) -> Result<ExecutionResult, GateError> {
        let environment = self
            .selector
            .current_environment()
            .await
            .ok_or_else(GateError::no_environment_selected)?;
        self.gateway.execute(&environment.host, command, options).await
    }

    pub async fn check_processes(&self) -> Result<ProbeReport, GateError> {
        let environment = self
            .selector
            .current_environment()
            .await
            .ok_or_else(GateError::no_environment_selected)?;
        Ok(self.probe.check_processes(&environment.host).await)
    }

    pub async fn check_services(&self) -> Result<ProbeReport, GateError> {
        let environment = self
            .selector
            .current_environment()
            .await
            .ok_or_else(GateError::no_environment_selected)?;
        Ok(self.probe.check_services(&environment.host).await)
    }

    pub async fn get_status(&self) -> EnvironmentStatus {
        self.selector.status().await
    }

    pub async fn close(&self) -> Option<String> {
        self.selector.close().await
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn diagnostics(&self) -> serde_json::Value {
        serde_json::json!({
            "vault": self.vault.stats(),
            "sessions": self.registry.hosts(),
            "operators": self.operators.active(),
            "log": self.logger.stats(),
        })
    }
}
