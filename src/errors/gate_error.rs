use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateErrorKind {
    KeyIo,
    NotInitialized,
    Decryption,
    InvalidEnvironment,
    CredentialsRequired,
    NotConnected,
    ProcessSpawn,
    InvalidParams,
    NotAuthenticated,
    NoEnvironmentSelected,
    Internal,
}

impl GateErrorKind {
    /// Recoverable kinds surface to the operator as 4xx-style messages.
    pub fn recoverable(self) -> bool {
        matches!(
            self,
            GateErrorKind::Decryption
                | GateErrorKind::InvalidEnvironment
                | GateErrorKind::CredentialsRequired
                | GateErrorKind::NotConnected
                | GateErrorKind::InvalidParams
                | GateErrorKind::NotAuthenticated
                | GateErrorKind::NoEnvironmentSelected
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GateError {
    pub kind: GateErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub recoverable: bool,
}

impl GateError {
    pub fn new(kind: GateErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            recoverable: kind.recoverable(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn key_io(message: impl Into<String>) -> Self {
        Self::new(GateErrorKind::KeyIo, "KEY_IO", message)
    }

    pub fn not_initialized(message: impl Into<String>) -> Self {
        Self::new(GateErrorKind::NotInitialized, "NOT_INITIALIZED", message)
    }

    pub fn decryption(message: impl Into<String>) -> Self {
        Self::new(GateErrorKind::Decryption, "DECRYPTION_FAILED", message)
            .with_hint("Re-authenticate to store fresh credentials.")
    }

    pub fn invalid_environment(name: &str, known: &[String]) -> Self {
        Self::new(
            GateErrorKind::InvalidEnvironment,
            "INVALID_ENVIRONMENT",
            format!("Unknown environment '{}'", name),
        )
        .with_details(serde_json::json!({ "known": known }))
    }

    pub fn credentials_required(environment: &str) -> Self {
        Self::new(
            GateErrorKind::CredentialsRequired,
            "CREDENTIALS_REQUIRED",
            format!("Credentials are required to connect to '{}'", environment),
        )
        .with_hint("Provide a username and password with the selection.")
    }

    pub fn not_connected(host: &str) -> Self {
        Self::new(
            GateErrorKind::NotConnected,
            "NOT_CONNECTED",
            format!("No session is established for host '{}'", host),
        )
        .with_hint("Select the environment with credentials first.")
    }

    pub fn process_spawn(program: &str, cause: impl fmt::Display) -> Self {
        Self::new(
            GateErrorKind::ProcessSpawn,
            "PROCESS_SPAWN",
            format!("Failed to start '{}': {}", program, cause),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(GateErrorKind::InvalidParams, "INVALID_PARAMS", message)
    }

    pub fn not_authenticated() -> Self {
        Self::new(
            GateErrorKind::NotAuthenticated,
            "NOT_AUTHENTICATED",
            "Operator session is missing or expired",
        )
    }

    pub fn no_environment_selected() -> Self {
        Self::new(
            GateErrorKind::NoEnvironmentSelected,
            "NO_ENVIRONMENT_SELECTED",
            "No environment selected",
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(GateErrorKind::Internal, "INTERNAL", message)
    }
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for GateError {}

impl From<std::io::Error> for GateError {
    fn from(err: std::io::Error) -> Self {
        GateError::internal(err.to_string())
    }
}
