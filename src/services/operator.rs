use crate::errors::GateError;
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use crate::services::vault::{EncryptedSecret, Vault};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque token handed to the HTTP layer after `authenticate`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(Uuid);

impl SessionToken {
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

#[derive(Debug, Clone)]
pub struct OperatorSession {
    pub username: String,
    pub secret: EncryptedSecret,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct OperatorSessions {
    vault: Vault,
    validation: Validation,
    logger: Logger,
    sessions: Arc<DashMap<SessionToken, OperatorSession>>,
}

impl OperatorSessions {
    pub fn new(vault: Vault, logger: &Logger) -> Self {
        Self {
            vault,
            validation: Validation::new(),
            logger: logger.child("operator"),
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Any non-empty username is accepted; the password is kept only in
    /// encrypted form for later reuse.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<SessionToken, GateError> {
        let username = self.validation.ensure_identifier(username, "Username")?;
        let secret = self.vault.encrypt(password)?;
        let token = SessionToken(Uuid::new_v4());
        self.sessions.insert(
            token,
            OperatorSession {
                username: username.clone(),
                secret,
                created_at: Utc::now(),
            },
        );
        self.logger.info(
            "operator authenticated",
            Some(&serde_json::json!({ "username": username })),
        );
        Ok(token)
    }

    pub fn authorize(&self, token: &SessionToken) -> Result<OperatorSession, GateError> {
        self.sessions
            .get(token)
            .map(|s| s.value().clone())
            .ok_or_else(GateError::not_authenticated)
    }

    pub fn logout(&self, token: &SessionToken) -> bool {
        if let Some((_, session)) = self.sessions.remove(token) {
            self.logger.info(
                "operator logged out",
                Some(&serde_json::json!({ "username": session.username })),
            );
        }
        true
    }

    pub fn active(&self) -> usize {
        self.sessions.len()
    }
}
