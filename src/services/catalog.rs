use crate::constants::catalog::DEFAULT_ENVIRONMENTS;
use crate::constants::hosts::{LOCAL_MARKER, LOCAL_NAMES};
use crate::errors::GateError;
use crate::services::validation::Validation;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Where an environment's commands run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "host", rename_all = "snake_case")]
pub enum HostId {
    Local,
    Remote(String),
}

impl HostId {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if LOCAL_NAMES.contains(&trimmed.to_lowercase().as_str()) {
            HostId::Local
        } else {
            HostId::Remote(trimmed.to_string())
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, HostId::Local)
    }

    pub fn remote_name(&self) -> Option<&str> {
        match self {
            HostId::Local => None,
            HostId::Remote(host) => Some(host.as_str()),
        }
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostId::Local => f.write_str(LOCAL_MARKER),
            HostId::Remote(host) => f.write_str(host),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    pub name: String,
    pub host: HostId,
}

fn fold_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Static name → host catalog, immutable after construction.
#[derive(Debug, Clone)]
pub struct EnvironmentCatalog {
    environments: Vec<Environment>,
}

impl EnvironmentCatalog {
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, GateError> {
        let validation = Validation::new();
        let mut environments: Vec<Environment> = Vec::new();
        for (name, host) in pairs {
            let name = validation.ensure_identifier(name, "Environment name")?;
            let host = match HostId::parse(host) {
                HostId::Local => HostId::Local,
                HostId::Remote(raw) => HostId::Remote(validation.ensure_host(&raw)?),
            };
            if environments.iter().any(|env| fold_name(&env.name) == fold_name(&name)) {
                return Err(GateError::invalid_params(format!(
                    "Environment '{}' is defined twice",
                    name
                )));
            }
            environments.push(Environment { name, host });
        }
        if environments.is_empty() {
            return Err(GateError::invalid_params("Environment catalog is empty"));
        }
        Ok(Self { environments })
    }

    pub fn builtin() -> Self {
        Self {
            environments: DEFAULT_ENVIRONMENTS
                .iter()
                .map(|(name, host)| Environment {
                    name: name.to_string(),
                    host: HostId::parse(host),
                })
                .collect(),
        }
    }

    /// Reads a JSON object of `{ "<name>": "<host or \"local\">" }`.
    pub fn load(path: &Path) -> Result<Self, GateError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            GateError::invalid_params(format!(
                "Failed to read environment catalog {}: {}",
                path.display(),
                err
            ))
        })?;
        let parsed: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|err| {
                GateError::invalid_params(format!(
                    "Environment catalog {} must be a JSON object: {}",
                    path.display(),
                    err
                ))
            })?;
        let mut pairs = Vec::with_capacity(parsed.len());
        for (name, host) in parsed.iter() {
            let host = host.as_str().ok_or_else(|| {
                GateError::invalid_params(format!("Host for environment '{}' must be a string", name))
            })?;
            pairs.push((name.as_str(), host));
        }
        Self::from_pairs(pairs)
    }

    /// Exact match first, then case-insensitive ignoring whitespace.
    pub fn resolve(&self, name: &str) -> Option<&Environment> {
        let trimmed = name.trim();
        self.environments
            .iter()
            .find(|env| env.name == trimmed)
            .or_else(|| {
                let folded = fold_name(trimmed);
                self.environments.iter().find(|env| fold_name(&env.name) == folded)
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.environments.iter().map(|env| env.name.clone()).collect()
    }

    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }
}
