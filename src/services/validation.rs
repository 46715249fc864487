use crate::constants::limits::MAX_PROCESS_NAME_LENGTH;
use crate::errors::GateError;

#[derive(Clone, Default)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_identifier(&self, value: &str, label: &str) -> Result<String, GateError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(GateError::invalid_params(format!(
                "{} must be a non-empty string",
                label
            )));
        }
        if trimmed.contains('\0') {
            return Err(GateError::invalid_params(format!(
                "{} must not contain null bytes",
                label
            )));
        }
        Ok(trimmed.to_string())
    }

    pub fn ensure_password(&self, value: &str) -> Result<(), GateError> {
        if value.is_empty() {
            return Err(GateError::invalid_params("Password must not be empty"));
        }
        if value.contains('\0') {
            return Err(GateError::invalid_params("Password must not contain null bytes"));
        }
        Ok(())
    }

    /// Hostnames reach the remote invocation as a parameter, but still must look like one.
    pub fn ensure_host(&self, value: &str) -> Result<String, GateError> {
        let host = self.ensure_identifier(value, "Host")?;
        let valid = host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'));
        if !valid {
            return Err(GateError::invalid_params(format!(
                "Host '{}' contains unsupported characters",
                host
            )));
        }
        Ok(host)
    }

    /// Process and service names are embedded in the probe script, so the
    /// allow-list is restricted to a character set that needs no quoting.
    pub fn ensure_monitored_name(&self, value: &str) -> Result<String, GateError> {
        let name = self.ensure_identifier(value, "Monitored name")?;
        if name.len() > MAX_PROCESS_NAME_LENGTH {
            return Err(GateError::invalid_params(format!(
                "Monitored name '{}' exceeds {} characters",
                name, MAX_PROCESS_NAME_LENGTH
            )));
        }
        let valid = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '*'));
        if !valid {
            return Err(GateError::invalid_params(format!(
                "Monitored name '{}' contains unsupported characters",
                name
            )));
        }
        Ok(name)
    }
}
