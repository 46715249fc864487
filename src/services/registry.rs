use crate::services::vault::EncryptedSecret;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

fn normalize_host(host: &str) -> String {
    host.trim().to_lowercase()
}

/// Remembered credential for one remote host.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub host: String,
    pub username: String,
    pub secret: EncryptedSecret,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    /// Set once a connectivity check has succeeded with this credential.
    pub verified: bool,
}

impl SessionEntry {
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "host": self.host,
            "username": self.username,
            "created_at": self.created_at.to_rfc3339(),
            "last_used_at": self.last_used_at.to_rfc3339(),
            "verified": self.verified,
        })
    }
}

/// Volatile host → credential map. At most one entry per host; an entry's
/// presence is what "connected" means to the gateway and selector.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    entries: Arc<DashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_entry(&self, host: &str) -> bool {
        self.entries.contains_key(&normalize_host(host))
    }

    /// Last write wins; the previous entry for `host` is dropped.
    pub fn store(&self, host: &str, username: &str, secret: EncryptedSecret) -> SessionEntry {
        let now = Utc::now();
        let entry = SessionEntry {
            host: host.trim().to_string(),
            username: username.to_string(),
            secret,
            created_at: now,
            last_used_at: now,
            verified: false,
        };
        self.entries.insert(normalize_host(host), entry.clone());
        entry
    }

    pub fn get(&self, host: &str) -> Option<SessionEntry> {
        self.entries
            .get(&normalize_host(host))
            .map(|entry| entry.value().clone())
    }

    pub fn touch(&self, host: &str) {
        if let Some(mut entry) = self.entries.get_mut(&normalize_host(host)) {
            entry.last_used_at = Utc::now();
        }
    }

    /// Records the outcome of the latest connectivity check for `host`.
    pub fn mark_verified(&self, host: &str, verified: bool) {
        if let Some(mut entry) = self.entries.get_mut(&normalize_host(host)) {
            entry.verified = verified;
        }
    }

    /// Idempotent: removing an absent entry is still a success.
    pub fn remove(&self, host: &str) -> bool {
        self.entries.remove(&normalize_host(host));
        true
    }

    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.entries.iter().map(|e| e.value().host.clone()).collect();
        hosts.sort();
        hosts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::SessionRegistry;
    use crate::services::vault::EncryptedSecret;

    fn secret(tag: &str) -> EncryptedSecret {
        EncryptedSecret::from_payload(tag)
    }

    #[test]
    fn store_get_and_case_insensitive_lookup() {
        let registry = SessionRegistry::new();
        assert!(!registry.has_entry("prod1.example.com"));
        registry.store("Prod1.Example.com", "ops", secret("a"));
        assert!(registry.has_entry("prod1.example.com"));
        let entry = registry.get(" PROD1.example.com ").expect("entry");
        assert_eq!(entry.username, "ops");
        assert_eq!(entry.host, "Prod1.Example.com");
    }

    #[test]
    fn store_is_last_write_wins() {
        let registry = SessionRegistry::new();
        registry.store("prod1", "first", secret("a"));
        registry.store("prod1", "second", secret("b"));
        assert_eq!(registry.len(), 1);
        let entry = registry.get("prod1").expect("entry");
        assert_eq!(entry.username, "second");
        assert_eq!(entry.secret, secret("b"));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.store("prod1", "ops", secret("a"));
        assert!(registry.remove("prod1"));
        assert!(registry.remove("prod1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn touch_advances_last_used() {
        let registry = SessionRegistry::new();
        let stored = registry.store("prod1", "ops", secret("a"));
        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.touch("prod1");
        let entry = registry.get("prod1").expect("entry");
        assert!(entry.last_used_at > stored.last_used_at);
        assert_eq!(entry.created_at, stored.created_at);
    }

    #[test]
    fn fresh_entries_start_unverified() {
        let registry = SessionRegistry::new();
        assert!(!registry.store("prod1", "ops", secret("a")).verified);
        registry.mark_verified("PROD1", true);
        assert!(registry.get("prod1").expect("entry").verified);
        registry.store("prod1", "ops", secret("b"));
        assert!(!registry.get("prod1").expect("entry").verified);
        registry.mark_verified("missing", true);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn summary_never_contains_secret() {
        let registry = SessionRegistry::new();
        let entry = registry.store("prod1", "ops", secret("deadbeef"));
        let rendered = entry.summary().to_string();
        assert!(!rendered.contains("deadbeef"));
    }
}
