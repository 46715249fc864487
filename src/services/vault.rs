//! Credential custody.
//!
//! Passwords are kept AES-256-GCM encrypted while they sit in session state.
//! This is at-rest protection against casual disclosure (logs, dumps of the
//! registry); the key lives in the same process as the ciphertext, so it does
//! not protect against a compromised host process.

use crate::constants::buffers::{CRYPTO_IV_SIZE, CRYPTO_KEY_SIZE, CRYPTO_TAG_SIZE};
use crate::constants::shell::{ENV_REMOTE_SECRET, ENV_REMOTE_USER};
use crate::errors::VaultError;
use crate::services::logger::Logger;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use base64::Engine;
use rand::RngCore;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn decode_key(raw: &str) -> Option<Vec<u8>> {
    let trimmed = raw.trim();
    let decoded = if trimmed.len() == CRYPTO_KEY_SIZE * 2 {
        hex::decode(trimmed).ok()
    } else if trimmed.len() == CRYPTO_KEY_SIZE {
        Some(trimmed.as_bytes().to_vec())
    } else if trimmed.len() > CRYPTO_KEY_SIZE {
        base64::engine::general_purpose::STANDARD
            .decode(trimmed.as_bytes())
            .ok()
    } else {
        None
    };
    decoded.filter(|bytes| bytes.len() == CRYPTO_KEY_SIZE)
}

/// Returns the process key stored at `path`, generating and persisting a new
/// random key when the file does not exist yet.
///
/// `ENVGATE_ENCRYPTION_KEY` takes precedence over the file. An existing file
/// that cannot be read or decoded is an error: regenerating it would silently
/// orphan every stored ciphertext.
pub fn obtain_key(path: &Path) -> Result<Vec<u8>, VaultError> {
    if let Ok(raw) = std::env::var("ENVGATE_ENCRYPTION_KEY") {
        if let Some(decoded) = decode_key(&raw) {
            return Ok(decoded);
        }
    }

    if path.exists() {
        let stored = fs::read_to_string(path).map_err(|source| VaultError::KeyIo {
            path: path.to_path_buf(),
            source,
        })?;
        return decode_key(&stored).ok_or_else(|| VaultError::KeyFormat(path.to_path_buf()));
    }

    let mut generated = vec![0u8; CRYPTO_KEY_SIZE];
    OsRng.fill_bytes(&mut generated);
    persist_key(path, &generated)?;
    Ok(generated)
}

fn persist_key(path: &Path, key: &[u8]) -> Result<(), VaultError> {
    let io_err = |source| VaultError::KeyIo {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut options = fs::OpenOptions::new();
    options.create_new(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(io_err)?;
    file.write_all(hex::encode(key).as_bytes()).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    Ok(())
}

/// Ciphertext bound to one password, `<iv_hex>:<tag_hex>:<data_hex>`.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedSecret(String);

impl EncryptedSecret {
    pub fn from_payload(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    pub fn as_payload(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptedSecret([REDACTED])")
    }
}

/// Fixed PowerShell snippet that materializes `$envgateCredential` from
/// parameters supplied through the child environment. Values never appear
/// in the script text.
pub const CREDENTIAL_SCRIPT: &str = r#"$envgateSecure = ConvertTo-SecureString -String $env:ENVGATE_REMOTE_SECRET -AsPlainText -Force
Remove-Item -Path Env:ENVGATE_REMOTE_SECRET -ErrorAction SilentlyContinue
$envgateCredential = New-Object System.Management.Automation.PSCredential ($env:ENVGATE_REMOTE_USER, $envgateSecure)"#;

pub struct CredentialScript {
    pub script: &'static str,
    bindings: Vec<(String, String)>,
}

impl CredentialScript {
    /// Environment bindings for the child process. Consumes the script so the
    /// plaintext moves straight into the spawn request.
    pub fn into_bindings(self) -> Vec<(String, String)> {
        self.bindings
    }

    pub fn binding_names(&self) -> Vec<&str> {
        self.bindings.iter().map(|(k, _)| k.as_str()).collect()
    }
}

impl fmt::Debug for CredentialScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialScript")
            .field("script", &self.script)
            .field("bindings", &self.binding_names())
            .finish()
    }
}

#[derive(Debug, Default)]
struct VaultCounters {
    encrypted: AtomicU64,
    decrypted: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone)]
pub struct Vault {
    cipher: Option<Aes256Gcm>,
    counters: Arc<VaultCounters>,
    logger: Logger,
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("cipher", &self.cipher.as_ref().map(|_| "<redacted>"))
            .field("counters", &self.counters)
            .field("logger", &self.logger)
            .finish()
    }
}

impl Vault {
    pub fn open(path: &Path, logger: &Logger) -> Result<Self, VaultError> {
        let logger = logger.child("vault");
        let created = !path.exists();
        let key = obtain_key(path)?;
        logger.info(
            if created { "created credential key" } else { "loaded credential key" },
            Some(&serde_json::json!({ "path": path })),
        );
        Ok(Self::from_key_bytes(&key, logger))
    }

    pub fn from_key_bytes(key: &[u8], logger: Logger) -> Self {
        let key = aes_gcm::Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Some(Aes256Gcm::new(key)),
            counters: Arc::new(VaultCounters::default()),
            logger,
        }
    }

    /// A vault without a key; every cryptographic call fails with `NotInitialized`.
    pub fn uninitialized(logger: &Logger) -> Self {
        Self {
            cipher: None,
            counters: Arc::new(VaultCounters::default()),
            logger: logger.child("vault"),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.cipher.is_some()
    }

    fn cipher(&self) -> Result<&Aes256Gcm, VaultError> {
        self.cipher.as_ref().ok_or(VaultError::NotInitialized)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, VaultError> {
        let cipher = self.cipher()?;
        let mut iv = [0u8; CRYPTO_IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        let nonce = aes_gcm::Nonce::from_slice(&iv);
        let mut ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Encryption)?;
        if ciphertext.len() < CRYPTO_TAG_SIZE {
            return Err(VaultError::Encryption);
        }
        let tag = ciphertext.split_off(ciphertext.len() - CRYPTO_TAG_SIZE);
        self.counters.encrypted.fetch_add(1, Ordering::Relaxed);
        Ok(EncryptedSecret(format!(
            "{}:{}:{}",
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(ciphertext)
        )))
    }

    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<String, VaultError> {
        let cipher = self.cipher()?;
        let result = Self::open_payload(cipher, secret.as_payload());
        match &result {
            Ok(_) => self.counters.decrypted.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.counters.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    fn open_payload(cipher: &Aes256Gcm, payload: &str) -> Result<String, VaultError> {
        let malformed = VaultError::Decryption("malformed payload");
        let parts: Vec<&str> = payload.split(':').collect();
        if parts.len() != 3 {
            return Err(malformed);
        }
        let iv = hex::decode(parts[0]).map_err(|_| VaultError::Decryption("malformed payload"))?;
        let tag = hex::decode(parts[1]).map_err(|_| VaultError::Decryption("malformed payload"))?;
        let data = hex::decode(parts[2]).map_err(|_| VaultError::Decryption("malformed payload"))?;
        if iv.len() != CRYPTO_IV_SIZE || tag.len() != CRYPTO_TAG_SIZE {
            return Err(malformed);
        }
        let mut combined = Vec::with_capacity(data.len() + tag.len());
        combined.extend_from_slice(&data);
        combined.extend_from_slice(&tag);
        let nonce = aes_gcm::Nonce::from_slice(&iv);
        let decrypted = cipher
            .decrypt(nonce, combined.as_ref())
            .map_err(|_| VaultError::Decryption("key mismatch or tampered payload"))?;
        String::from_utf8(decrypted).map_err(|_| VaultError::Decryption("plaintext is not UTF-8"))
    }

    /// Decrypts `secret` and returns the credential snippet with its
    /// parameter bindings. The plaintext only lives inside the bindings.
    pub fn render_credential_script(
        &self,
        username: &str,
        secret: &EncryptedSecret,
    ) -> Result<CredentialScript, VaultError> {
        let password = self.decrypt(secret)?;
        self.logger.debug(
            "rendered credential script",
            Some(&serde_json::json!({ "username": username })),
        );
        Ok(CredentialScript {
            script: CREDENTIAL_SCRIPT,
            bindings: vec![
                (ENV_REMOTE_USER.to_string(), username.to_string()),
                (ENV_REMOTE_SECRET.to_string(), password),
            ],
        })
    }

    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "initialized": self.is_initialized(),
            "encrypted": self.counters.encrypted.load(Ordering::Relaxed),
            "decrypted": self.counters.decrypted.load(Ordering::Relaxed),
            "failed": self.counters.failed.load(Ordering::Relaxed),
        })
    }

    pub fn encrypt_count(&self) -> u64 {
        self.counters.encrypted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_key_path() -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("envgate-vault-{}", uuid::Uuid::new_v4()))
            .join("crypto.key")
    }

    fn vault_with(byte: u8) -> Vault {
        Vault::from_key_bytes(&[byte; CRYPTO_KEY_SIZE], Logger::new("test"))
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let vault = vault_with(7);
        for password in ["", "p@ss w0rd", "\"quoted\" $(rm -rf /)", "пароль\u{1F600}"] {
            let secret = vault.encrypt(password).expect("encrypt");
            assert_ne!(secret.as_payload(), password);
            assert_eq!(vault.decrypt(&secret).expect("decrypt"), password);
        }
    }

    #[test]
    fn ciphertexts_use_fresh_nonces() {
        let vault = vault_with(7);
        let a = vault.encrypt("same").expect("encrypt");
        let b = vault.encrypt("same").expect("encrypt");
        assert_ne!(a, b);
    }

    #[test]
    fn decrypt_with_other_key_is_decryption_error() {
        let secret = vault_with(1).encrypt("hunter2").expect("encrypt");
        let err = vault_with(2).decrypt(&secret).expect_err("must fail");
        assert!(matches!(err, VaultError::Decryption(_)));
    }

    #[test]
    fn malformed_payloads_are_decryption_errors() {
        let vault = vault_with(3);
        for payload in ["", "abc", "zz:zz:zz", "00:00:00", "a:b:c:d"] {
            let err = vault
                .decrypt(&EncryptedSecret::from_payload(payload))
                .expect_err("must fail");
            assert!(matches!(err, VaultError::Decryption(_)), "{payload}");
        }
    }

    #[test]
    fn uninitialized_vault_refuses_work() {
        let vault = Vault::uninitialized(&Logger::new("test"));
        assert!(matches!(vault.encrypt("x"), Err(VaultError::NotInitialized)));
        assert!(matches!(
            vault.decrypt(&EncryptedSecret::from_payload("a:b:c")),
            Err(VaultError::NotInitialized)
        ));
    }

    #[test]
    fn obtain_key_persists_and_reloads() {
        let path = tmp_key_path();
        let first = obtain_key(&path).expect("create");
        assert!(path.exists());
        let second = obtain_key(&path).expect("reload");
        assert_eq!(first, second);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).expect("meta").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn corrupt_key_file_is_key_io_error() {
        let path = tmp_key_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not-a-key").unwrap();
        assert!(matches!(obtain_key(&path), Err(VaultError::KeyFormat(_))));
    }

    #[test]
    fn credential_script_keeps_values_out_of_text() {
        let vault = vault_with(9);
        let secret = vault.encrypt("p\"; Stop-Computer; \"").expect("encrypt");
        let script = vault
            .render_credential_script("ops", &secret)
            .expect("render");
        assert!(!script.script.contains("Stop-Computer"));
        assert!(!format!("{:?}", script).contains("Stop-Computer"));
        let bindings = script.into_bindings();
        assert!(bindings
            .iter()
            .any(|(k, v)| k == ENV_REMOTE_SECRET && v == "p\"; Stop-Computer; \""));
        assert!(bindings.iter().any(|(k, v)| k == ENV_REMOTE_USER && v == "ops"));
    }

    #[test]
    fn encrypted_secret_debug_is_redacted() {
        let secret = vault_with(4).encrypt("hunter2").expect("encrypt");
        assert_eq!(format!("{:?}", secret), "EncryptedSecret([REDACTED])");
    }
}
