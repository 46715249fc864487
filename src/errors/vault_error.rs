use super::GateError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Key file {path} is not accessible: {source}")]
    KeyIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Key file {0} does not contain a valid key")]
    KeyFormat(PathBuf),
    #[error("Credential vault used before a key was loaded")]
    NotInitialized,
    #[error("Stored credential could not be decrypted: {0}")]
    Decryption(&'static str),
    #[error("Failed to encrypt secret payload")]
    Encryption,
}

impl From<VaultError> for GateError {
    fn from(err: VaultError) -> Self {
        let message = err.to_string();
        match err {
            VaultError::KeyIo { .. } | VaultError::KeyFormat(_) => GateError::key_io(message)
                .with_hint(
                    "Check ENVGATE_INSTANCE_DIR / ENVGATE_KEY_PATH permissions. Replacing the key invalidates stored credentials.",
                ),
            VaultError::NotInitialized => GateError::not_initialized(message),
            VaultError::Decryption(_) => GateError::decryption(message),
            VaultError::Encryption => GateError::internal(message),
        }
    }
}
