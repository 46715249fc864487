mod gate_error;
mod vault_error;

pub use gate_error::{GateError, GateErrorKind};
pub use vault_error::VaultError;
