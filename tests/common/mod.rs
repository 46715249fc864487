#![allow(dead_code)]

use envgate::app::Console;
use envgate::managers::mock_spawner::ScriptedSpawner;
use envgate::services::catalog::EnvironmentCatalog;
use envgate::services::config::GateConfig;
use envgate::services::logger::Logger;
use envgate::services::vault::Vault;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::sync::Mutex;

pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub fn tmp_dir(prefix: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()))
}

pub fn console_with(spawner: ScriptedSpawner) -> Console {
    let logger = Logger::new("test");
    let vault = Vault::from_key_bytes(&[42u8; 32], logger.clone());
    Console::with_components(
        logger,
        &GateConfig::default(),
        vault,
        EnvironmentCatalog::builtin(),
        Arc::new(spawner),
    )
    .expect("console")
}
