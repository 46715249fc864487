use std::env;
use std::path::PathBuf;

fn normalize_env_path(value: Option<String>) -> Option<PathBuf> {
    let raw = value?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if lowered == "undefined" || lowered == "null" {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

fn resolve_home_dir() -> Option<PathBuf> {
    env::var("HOME")
        .ok()
        .or_else(|| env::var("USERPROFILE").ok())
        .map(PathBuf::from)
}

fn resolve_xdg_state_dir() -> Option<PathBuf> {
    if let Some(path) = normalize_env_path(env::var("XDG_STATE_HOME").ok()) {
        return Some(path);
    }
    resolve_home_dir().map(|home| home.join(".local").join("state"))
}

fn resolve_entry_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
}

/// Protected directory holding the key file and optional catalog override.
pub fn resolve_instance_dir() -> PathBuf {
    if let Some(path) = normalize_env_path(env::var("ENVGATE_INSTANCE_DIR").ok()) {
        return path;
    }
    if let Some(path) = resolve_xdg_state_dir() {
        return path.join("envgate").join("instance");
    }
    resolve_entry_dir()
        .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
        .join("instance")
}

pub fn resolve_key_path() -> PathBuf {
    if let Some(path) = normalize_env_path(env::var("ENVGATE_KEY_PATH").ok()) {
        return path;
    }
    resolve_instance_dir().join("crypto.key")
}

/// Explicit override first; otherwise the instance file, only if it exists.
pub fn resolve_environments_path() -> Option<PathBuf> {
    if let Some(path) = normalize_env_path(env::var("ENVGATE_ENVIRONMENTS_PATH").ok()) {
        return Some(path);
    }
    let candidate = resolve_instance_dir().join("environments.json");
    candidate.exists().then_some(candidate)
}
