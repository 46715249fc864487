pub mod network {
    pub const TIMEOUT_EXEC_DEFAULT_MS: u64 = 45_000;
    pub const TIMEOUT_PROBE_DEFAULT_MS: u64 = 20_000;
    pub const TIMEOUT_EXEC_MAX_MS: u64 = 600_000;
    pub const PIPE_DRAIN_GRACE_MS: u64 = 2_000;
}

pub mod limits {
    pub const COMMAND_SUBSTRING_LENGTH: usize = 50;
    pub const ERROR_SUBSTRING_LENGTH: usize = 400;
    pub const MAX_PROCESS_NAME_LENGTH: usize = 64;
}

pub mod buffers {
    pub const CRYPTO_KEY_SIZE: usize = 32;
    pub const CRYPTO_IV_SIZE: usize = 12;
    pub const CRYPTO_TAG_SIZE: usize = 16;
}

pub mod hosts {
    pub const LOCAL_MARKER: &str = "local";
    pub const LOCAL_NAMES: &[&str] = &["local", "localhost", "127.0.0.1", "::1"];
}

pub mod shell {
    #[cfg(windows)]
    pub const DEFAULT_PROGRAM: &str = "powershell.exe";
    #[cfg(not(windows))]
    pub const DEFAULT_PROGRAM: &str = "pwsh";
    pub const BASE_ARGS: &[&str] = &["-NoProfile", "-NonInteractive", "-Command"];

    pub const ENV_REMOTE_HOST: &str = "ENVGATE_REMOTE_HOST";
    pub const ENV_REMOTE_USER: &str = "ENVGATE_REMOTE_USER";
    pub const ENV_REMOTE_SECRET: &str = "ENVGATE_REMOTE_SECRET";
    pub const ENV_REMOTE_COMMAND: &str = "ENVGATE_REMOTE_COMMAND";

    pub const REMOTE_FAILURE_MARKER: &str = "ENVGATE-REMOTE-FAILURE:";
    pub const CONNECTIVITY_PROBE_COMMAND: &str = "$env:COMPUTERNAME";
    pub const STDERR_SEPARATOR: &str = "\nErrors:\n";
}

pub mod probe {
    pub const DEFAULT_PROCESSES: &[&str] = &["notepad", "SnippingTool", "calc", "mspaint"];
    pub const DEFAULT_SERVICES: &[&str] = &["*jboss*"];
}

pub mod catalog {
    pub const DEFAULT_ENVIRONMENTS: &[(&str, &str)] = &[
        ("Local", "local"),
        ("Prod 1", "prod1.example.com"),
        ("Prod 2", "prod2.example.com"),
    ];
}
