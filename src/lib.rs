pub mod app;
pub mod constants;
pub mod errors;

pub mod managers {
    pub mod gateway;
    pub mod mock_spawner;
    pub mod probe;
    pub mod process;
    pub mod selector;
}

pub mod services {
    pub mod catalog;
    pub mod config;
    pub mod logger;
    pub mod operator;
    pub mod registry;
    pub mod validation;
    pub mod vault;
}

pub mod utils {
    pub mod paths;
    pub mod redact;
    pub mod text;
}

pub use app::Console;
