//! Engine configuration
//!
//! Defaults, overlaid by an optional YAML file and `DEVPUSH_*` environment
//! variables (a `.env` file is honoured by the binary).

pub mod app_config;

pub use app_config::{
    EngineConfig, ImageConfig, RegistryConfig, TimeoutConfig, ToolConfig, CONFIG_FILE_NAME,
    LOCAL_STATE_DIR,
};
