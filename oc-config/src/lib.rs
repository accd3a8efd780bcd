//! Provider configuration and process-wide tracing setup.

mod config;
mod telemetry;

pub use config::{
    API_KEY_PLACEHOLDER, ApiKey, CONFIG_PATH_ENV, ModelAlias, ProviderConfig, ProviderModel,
    ProvidersConfig, default_config_path,
};
pub use telemetry::{LOG_FORMAT_ENV, LogFormat, init_tracing};
