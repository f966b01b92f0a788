//! Settings and configuration module.
//!
//! Loads [`FetchConfig`] from JSON or from the process environment and turns
//! it into the pool, delays and policy the orchestrator consumes.

pub mod settings;

pub use settings::{
    ConfigError, ENV_DEFAULT_URL, ENV_DELAY_MAX_MS, ENV_DELAY_MIN_MS, ENV_MIN_PAGE_LENGTH,
    ENV_PROXY_HOST, ENV_PROXY_PASSWORD, ENV_PROXY_PORT_HTTP, ENV_PROXY_USER, FetchConfig,
};
