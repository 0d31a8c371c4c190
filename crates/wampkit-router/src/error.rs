use std::time::Duration;

/// Errors that can occur while loading or running a router.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The configuration file could not be loaded.
    #[error("failed to load router config: {0}")]
    LoadFailed(String),

    /// The configuration is not valid JSON.
    #[error("router config is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The embedded config schema could not be compiled.
    #[error("failed to compile router config schema: {0}")]
    SchemaCompile(String),

    /// The configuration does not match the config schema.
    #[error("router config failed validation: {0}")]
    SchemaViolation(String),

    /// The configuration is well-formed but unusable.
    #[error("invalid router config: {0}")]
    Invalid(String),

    /// The transport URL could not be parsed.
    #[error("invalid router url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The router process could not be spawned or signalled.
    #[error("router process error: {0}")]
    Process(#[from] std::io::Error),

    /// The router did not accept TCP connections in time.
    #[error("router at {endpoint} not ready after {timeout:?}")]
    NotReady { endpoint: String, timeout: Duration },
}

pub type Result<T> = std::result::Result<T, RouterError>;
