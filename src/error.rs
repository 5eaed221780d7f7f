//! Error types for divert.

use thiserror::Error;

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failure of a single upstream resolution attempt.
///
/// Every variant triggers the same failover path; only `PoolExhausted`
/// is ever visible past the orchestrator, and then only as an empty
/// answer to the client.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("upstream timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("upstream answered rcode {rcode}")]
    Refused { rcode: u8 },

    #[error("upstream answered without an A record")]
    NoAnswer,

    #[error("response ID does not match query")]
    IdMismatch,

    #[error("all servers in the pool failed")]
    PoolExhausted,
}
