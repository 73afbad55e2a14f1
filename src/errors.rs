use thiserror::Error;

/// Why a `resolve` call produced no status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no usable server address: {0}")]
    Address(String),

    #[error("cannot connect to {address}: server may be offline ({reason})")]
    Connectivity { address: String, reason: String },
}

/// Failure of a single protocol probe.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("name resolution failed: {0}")]
    Lookup(String),

    #[error("malformed reply: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe panicked")]
    Panicked,
}

impl ProbeError {
    pub fn is_lookup(&self) -> bool {
        matches!(self, ProbeError::Lookup(_))
    }

    /// Maps socket errors so that refusals keep their own classification.
    pub fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset => {
                ProbeError::Refused(err.to_string())
            }
            _ => ProbeError::Io(err),
        }
    }
}

/// Avatar fetch failure. Always absorbed by the icon fallback chain.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown config field: {0}")]
    UnknownField(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("group {0} is not configured")]
    UnknownGroup(i64),
}
