//! Crate-wide error taxonomy.
//!
//! [`Error`] is what resources and the dispatcher exchange; it maps directly
//! onto an HTTP status via [`Error::status`]. [`ConfigError`] is kept
//! separate because configuration failures happen outside a request (at
//! startup and inside `/api/config`) and carry their own context.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error surfaced from resource handlers up through the dispatcher.
#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("unsupported request type")]
    UnsupportedType,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration replacement rejected: {0}")]
    BadConfigurationReplacement(String),

    #[error("latency unachievable: {0}")]
    LatencyUnachievable(String),

    #[error("configuration parse error: {0}")]
    ParseException(String),
}

impl Error {
    pub fn status(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::Forbidden => 403,
            Error::NotFound => 404,
            Error::UnsupportedType => 405,
            Error::Conflict(_) => 409,
            Error::Internal(_) => 500,
            Error::BadConfigurationReplacement(_) => 409,
            Error::LatencyUnachievable(_) => 422,
            Error::ParseException(_) => 400,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "badRequest",
            Error::Forbidden => "forbidden",
            Error::NotFound => "notFound",
            Error::UnsupportedType => "unsupportedType",
            Error::Conflict(_) => "conflict",
            Error::Internal(_) => "internal",
            Error::BadConfigurationReplacement(_) => "badConfigurationReplacement",
            Error::LatencyUnachievable(_) => "latencyUnachievable",
            Error::ParseException(_) => "parseException",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Parse(msg) => Error::ParseException(msg),
            ConfigError::LatencyUnachievable(msg) => Error::LatencyUnachievable(msg),
            ConfigError::Probe(msg) => Error::Internal(msg),
            ConfigError::BadReplacement(msg) => Error::BadConfigurationReplacement(msg),
        }
    }
}

/// Errors raised while parsing, resolving, or applying configuration.
#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    #[error("parse error at {0}")]
    Parse(String),

    #[error("{0}")]
    LatencyUnachievable(String),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("{0}")]
    BadReplacement(String),
}
