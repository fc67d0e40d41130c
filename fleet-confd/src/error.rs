//! Daemon-level error type. Unlike `fleet_core::Error`, these variants are
//! operational: they describe what went wrong serving a request or
//! maintaining the config cache, not a malformed planning input. Per the
//! error-handling design, none of these ever crash the responder — they're
//! logged and the daemon degrades to serving the last-good snapshot.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed cluster snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cluster snapshot: {0}")]
    Cluster(#[from] fleet_core::Error),

    #[error("file watch error: {0}")]
    Notify(String),

    #[error("hmac verification failed")]
    HmacVerification,

    #[error("config file exceeds max_file_size ({actual} > {limit} bytes)")]
    FileTooLarge { actual: u64, limit: u64 },

    #[error("request handler timed out")]
    HandlerTimeout,

    #[error("invalid ssconf key {0:?}")]
    InvalidSsconfKey(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Cluster(_) => "cluster",
            Error::Notify(_) => "notify",
            Error::HmacVerification => "hmac",
            Error::FileTooLarge { .. } => "file_too_large",
            Error::HandlerTimeout => "handler_timeout",
            Error::InvalidSsconfKey(_) => "invalid_ssconf_key",
            Error::Config(_) => "config",
        }
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Error::Notify(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
