//! Crate-wide error type.
//!
//! Every variant carries owned strings so an [`Error`] is cheap to clone.
//! The cache relies on this: a single failed computation is handed to every
//! caller that was waiting on the same key.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// A required setting (credential, feature flag) is missing or invalid.
    #[error("Config Error: {0}")]
    Config(String),

    /// A route parameter was rejected.
    #[error("Invalid Parameter: {0}")]
    InvalidParameter(String),

    /// Network failure or non-success status while talking to a site.
    #[error("Upstream Error ({url}): {message}")]
    Upstream { url: String, message: String },

    /// An operation exceeded its deadline.
    #[error("Timeout: {what} did not finish within {after_ms}ms")]
    Timeout { what: String, after_ms: u128 },

    /// A page or payload did not have the expected structure.
    #[error("Parse Error: {0}")]
    Parse(String),

    /// A cached value could not be converted to or from the requested type.
    #[error("Cache Error: {0}")]
    Cache(String),

    #[error("Browser Error: {0}")]
    Browser(String),

    #[error("Crypto Error: {0}")]
    Crypto(String),

    #[error("IO Error: {0}")]
    Io(String),
}

impl Error {
    pub fn upstream(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Upstream {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(message: impl std::fmt::Display) -> Self {
        Error::Parse(message.to_string())
    }

    /// Errors caused by the caller rather than by an upstream site.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Config(_) | Error::InvalidParameter(_))
    }

    /// Process exit status for a run that failed with this error: `2` when
    /// the request or configuration was at fault, `1` for everything else.
    pub fn exit_status(&self) -> u8 {
        if self.is_client_error() { 2 } else { 1 }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        if e.is_timeout() {
            Error::Timeout {
                what: format!("request to {url}"),
                after_ms: 0,
            }
        } else {
            Error::Upstream {
                url,
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(format!("json: {e}"))
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::InvalidParameter(format!("url: {e}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<askama::Error> for Error {
    fn from(e: askama::Error) -> Self {
        Error::Parse(format!("template: {e}"))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(format!("yaml: {e}"))
    }
}
