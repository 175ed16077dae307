//! Unified error type for feedplay.
//!
//! Prefetch and configuration failures funnel into [`Error`]. The lifecycle
//! engine never returns these across its public surface; they end up recorded
//! on prefetch entries and in logs, and [`Error::is_transient`] tells callers
//! whether a later attempt could succeed.

use std::fmt;

/// Unified error type covering the failure modes of the engine's collaborators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Http {
        /// The response status code.
        status: u16,
        /// The requested URL.
        url: String,
    },

    /// The request never produced a response (DNS, connect, timeout, body read).
    #[error("Request to {url} failed: {source}")]
    Request {
        /// The requested URL.
        url: String,
        /// The underlying transport error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A URL could not be parsed or resolved.
    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        /// The offending input.
        url: String,
        /// The parser error.
        #[source]
        source: url::ParseError,
    },

    /// A manifest body could not be interpreted.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Configuration failed to load or validate.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Error::Request { .. } => true,
            Error::Io { .. } => true,
            Error::InvalidUrl { .. }
            | Error::Manifest(_)
            | Error::Config(_)
            | Error::Internal(_) => false,
        }
    }

    /// Convenience constructor for [`Error::Http`].
    pub fn http(status: u16, url: impl fmt::Display) -> Self {
        Error::Http {
            status,
            url: url.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Request`].
    pub fn request(
        url: impl fmt::Display,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Request {
            url: url.to_string(),
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::InvalidUrl`].
    pub fn invalid_url(url: impl Into<String>, source: url::ParseError) -> Self {
        Error::InvalidUrl {
            url: url.into(),
            source,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
