//! Error types for retrieval and extraction

use thiserror::Error;

/// Result type for libweb operations
pub type Result<T> = std::result::Result<T, WebError>;

/// Errors that can occur while assembling requests, talking to a data
/// source, or extracting records from its response
#[derive(Error, Debug)]
pub enum WebError {
    /// A template placeholder had no matching option
    #[error("Missing option '{name}' in template '{template}'")]
    MissingOption { name: String, template: String },

    /// The job configuration is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network or DNS failure
    #[error("Transport error: {message}")]
    Transport { message: String, retryable: bool },

    /// HTTP error response not covered by the ignored status codes
    #[error("HTTP error {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Malformed JSON, XML or HTML
    #[error("{format} parse error: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    /// The sniffed container type could not be opened
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WebError {
    /// Shorthand for a non-retryable transport failure
    pub fn transport(message: impl Into<String>) -> Self {
        WebError::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Shorthand for a parse failure in the given format
    pub fn parse(format: &'static str, message: impl ToString) -> Self {
        WebError::Parse {
            format,
            message: message.to_string(),
        }
    }

    /// Configuration errors are caller mistakes and are never swallowed
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            WebError::MissingOption { .. } | WebError::Configuration(_)
        )
    }

    /// Whether retrying the same request could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, WebError::Transport { retryable: true, .. })
    }
}

#[cfg(feature = "http-client")]
impl From<reqwest::Error> for WebError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            WebError::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else if err.is_builder() {
            WebError::Configuration(err.to_string())
        } else {
            WebError::Transport {
                retryable: err.is_timeout() || err.is_connect(),
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for WebError {
    fn from(err: serde_json::Error) -> Self {
        WebError::parse("JSON", err)
    }
}

impl From<toml::de::Error> for WebError {
    fn from(err: toml::de::Error) -> Self {
        WebError::Configuration(err.to_string())
    }
}

impl From<zip::result::ZipError> for WebError {
    fn from(err: zip::result::ZipError) -> Self {
        WebError::Decompression(err.to_string())
    }
}
