//! Error types for bookdrop operations.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while fetching, paginating, converting or sending a book.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Invalid EPUB: {0}")]
    InvalidEpub(String),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API limit reached, try again later")]
    RateLimited,

    #[error("Archive API error: {0}")]
    Api(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Email not sent: {0}")]
    Mail(String),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Conversion timed out after {}s", .0.as_secs())]
    ConversionTimedOut(Duration),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),
}

/// Failure taxonomy used to decide how an error is presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or archive API failure.
    RemoteUnavailable,
    /// The package cannot be opened or parsed.
    Format,
    /// Mail dispatch failed; the local file is kept.
    SendFailure,
    /// The external converter ran but did not produce a file.
    Conversion,
    /// Local file system, config or argument problems.
    Local,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Http(_) | Error::RateLimited | Error::Api(_) | Error::NotFound(_) => {
                ErrorKind::RemoteUnavailable
            }
            Error::Zip(_) | Error::Xml(_) | Error::InvalidEpub(_) | Error::Utf8(_) => {
                ErrorKind::Format
            }
            Error::Mail(_) => ErrorKind::SendFailure,
            Error::Conversion(_) | Error::ConversionTimedOut(_) => ErrorKind::Conversion,
            Error::Io(_) | Error::Json(_) | Error::Config(_) | Error::InvalidOption(_) => {
                ErrorKind::Local
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::RateLimited.kind(), ErrorKind::RemoteUnavailable);
        assert_eq!(Error::InvalidEpub("x".into()).kind(), ErrorKind::Format);
        assert_eq!(Error::Mail("x".into()).kind(), ErrorKind::SendFailure);
        assert_eq!(
            Error::ConversionTimedOut(Duration::from_secs(120)).kind(),
            ErrorKind::Conversion
        );
        assert_eq!(Error::Config("x".into()).kind(), ErrorKind::Local);
    }

    #[test]
    fn test_timeout_message() {
        let err = Error::ConversionTimedOut(Duration::from_secs(120));
        assert_eq!(err.to_string(), "Conversion timed out after 120s");
    }
}
