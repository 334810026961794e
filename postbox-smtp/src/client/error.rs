//! Error types for the SMTP client.

use std::io;

use thiserror::Error;

/// Errors that can occur when using the SMTP client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// The server answered with a code the conversation did not expect.
    #[error("Unexpected SMTP status code: {code} - {message}")]
    UnexpectedResponse { code: u16, message: String },

    /// The server returned an error status code (4xx or 5xx).
    #[error("SMTP error: {code} - {message}")]
    SmtpError { code: u16, message: String },

    /// The server refused the supplied credentials.
    #[error("Authentication rejected: {code} - {message}")]
    AuthenticationFailed { code: u16, message: String },

    /// Credentials are configured but the server offers no mechanism we speak.
    #[error("No supported AUTH mechanism advertised (server offers: {0})")]
    NoAuthMechanism(String),

    /// TLS/SSL error occurred.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// The message could not be composed.
    #[error("Invalid message: {0}")]
    Compose(String),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// Turn a non-success reply into the matching error.
    #[must_use]
    pub fn from_reply(code: u16, message: String) -> Self {
        if (400..600).contains(&code) {
            Self::SmtpError { code, message }
        } else {
            Self::UnexpectedResponse { code, message }
        }
    }
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
