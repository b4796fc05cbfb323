//! use cakit::error::CaKitError;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::policy::PolicyViolation;

/// Represents errors that can occur in the cakit library.
///
/// This enum provides detailed error messages for various failure scenarios.
#[derive(Debug, Error, Clone)]
pub enum CaKitError {
    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    EncodingError(String),

    /// Error during data decoding.
    #[error("Failed to decode data: {0}")]
    DecodingError(String),

    /// Error due to invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error during key generation.
    #[error("Key generation error: {0}")]
    KeyGenerationError(String),

    /// Error related to certificate operations.
    #[error("Certificate error: {0}")]
    CertificateError(String),

    /// Error from RSA operations.
    #[error("RSA error: {0}")]
    RsaError(String),

    /// Malformed or inconsistent configuration.
    ///
    /// `line` is set when the problem can be pinned to a line of the file.
    #[error("Config error{}: {message}", .line.map(|l| format!(" at line {l}")).unwrap_or_default())]
    ConfigError { line: Option<usize>, message: String },

    /// Filesystem failure, carrying the path involved.
    #[error("I/O error on {}: {message}", .path.display())]
    IoError { path: PathBuf, message: String },

    /// The serial or index files are inconsistent or locked.
    #[error("CA database error: {0}")]
    DatabaseError(String),

    /// A request was rejected by the issuance policy.
    #[error(transparent)]
    PolicyViolation(#[from] PolicyViolation),
}

impl CaKitError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        CaKitError::ConfigError {
            line: None,
            message: message.into(),
        }
    }

    pub(crate) fn config_at(line: usize, message: impl Into<String>) -> Self {
        CaKitError::ConfigError {
            line: Some(line),
            message: message.into(),
        }
    }

    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        CaKitError::IoError {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

impl From<der::Error> for CaKitError {
    /// Converts a `der::Error` into a `CaKitError`.
    fn from(err: der::Error) -> Self {
        CaKitError::DecodingError(err.to_string())
    }
}

impl From<rsa::Error> for CaKitError {
    fn from(err: rsa::Error) -> Self {
        CaKitError::RsaError(err.to_string())
    }
}

impl From<pkcs8::Error> for CaKitError {
    fn from(err: pkcs8::Error) -> Self {
        CaKitError::DecodingError(err.to_string())
    }
}

impl From<pkcs8::spki::Error> for CaKitError {
    fn from(err: pkcs8::spki::Error) -> Self {
        CaKitError::DecodingError(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for CaKitError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        CaKitError::CertificateError(err.to_string())
    }
}
