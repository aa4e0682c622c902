//! Error types for SAS session staging.
//!
//! Every failure in the staging pipeline is fatal to the run. The variants
//! below are grouped by the stage that produces them so callers can report a
//! meaningful category and exit code.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the session library.
#[derive(Debug, Error)]
pub enum SessionError {
    // Request errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{variable} is not set. {hint}")]
    MissingEnvironment { variable: String, hint: String },

    #[error("Invalid input for {field}: {message}")]
    InputValidation { field: String, message: String },

    // Layout errors
    #[error("Directory for {obs_id} found at {path}, will not overwrite")]
    ObservationExists { obs_id: String, path: PathBuf },

    // Acquisition errors
    #[error("Acquisition from {repository} failed: {message}")]
    Acquisition { repository: String, message: String },

    #[error("Failed to extract {path}: {message}")]
    Extraction { path: PathBuf, message: String },

    // Decryption errors
    #[error("No encryption key found. Place a file with the key in {search_dir}")]
    KeyNotFound { search_dir: PathBuf },

    #[error("Multiple possible encryption key files: {candidates:?}")]
    AmbiguousKey { candidates: Vec<PathBuf> },

    #[error("Decryption of {path} failed: {message}")]
    Decryption { path: PathBuf, message: String },

    // Calibration errors
    #[error("{program} failed to complete (exit code {code:?})")]
    ToolFailed { program: String, code: Option<i32> },

    #[error("Failed to run {program}: {message}")]
    ToolLaunch { program: String, message: String },

    #[error("Expected output missing: {path}")]
    OutputMissing { path: PathBuf },

    #[error("SAS summary file PATH {found} mismatches {expected}")]
    SummaryPathMismatch { expected: PathBuf, found: PathBuf },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Coarse classification of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Environment,
    Conflict,
    Acquisition,
    Extraction,
    Decryption,
    Subprocess,
    OutputValidation,
    InputValidation,
    Io,
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {err}")
        } else {
            err.to_string()
        };
        SessionError::Acquisition {
            repository: "esa".to_string(),
            message,
        }
    }
}

impl SessionError {
    /// Create an IO error with a short description of the failed action.
    pub fn io(action: &str, path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        SessionError::Io {
            message: format!("{action}: {err}"),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        SessionError::Config {
            message: message.into(),
        }
    }

    pub fn input(field: impl Into<String>, message: impl Into<String>) -> Self {
        SessionError::InputValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Classify the error into one of the pipeline failure categories.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Config { .. } => ErrorKind::Configuration,
            SessionError::MissingEnvironment { .. } => ErrorKind::Environment,
            SessionError::InputValidation { .. } => ErrorKind::InputValidation,
            SessionError::ObservationExists { .. } => ErrorKind::Conflict,
            SessionError::Acquisition { .. } => ErrorKind::Acquisition,
            SessionError::Extraction { .. } => ErrorKind::Extraction,
            SessionError::KeyNotFound { .. }
            | SessionError::AmbiguousKey { .. }
            | SessionError::Decryption { .. } => ErrorKind::Decryption,
            SessionError::ToolFailed { .. } | SessionError::ToolLaunch { .. } => {
                ErrorKind::Subprocess
            }
            SessionError::OutputMissing { .. } | SessionError::SummaryPathMismatch { .. } => {
                ErrorKind::OutputValidation
            }
            SessionError::Io { .. } | SessionError::Json { .. } => ErrorKind::Io,
        }
    }

    /// Process exit code for the `startsas` binary.
    ///
    /// - 2: configuration or input validation
    /// - 3: environment not initialized
    /// - 4: observation directory conflict
    /// - 5: acquisition or extraction
    /// - 6: decryption
    /// - 7: calibration tool failure
    /// - 8: output validation
    /// - 1: everything else
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Configuration | ErrorKind::InputValidation => 2,
            ErrorKind::Environment => 3,
            ErrorKind::Conflict => 4,
            ErrorKind::Acquisition | ErrorKind::Extraction => 5,
            ErrorKind::Decryption => 6,
            ErrorKind::Subprocess => 7,
            ErrorKind::OutputValidation => 8,
            ErrorKind::Io => 1,
        }
    }
}
