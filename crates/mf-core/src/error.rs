//! Unified error type for mediaflow.
//!
//! All crates funnel their failures into [`Error`]. Submission-time failures
//! are returned to the caller; execution-time failures are rendered with
//! `to_string()` into the job record's `error` field and never thrown back.

use std::fmt;

/// Unified error type covering all failure modes in mediaflow.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job", "blob").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested output format is not in the allow-list.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Another worker won the claim for this job. Internal only.
    #[error("Claim lost for job {job_id}")]
    ClaimLost {
        /// The job whose claim was lost.
        job_id: String,
    },

    /// The input blob could not be fetched.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// The external transcode step failed.
    #[error("Transcode error: {0}")]
    Transcode(String),

    /// The output could not be uploaded.
    #[error("Upload error: {0}")]
    Upload(String),

    /// An external process exceeded its execution budget and was killed.
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// A database operation failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool could not be run or returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::UnsupportedFormat(_) => 400,
            Error::ClaimLost { .. } => 409,
            Error::Fetch(_) => 502,
            Error::Transcode(_) => 500,
            Error::Upload(_) => 502,
            Error::Timeout(_) => 504,
            Error::Database { .. } => 500,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Validation(_) => "validation_error",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::ClaimLost { .. } => "claim_lost",
            Error::Fetch(_) => "fetch_error",
            Error::Transcode(_) => "transcode_error",
            Error::Upload(_) => "upload_error",
            Error::Timeout(_) => "timeout_error",
            Error::Database { .. } => "database_error",
            Error::Io { .. } => "io_error",
            Error::Tool { .. } => "tool_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Errors rejected before a job record exists.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::UnsupportedFormat(_))
    }

    /// Errors that terminate a claimed job and are persisted into it.
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Error::Fetch(_) | Error::Transcode(_) | Error::Upload(_) | Error::Timeout(_)
        )
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::ClaimLost`].
    pub fn claim_lost(job_id: impl fmt::Display) -> Self {
        Error::ClaimLost {
            job_id: job_id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("job", "abc-123");
        assert_eq!(err.to_string(), "job not found: abc-123");
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn unsupported_format_is_validation() {
        let err = Error::UnsupportedFormat("exe".into());
        assert_eq!(err.to_string(), "Unsupported format: exe");
        assert_eq!(err.http_status(), 400);
        assert!(err.is_validation());
        assert!(!err.is_execution_failure());
    }

    #[test]
    fn execution_failures_classified() {
        assert!(Error::Fetch("gone".into()).is_execution_failure());
        assert!(Error::Transcode("exit 1".into()).is_execution_failure());
        assert!(Error::Upload("denied".into()).is_execution_failure());
        assert!(Error::Timeout("after 5s".into()).is_execution_failure());
        assert!(!Error::claim_lost("j1").is_execution_failure());
    }

    #[test]
    fn claim_lost_display() {
        let err = Error::claim_lost("j-1");
        assert_eq!(err.to_string(), "Claim lost for job j-1");
        assert_eq!(err.code(), "claim_lost");
    }

    #[test]
    fn database_display() {
        let err = Error::database("connection refused");
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "exit code 1");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: exit code 1");
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn timeout_display() {
        let err = Error::Timeout("ffmpeg killed after 2s".into());
        assert_eq!(err.to_string(), "Timeout error: ffmpeg killed after 2s");
        assert_eq!(err.http_status(), 504);
    }
}
