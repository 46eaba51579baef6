//! Error types for Migration Scout
//!
//! Provides structured error types for the cloud drivers, the HTTP
//! transport, and the batch host collection pipeline.

use thiserror::Error;

/// Unified error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Authentication Errors
    // =========================================================================
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Token rejected by the backend. Recovered by one re-authentication.
    #[error("Session expired or unauthorized: {0}")]
    Unauthorized(String),

    #[error("Service catalog error: {0}")]
    Catalog(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request failed with status {code}: {message}")]
    HttpRequest { code: u16, message: String },

    #[error("HTTP server error with status {code}: {message}")]
    ServerError { code: u16, message: String },

    // =========================================================================
    // Cloud Resource Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{id}")]
    NotFound { kind: String, id: String },

    #[error("Quota {resource} is not enough: used {used}, total {total}, but {needed} needed")]
    QuotaExceeded {
        resource: String,
        used: i64,
        total: i64,
        needed: i64,
    },

    #[error("Timed out after {seconds}s waiting for {kind} {id} to reach {target}")]
    ResourceTimeout {
        kind: String,
        id: String,
        target: String,
        seconds: u64,
    },

    #[error("Backend operation failed: {operation} ({resource_id}): {reason}")]
    BackendOperation {
        operation: String,
        resource_id: String,
        reason: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // Collection Errors
    // =========================================================================
    #[error("Unsupported os type {os_type} of host {host}")]
    UnsupportedOsType { os_type: String, host: String },

    #[error("Collection failed for {host}: {reason}")]
    CollectionFailed { host: String, reason: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a backend operation failure
    pub fn backend(
        operation: impl Into<String>,
        resource_id: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Error::BackendOperation {
            operation: operation.into(),
            resource_id: resource_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error is transient.
    ///
    /// Poll loops keep waiting on transient errors and surface everything
    /// else immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Error::ServerError { .. } | Error::Unauthorized(_) => true,
            Error::HttpRequest { code, .. } => *code == 408 || *code == 429,
            _ => false,
        }
    }

    /// Check if this error means the resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if this error asks for a fresh session
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_))
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_transient() {
        let err = Error::ServerError {
            code: 503,
            message: "busy".into(),
        };
        assert!(err.is_transient());

        let err = Error::HttpRequest {
            code: 429,
            message: "slow down".into(),
        };
        assert!(err.is_transient());

        let err = Error::HttpRequest {
            code: 400,
            message: "bad body".into(),
        };
        assert!(!err.is_transient());

        let err = Error::Validation("no flavor".into());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_classification() {
        let err = Error::NotFound {
            kind: "volume".into(),
            id: "vol-1".into(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_unauthorized());

        let err = Error::Unauthorized("token expired".into());
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_quota_message() {
        let err = Error::QuotaExceeded {
            resource: "vCPUs".into(),
            used: 10,
            total: 12,
            needed: 4,
        };
        assert_eq!(
            err.to_string(),
            "Quota vCPUs is not enough: used 10, total 12, but 4 needed"
        );
    }
}
