use axum::http::StatusCode;
use std::io;
use std::path::PathBuf;

/// Custom error type for redeploy_webhook operations
#[derive(Debug, thiserror::Error)]
pub enum RedeployError {
    #[error("Request carries no Host header")]
    MissingHost,

    #[error("No project configured for domain '{host}'")]
    UnroutedDomain { host: String },

    #[error("No project matches identifier '{identifier}'")]
    UnknownProject { identifier: String },

    #[error("Project '{project}' has no PAYLOAD_SIGNATURE configured")]
    MissingSecret { project: String },

    #[error("Signature verification failed for project '{project}'")]
    InvalidSignature { project: String },

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("Push event ref {git_ref:?} does not name a branch")]
    MissingBranch { git_ref: Option<String> },

    #[error("Failed to scan projects directory '{}': {source}", .path.display())]
    ProjectScan { path: PathBuf, source: io::Error },

    #[error("Failed to write task for project '{project}' to '{}': {source}", .path.display())]
    TaskWrite {
        project: String,
        path: PathBuf,
        source: io::Error,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RedeployError {
    /// HTTP status the caller receives for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RedeployError::MissingHost
            | RedeployError::MalformedPayload(_)
            | RedeployError::MissingBranch { .. } => StatusCode::BAD_REQUEST,
            RedeployError::UnroutedDomain { .. } | RedeployError::InvalidSignature { .. } => {
                StatusCode::FORBIDDEN
            }
            RedeployError::UnknownProject { .. } => StatusCode::NOT_FOUND,
            RedeployError::MissingSecret { .. }
            | RedeployError::ProjectScan { .. }
            | RedeployError::TaskWrite { .. }
            | RedeployError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short reason that is safe to send back to the caller.
    ///
    /// Never contains filesystem paths, secrets or payload content; the full
    /// `Display` text is for server logs only.
    pub fn public_reason(&self) -> &'static str {
        match self {
            RedeployError::MissingHost => "Missing Host header",
            RedeployError::UnroutedDomain { .. } => "No matching project for this domain",
            RedeployError::UnknownProject { .. } => "Project not found",
            RedeployError::MissingSecret { .. } => "Project is missing its payload secret",
            RedeployError::InvalidSignature { .. } => "Invalid signature",
            RedeployError::MalformedPayload(_) => "Invalid JSON",
            RedeployError::MissingBranch { .. } => "No branch in push event ref",
            RedeployError::ProjectScan { .. } => "Failed to load project configuration",
            RedeployError::TaskWrite { .. } => "Failed to create task file",
            RedeployError::ConfigError(_) => "Internal server error",
        }
    }
}

/// Helper type for Results that use RedeployError
pub type Result<T> = std::result::Result<T, RedeployError>;
