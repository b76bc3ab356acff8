//! Error types for session operations
//!
//! Every failure reaching the consumer carries a short title for headings and
//! a detail string that keeps the underlying remote message.

use chiron_client::ClientError;
use chiron_core::domain::application::AppKey;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by the session
#[derive(Debug, Error)]
pub enum SessionError {
    /// The workspace exposes no manager service
    #[error("No worker manager found in workspace '{0}'")]
    WorkspaceNotFound(String),

    /// A connection with this service id already exists
    #[error("Worker '{0}' is already connected")]
    DuplicateConnection(String),

    /// No connection with this service id
    #[error("Worker '{0}' is not connected")]
    WorkerNotFound(String),

    /// No application with this key on a connected worker
    #[error("Application '{0}' not found")]
    ApplicationNotFound(AppKey),

    /// The manager kept reporting that it is not initialized
    #[error("Worker '{service_id}' is still initializing after {attempts} attempts")]
    NotInitialized { service_id: String, attempts: u32 },

    /// The worker could not be reached
    #[error("Worker '{service_id}' is unreachable: {source}")]
    Unreachable {
        service_id: String,
        #[source]
        source: ClientError,
    },

    /// A remote command failed
    #[error("Failed to {operation} on '{target}': {source}")]
    Command {
        operation: &'static str,
        target: String,
        #[source]
        source: ClientError,
    },

    /// The operation is not allowed in the current state
    #[error("{0}")]
    Precondition(String),

    /// A bounded wait ran out; the remote side may still complete
    #[error(
        "Timed out after {}s waiting to {operation} on '{target}'; it may still be happening in the background",
        .waited.as_secs_f64()
    )]
    Timeout {
        operation: &'static str,
        target: String,
        waited: Duration,
    },

    /// The caller declined a destructive action
    #[error("Cancelled: {0}")]
    Declined(String),

    /// The remote deployment settled in DEPLOY_FAILED
    #[error("Deployment of '{0}' failed")]
    DeploymentFailed(AppKey),
}

impl SessionError {
    /// Wraps a remote failure with the operation and target it belongs to
    pub fn command(operation: &'static str, target: impl Into<String>, source: ClientError) -> Self {
        Self::Command {
            operation,
            target: target.into(),
            source,
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// Short heading for display
    pub fn title(&self) -> &'static str {
        match self {
            Self::WorkspaceNotFound(_) => "Workspace not found",
            Self::DuplicateConnection(_) => "Already connected",
            Self::WorkerNotFound(_) => "Worker not connected",
            Self::ApplicationNotFound(_) => "Application not found",
            Self::NotInitialized { .. } => "Worker still initializing",
            Self::Unreachable { .. } => "Worker unreachable",
            Self::Command { .. } => "Command failed",
            Self::Precondition(_) => "Not allowed",
            Self::Timeout { .. } => "Still in progress",
            Self::Declined(_) => "Cancelled",
            Self::DeploymentFailed(_) => "Deployment failed",
        }
    }

    /// Full message including the cause chain
    pub fn detail(&self) -> String {
        let mut detail = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            let text = err.to_string();
            if !detail.contains(&text) {
                detail.push_str(": ");
                detail.push_str(&text);
            }
            cause = std::error::Error::source(err);
        }
        detail
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }
}
