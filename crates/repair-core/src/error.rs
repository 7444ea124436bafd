//! Error taxonomy shared by every crate in the pipeline.

use thiserror::Error;

/// The error taxonomy of the repair pipeline.
///
/// Each variant corresponds to one of the step- or trace-level failure
/// kinds the task runner records; `Other` absorbs ambient failures
/// (I/O, serialization) that don't need their own surfaced kind.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("external command `{program}` failed (exit {exit_code:?}): {stderr}")]
    ExternalCommand {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("remote API error: {0}")]
    RemoteApi(String),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("path violation: {0}")]
    PathViolation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepairError {
    /// Short machine-readable kind, used as the `"error"` field of an
    /// HTTP error body and as the failure kind persisted on a step.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RepairError::Validation(_) => "validation_error",
            RepairError::Auth(_) => "auth_error",
            RepairError::ExternalCommand { .. } => "external_command_error",
            RepairError::RemoteApi(_) => "remote_api_error",
            RepairError::Workspace(_) => "workspace_error",
            RepairError::PathViolation(_) => "path_violation_error",
            RepairError::Other(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, RepairError>;
