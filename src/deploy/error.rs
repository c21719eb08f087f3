// ABOUTME: Error types for deployment runs.
// ABOUTME: Separates request validation from infrastructure failures and classifies both by kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cloud::ProvisionError;
use crate::mesh::RegistrationError;

/// A request was rejected before any resource was created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("mesh service registration requested but no service_name given")]
    MissingServiceName,

    #[error("task name cannot be empty")]
    EmptyTaskName,

    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("{0} timeout must be greater than zero")]
    ZeroTimeout(String),

    #[error("{field} cannot be empty")]
    EmptyField { field: &'static str },

    #[error("administrator public key is missing")]
    MissingCredential,

    #[error("cannot resolve administrator public key: {0}")]
    UnresolvedCredential(String),

    #[error("task {task}: invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint {
        task: String,
        endpoint: String,
        reason: String,
    },

    #[error("task {0}: command cannot be empty")]
    EmptyCommand(String),

    #[error("cannot generate boot configuration: {0}")]
    BootConfig(String),
}

/// Errors that end a deployment run.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("invalid deployment request: {0}")]
    Validation(#[from] ValidationError),

    #[error("deployment of {name} already in progress (held by {holder}, pid {pid}, since {started_at})")]
    Conflict {
        name: String,
        holder: String,
        pid: u32,
        started_at: DateTime<Utc>,
    },

    #[error("no deployment named {0}")]
    NotFound(String),

    #[error("provisioning failed: {0}")]
    Provisioning(#[from] ProvisionError),

    #[error("instance {name} not running after {waited:?} (last state: {last_state})")]
    NotReady {
        name: String,
        waited: Duration,
        last_state: String,
    },

    #[error("trust material generation failed: {0}")]
    TrustMaterial(#[from] RegistrationError),

    #[error("deployment timed out during {stage}")]
    Timeout { stage: String },

    #[error("deployment cancelled during {stage}")]
    Cancelled { stage: String },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployErrorKind {
    Validation,
    Conflict,
    NotFound,
    Provisioning,
    Registration,
    Timeout,
    Cancelled,
}

impl DeployError {
    pub(crate) fn lock_held(name: &str, holder: String, pid: u32, started_at: DateTime<Utc>) -> Self {
        DeployError::Conflict {
            name: name.to_string(),
            holder,
            pid,
            started_at,
        }
    }

    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::Validation(_) => DeployErrorKind::Validation,
            DeployError::Conflict { .. } => DeployErrorKind::Conflict,
            DeployError::NotFound(_) => DeployErrorKind::NotFound,
            DeployError::Provisioning(_) => DeployErrorKind::Provisioning,
            DeployError::NotReady { .. } | DeployError::Timeout { .. } => DeployErrorKind::Timeout,
            DeployError::TrustMaterial(_) => DeployErrorKind::Registration,
            DeployError::Cancelled { .. } => DeployErrorKind::Cancelled,
        }
    }

    /// Whether created resources should be torn down when auto-cleanup is on.
    ///
    /// Rejections happen before anything exists, so only infrastructure
    /// failures qualify.
    pub fn triggers_cleanup(&self) -> bool {
        !matches!(
            self.kind(),
            DeployErrorKind::Validation | DeployErrorKind::Conflict | DeployErrorKind::NotFound
        )
    }
}
