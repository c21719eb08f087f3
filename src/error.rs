// ABOUTME: Application-wide error types for meshvm.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::{DeployError, ValidationError};
use crate::types::InstanceNameError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid request {path}: {source}")]
    InvalidRequest {
        path: PathBuf,
        source: ValidationError,
    },

    #[error("no stored status for deployment: {0}")]
    StatusNotFound(String),

    #[error("deployment {0} has no generated mesh files")]
    NoMeshFiles(String),

    #[error("state directory unavailable: HOME is not set")]
    NoStateDir,

    #[error("deployment {0} failed")]
    DeploymentFailed(String),

    #[error("cleanup of {name} left {failed} resource(s) behind")]
    CleanupIncomplete { name: String, failed: usize },

    #[error(transparent)]
    InvalidName(#[from] InstanceNameError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
