// ABOUTME: Observable progress and outcome of a deployment run.
// ABOUTME: Published through a lock-guarded handle so pollers never see a half-applied update.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::cloud::InstanceInfo;
use crate::mesh::MeshFiles;
use crate::types::InstanceName;

use super::error::{DeployError, DeployErrorKind};
use super::manifest::RollbackManifest;
use super::rollback::CleanupReport;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Init,
    GeneratingBootConfig,
    Provisioning,
    AwaitingReady,
    MeshRegistering,
    RunningTasks,
    FinalValidation,
    Completed,
    Failed,
    CleanedUp,
}

impl DeploymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Completed | DeploymentState::Failed | DeploymentState::CleanedUp
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::Init => "init",
            DeploymentState::GeneratingBootConfig => "generating_boot_config",
            DeploymentState::Provisioning => "provisioning",
            DeploymentState::AwaitingReady => "awaiting_ready",
            DeploymentState::MeshRegistering => "mesh_registering",
            DeploymentState::RunningTasks => "running_tasks",
            DeploymentState::FinalValidation => "final_validation",
            DeploymentState::Completed => "completed",
            DeploymentState::Failed => "failed",
            DeploymentState::CleanedUp => "cleaned_up",
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level result of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed,
}

/// Categories of advisory findings that did not fail the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    WorkloadRegistrationFailed,
    ServiceRegistrationFailed,
    TaskFailed,
    MeshValidationFailed,
    CleanupFailed,
}

/// An advisory finding recorded on the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub kind: NoteKind,
    pub message: String,
}

impl Note {
    pub fn new(kind: NoteKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A task that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub name: String,
    pub error: String,
    pub attempts: u32,
}

/// The error that ended a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: DeployErrorKind,
    pub message: String,
}

impl From<&DeployError> for ErrorRecord {
    fn from(err: &DeployError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub name: InstanceName,
    pub state: DeploymentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Every state entered, in order.
    #[serde(default)]
    pub history: Vec<DeploymentState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    #[serde(default)]
    pub failed_tasks: Vec<TaskFailure>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceInfo>,
    /// Generated mesh files for the instance, once trust material exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_files: Option<MeshFiles>,
    #[serde(default)]
    pub resources: RollbackManifest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupReport>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentStatus {
    pub fn new(name: InstanceName) -> Self {
        let now = Utc::now();
        Self {
            name,
            state: DeploymentState::Init,
            outcome: None,
            history: vec![DeploymentState::Init],
            current_task: None,
            completed_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            notes: Vec::new(),
            error: None,
            instance: None,
            mesh_files: None,
            resources: RollbackManifest::new(),
            cleanup: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Completed, but with failed tasks or advisory notes.
    pub fn is_degraded(&self) -> bool {
        self.outcome == Some(Outcome::Completed)
            && (!self.failed_tasks.is_empty() || !self.notes.is_empty())
    }

    pub fn has_completed(&self, stage: &str) -> bool {
        self.completed_tasks.iter().any(|s| s == stage)
    }

    pub(crate) fn enter(&mut self, state: DeploymentState) {
        self.state = state;
        self.history.push(state);
        self.current_task = None;
    }

    pub(crate) fn complete_stage(&mut self, stage: impl Into<String>) {
        self.completed_tasks.push(stage.into());
    }

    /// Record an advisory finding, logging it.
    pub(crate) fn note(&mut self, note: Note) {
        tracing::warn!(instance = %self.name, "{}", note.message);
        self.notes.push(note);
    }

    pub(crate) fn fail(&mut self, err: &DeployError) {
        self.enter(DeploymentState::Failed);
        self.outcome = Some(Outcome::Failed);
        self.error = Some(ErrorRecord::from(err));
    }

    pub(crate) fn finish(&mut self) {
        self.enter(DeploymentState::Completed);
        self.outcome = Some(Outcome::Completed);
    }
}

/// Shared, synchronized view of one run's status.
///
/// The run writes through [`StatusHandle::update`]; everyone else reads
/// whole snapshots.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<RwLock<DeploymentStatus>>,
}

impl StatusHandle {
    pub fn new(status: DeploymentStatus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(status)),
        }
    }

    pub fn snapshot(&self) -> DeploymentStatus {
        self.inner.read().clone()
    }

    pub fn state(&self) -> DeploymentState {
        self.inner.read().state
    }

    pub fn is_terminal(&self) -> bool {
        self.inner.read().is_terminal()
    }

    /// Apply a forward-run mutation. Terminal statuses are left untouched.
    pub(crate) fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut DeploymentStatus),
    {
        let mut status = self.inner.write();
        if status.is_terminal() {
            tracing::debug!(instance = %status.name, "Ignoring update to finished deployment");
            return false;
        }
        f(&mut status);
        status.updated_at = Utc::now();
        true
    }

    /// Apply a cleanup-phase mutation, which may touch terminal statuses.
    pub(crate) fn amend<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut DeploymentStatus) -> T,
    {
        let mut status = self.inner.write();
        let result = f(&mut status);
        status.updated_at = Utc::now();
        result
    }
}
