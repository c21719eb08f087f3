// ABOUTME: Deployment orchestration using the type state pattern.
// ABOUTME: Exports the orchestrator, run stages, status records, and rollback accounting.

mod boot;
mod error;
mod lock;
mod manifest;
mod orchestrator;
mod rollback;
mod scope;
mod state;
mod status;
mod transitions;

pub use boot::{BootConfig, BootFile};
pub use error::{DeployError, DeployErrorKind, ValidationError};
pub use lock::{DeployLock, LockInfo, Registry};
pub use manifest::{Resource, ResourceKind, RollbackManifest};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorSettings};
pub use rollback::{CleanupFailure, CleanupReport, teardown};
pub use scope::{CancelHandle, DeployScope, Interrupted};
pub use state::{
    Aborted, BootConfigured, Initialized, MeshJoined, Provisioned, Ready, Run, RunContext,
    TasksDone, Validated,
};
pub use status::{
    DeploymentState, DeploymentStatus, ErrorRecord, Note, NoteKind, Outcome, StatusHandle,
    TaskFailure,
};
pub use transitions::{
    STAGE_BOOT_CONFIG, STAGE_INSTANCE_CREATED, STAGE_INSTANCE_READY, STAGE_MESH_VALIDATION,
    STAGE_SERVICE_ENTRY, STAGE_TRUST_MATERIAL, STAGE_WORKLOAD_ENTRY, TransitionResult,
};
