// ABOUTME: Run state marker types for the type state pattern.
// ABOUTME: Each stage carries the data produced so far, so later stages cannot run early.

use std::sync::Arc;

use crate::cloud::{InstanceHandle, InstanceInfo};
use crate::request::DeploymentRequest;

use super::error::DeployError;
use super::orchestrator::{Collaborators, OrchestratorSettings};
use super::scope::DeployScope;
use super::status::StatusHandle;

/// Initial state: request accepted, nothing created.
/// Available actions: `generate_boot_config()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Initialized;

/// Boot configuration rendered.
/// Available actions: `provision()`
#[derive(Debug, Clone)]
pub struct BootConfigured {
    pub(crate) boot_config: String,
}

/// Instance created and recorded in the rollback manifest.
/// Available actions: `await_ready()`
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub(crate) handle: InstanceHandle,
}

/// Instance reports a running power state.
/// Available actions: `join_mesh()`
#[derive(Debug, Clone)]
pub struct Ready {
    pub(crate) instance: InstanceInfo,
}

/// Mesh registration done (or skipped).
/// Available actions: `run_tasks()`
#[derive(Debug, Clone)]
pub struct MeshJoined {
    pub(crate) instance: InstanceInfo,
}

/// Every post-boot task attempted.
/// Available actions: `final_validation()`
#[derive(Debug, Clone)]
pub struct TasksDone {
    pub(crate) instance: InstanceInfo,
}

/// Final validation done.
/// Available actions: `finish()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Validated;

/// Everything a run needs besides its stage data.
#[derive(Clone)]
pub struct RunContext {
    pub(crate) deps: Arc<Collaborators>,
    pub(crate) settings: Arc<OrchestratorSettings>,
    pub(crate) request: Arc<DeploymentRequest>,
    pub(crate) status: StatusHandle,
    pub(crate) scope: DeployScope,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("instance", &self.request.name)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// A deployment run, parameterized by its current stage.
#[derive(Debug)]
pub struct Run<S> {
    pub(crate) ctx: RunContext,
    pub(crate) state: S,
}

impl Run<Initialized> {
    pub(crate) fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            state: Initialized,
        }
    }
}

impl<S> Run<S> {
    pub fn request(&self) -> &DeploymentRequest {
        &self.ctx.request
    }

    pub fn status(&self) -> &StatusHandle {
        &self.ctx.status
    }
}

impl Run<Ready> {
    pub fn instance(&self) -> &InstanceInfo {
        &self.state.instance
    }
}

impl Run<Provisioned> {
    pub fn handle(&self) -> &InstanceHandle {
        &self.state.handle
    }
}

/// A run that stopped on an unrecoverable error.
#[derive(Debug)]
pub struct Aborted {
    pub(crate) ctx: RunContext,
    pub error: DeployError,
}
