// ABOUTME: Deployment orchestrator driving runs through their stages.
// ABOUTME: Accepts requests, publishes status, performs auto and explicit cleanup.

use std::future::Future;
use std::sync::Arc;

use crate::cloud::{AzCliProvisioner, CloudProvisioner};
use crate::config::{CloudConfig, Config, MeshConfig, OrchestratorConfig};
use crate::mesh::{KubectlRegistrar, MeshRegistrar};
use crate::request::{DeploymentRequest, Policy};
use crate::tasks::{HyperProbe, SshExecutor, TaskRunner};
use crate::types::InstanceName;

use super::error::DeployError;
use super::lock::Registry;
use super::rollback::{CleanupReport, teardown};
use super::scope::DeployScope;
use super::state::{Aborted, Initialized, Run, RunContext, Validated};
use super::status::{DeploymentState, DeploymentStatus, Note, NoteKind, StatusHandle};

/// External capabilities a run depends on.
pub struct Collaborators {
    pub provisioner: Arc<dyn CloudProvisioner>,
    pub registrar: Arc<dyn MeshRegistrar>,
    pub tasks: TaskRunner,
}

/// Configuration sections the orchestrator reads.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    pub orchestrator: OrchestratorConfig,
    pub cloud: CloudConfig,
    pub mesh: MeshConfig,
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            orchestrator: config.orchestrator.clone(),
            cloud: config.cloud.clone(),
            mesh: config.mesh.clone(),
        }
    }
}

/// Drives deployments. Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Orchestrator {
    deps: Arc<Collaborators>,
    settings: Arc<OrchestratorSettings>,
    registry: Registry,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(deps: Collaborators, settings: OrchestratorSettings) -> Self {
        Self {
            deps: Arc::new(deps),
            settings: Arc::new(settings),
            registry: Registry::new(),
        }
    }

    /// Wire the command-line backed collaborators from configuration.
    pub fn from_config(config: &Config) -> Self {
        let tasks = TaskRunner::new(
            Arc::new(SshExecutor::new(config.ssh.clone())),
            Arc::new(HyperProbe::new()),
        )
        .with_settings(&config.orchestrator);

        let deps = Collaborators {
            provisioner: Arc::new(AzCliProvisioner::new(&config.cloud)),
            registrar: Arc::new(KubectlRegistrar::new(config.mesh.clone())),
            tasks,
        };
        Self::new(deps, OrchestratorSettings::from(config))
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run a deployment to completion and return its final status.
    ///
    /// Rejected requests (invalid, or a same-name run in flight) return an
    /// error and leave no status behind. The run itself is spawned, so
    /// dropping the returned future does not abandon it; use
    /// [`Orchestrator::cancel`] to stop a run.
    pub async fn deploy(&self, request: DeploymentRequest) -> Result<DeploymentStatus, DeployError> {
        let (status, run) = self.accept(request)?;
        match tokio::spawn(run).await {
            Ok(finished) => Ok(finished),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(status.snapshot()),
        }
    }

    /// Start a deployment in the background and return its status handle.
    pub fn submit(&self, request: DeploymentRequest) -> Result<StatusHandle, DeployError> {
        let (status, run) = self.accept(request)?;
        tokio::spawn(run);
        Ok(status)
    }

    /// Latest status of a deployment.
    pub fn status(&self, name: &InstanceName) -> Result<DeploymentStatus, DeployError> {
        self.registry
            .status(name)
            .map(|handle| handle.snapshot())
            .ok_or_else(|| DeployError::NotFound(name.to_string()))
    }

    /// Statuses of every known deployment, ordered by name.
    pub fn statuses(&self) -> Vec<DeploymentStatus> {
        self.registry
            .names()
            .iter()
            .filter_map(|name| self.registry.status(name))
            .map(|handle| handle.snapshot())
            .collect()
    }

    /// Signal a running deployment to stop.
    ///
    /// Returns false when the deployment is known but already finished.
    pub fn cancel(&self, name: &InstanceName) -> Result<bool, DeployError> {
        if let Some(cancel) = self.registry.cancel_handle(name) {
            tracing::info!(instance = %name, "Cancelling deployment");
            cancel.cancel();
            return Ok(true);
        }
        if self.registry.status(name).is_some() {
            return Ok(false);
        }
        Err(DeployError::NotFound(name.to_string()))
    }

    /// Register a status recorded elsewhere (e.g. loaded from disk) so it
    /// can be inspected and cleaned up.
    pub fn adopt(&self, status: DeploymentStatus) -> Result<StatusHandle, DeployError> {
        let name = status.name.clone();
        let _lock = self.registry.acquire(&name)?;
        let handle = StatusHandle::new(status);
        self.registry.publish(&name, handle.clone(), None);
        Ok(handle)
    }

    /// Tear down every resource a deployment still holds, newest first.
    ///
    /// Safe to call repeatedly: released resources are skipped.
    pub async fn cleanup(&self, name: &InstanceName) -> Result<CleanupReport, DeployError> {
        let _lock = self.registry.acquire(name)?;
        let status = self
            .registry
            .status(name)
            .ok_or_else(|| DeployError::NotFound(name.to_string()))?;

        tracing::info!(instance = %name, "Cleaning up deployment");
        let (scope, _cancel) = DeployScope::new(self.settings.orchestrator.cleanup_timeout);
        Ok(release_all(&self.deps, &status, &scope).await)
    }

    fn accept(
        &self,
        request: DeploymentRequest,
    ) -> Result<(StatusHandle, impl Future<Output = DeploymentStatus> + Send + 'static), DeployError>
    {
        request.validate()?;
        let lock = self.registry.acquire(&request.name)?;

        let policy = request.policy(&self.settings.orchestrator);
        let (scope, cancel) = DeployScope::new(policy.timeout);
        let status = StatusHandle::new(DeploymentStatus::new(request.name.clone()));
        self.registry
            .publish(&request.name, status.clone(), Some(cancel));

        let ctx = RunContext {
            deps: Arc::clone(&self.deps),
            settings: Arc::clone(&self.settings),
            request: Arc::new(request),
            status: status.clone(),
            scope,
        };

        let run = async move {
            let _lock = lock;
            execute(ctx, policy).await
        };
        Ok((status, run))
    }
}

async fn execute(ctx: RunContext, policy: Policy) -> DeploymentStatus {
    tracing::info!(
        instance = %ctx.request.name,
        "Starting deployment (timeout {:?}, auto_cleanup {})",
        policy.timeout,
        policy.auto_cleanup
    );

    match drive(Run::new(ctx)).await {
        Ok(run) => run.finish(),
        Err(aborted) => fail(aborted, policy).await,
    }
}

async fn drive(run: Run<Initialized>) -> Result<Run<Validated>, Aborted> {
    run.generate_boot_config()?
        .provision()
        .await?
        .await_ready()
        .await?
        .join_mesh()
        .await?
        .run_tasks()
        .await?
        .final_validation()
        .await
}

async fn fail(aborted: Aborted, policy: Policy) -> DeploymentStatus {
    let Aborted { ctx, error } = aborted;
    tracing::error!(instance = %ctx.request.name, "Deployment failed: {}", error);
    ctx.status.update(|s| s.fail(&error));

    if policy.auto_cleanup && error.triggers_cleanup() {
        // The run's own scope may already be expired; cleanup gets a fresh one.
        let (scope, _cancel) = DeployScope::new(ctx.settings.orchestrator.cleanup_timeout);
        release_all(&ctx.deps, &ctx.status, &scope).await;
    }

    ctx.status.snapshot()
}

async fn release_all(
    deps: &Collaborators,
    status: &StatusHandle,
    scope: &DeployScope,
) -> CleanupReport {
    let mut manifest = status.snapshot().resources;
    let report = teardown(
        &mut manifest,
        deps.provisioner.as_ref(),
        deps.registrar.as_ref(),
        scope,
    )
    .await;

    status.amend(|s| {
        s.resources = manifest;
        for failure in &report.failed {
            s.note(Note::new(
                NoteKind::CleanupFailed,
                format!("failed to release {}: {}", failure.resource, failure.error),
            ));
        }
        if report.all_succeeded() && s.state != DeploymentState::CleanedUp {
            s.enter(DeploymentState::CleanedUp);
        }
        if !report.is_empty() || s.cleanup.is_none() {
            s.cleanup = Some(report.clone());
        }
    });

    if report.all_succeeded() {
        tracing::info!("Released {} resource(s)", report.released.len());
    } else {
        tracing::warn!(
            "Released {} resource(s), {} failed",
            report.released.len(),
            report.failed.len()
        );
    }
    report
}
