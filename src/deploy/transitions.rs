// ABOUTME: State transition methods for deployment runs.
// ABOUTME: Each method consumes self and returns the next stage, or the aborted run on failure.

use crate::cloud::{InstanceInfo, InstanceSpec};
use crate::mesh::RegistrationHandle;
use crate::tasks::TaskTarget;

use super::boot::BootConfig;
use super::error::DeployError;
use super::manifest::Resource;
use super::scope::Interrupted;
use super::state::{
    Aborted, BootConfigured, Initialized, MeshJoined, Provisioned, Ready, Run, RunContext,
    TasksDone, Validated,
};
use super::status::{DeploymentState, DeploymentStatus, Note, NoteKind, TaskFailure};

/// Result type for transitions; failures hand back the context for cleanup.
pub type TransitionResult<T> = Result<Run<T>, Aborted>;

pub const STAGE_BOOT_CONFIG: &str = "boot_config_generated";
pub const STAGE_INSTANCE_CREATED: &str = "instance_created";
pub const STAGE_INSTANCE_READY: &str = "instance_ready";
pub const STAGE_TRUST_MATERIAL: &str = "trust_material_generated";
pub const STAGE_WORKLOAD_ENTRY: &str = "workload_entry_created";
pub const STAGE_SERVICE_ENTRY: &str = "service_entry_created";
pub const STAGE_MESH_VALIDATION: &str = "mesh_validation_passed";

// =============================================================================
// Internal Helpers
// =============================================================================

impl<S> Run<S> {
    fn transition<T>(self, state: T) -> Run<T> {
        Run {
            ctx: self.ctx,
            state,
        }
    }

    fn abort(self, error: DeployError) -> Aborted {
        Aborted {
            ctx: self.ctx,
            error,
        }
    }

    fn enter(&self, state: DeploymentState) {
        tracing::info!(instance = %self.ctx.request.name, "Entering {}", state);
        self.ctx.status.update(|s| s.enter(state));
    }

    fn note(&self, kind: NoteKind, message: String) {
        self.ctx.status.update(|s| s.note(Note::new(kind, message)));
    }
}

fn interrupted(stage: impl Into<String>, cause: Interrupted) -> DeployError {
    match cause {
        Interrupted::Cancelled => DeployError::Cancelled {
            stage: stage.into(),
        },
        Interrupted::StageTimeout | Interrupted::DeadlineExceeded => DeployError::Timeout {
            stage: stage.into(),
        },
    }
}

fn record(status: &mut DeploymentStatus, resource: Resource, stage: &str) {
    status.resources.record(resource);
    status.complete_stage(stage);
}

// =============================================================================
// Initialized -> BootConfigured
// =============================================================================

impl Run<Initialized> {
    /// Render the instance's first-boot configuration. Nothing is created.
    pub fn generate_boot_config(self) -> TransitionResult<BootConfigured> {
        self.enter(DeploymentState::GeneratingBootConfig);

        let settings = &self.ctx.settings;
        let rendered = BootConfig::generate(&self.ctx.request, &settings.cloud, &settings.mesh)
            .and_then(|config| config.render());

        match rendered {
            Ok(boot_config) => {
                self.ctx.status.update(|s| s.complete_stage(STAGE_BOOT_CONFIG));
                Ok(self.transition(BootConfigured { boot_config }))
            }
            Err(e) => Err(self.abort(e.into())),
        }
    }
}

// =============================================================================
// BootConfigured -> Provisioned
// =============================================================================

impl Run<BootConfigured> {
    /// Create the instance and record it before anything else can fail.
    pub async fn provision(self) -> TransitionResult<Provisioned> {
        self.enter(DeploymentState::Provisioning);

        let spec = match self.instance_spec() {
            Ok(spec) => spec,
            Err(e) => return Err(self.abort(e)),
        };

        let created = self
            .ctx
            .scope
            .guard(None, self.ctx.deps.provisioner.create(&spec))
            .await;

        match created {
            Ok(Ok(handle)) => {
                let resource = Resource::instance(handle.name.as_str());
                self.ctx
                    .status
                    .update(|s| record(s, resource, STAGE_INSTANCE_CREATED));
                tracing::info!(instance = %handle.name, "Instance created");
                Ok(self.transition(Provisioned { handle }))
            }
            Ok(Err(e)) => Err(self.abort(e.into())),
            Err(cause) => {
                tracing::warn!(
                    instance = %spec.name,
                    "Instance creation interrupted; the instance may exist and need manual cleanup"
                );
                Err(self.abort(interrupted(DeploymentState::Provisioning.as_str(), cause)))
            }
        }
    }

    fn instance_spec(&self) -> Result<InstanceSpec, DeployError> {
        let request = &self.ctx.request;
        let cloud = &self.ctx.settings.cloud;

        let mut tags = cloud.tags.clone();
        tags.extend(request.tags.clone());

        Ok(InstanceSpec {
            name: request.name.clone(),
            size: request.size(cloud).to_string(),
            image: request.image(cloud).to_string(),
            admin_username: request.admin_username(cloud).to_string(),
            ssh_public_key: request.ssh_public_key()?,
            tags,
            boot_config: self.state.boot_config.clone(),
        })
    }
}

// =============================================================================
// Provisioned -> Ready
// =============================================================================

impl Run<Provisioned> {
    /// Poll until the instance is running, bounded by the readiness timeout
    /// and the deployment scope.
    pub async fn await_ready(self) -> TransitionResult<Ready> {
        self.enter(DeploymentState::AwaitingReady);

        let name = self.state.handle.name.clone();
        let settings = &self.ctx.settings.orchestrator;
        let interval = settings.ready_poll_interval;
        let ready_timeout = settings.ready_timeout;
        let last_state = parking_lot::Mutex::new("unknown".to_string());

        let provisioner = &self.ctx.deps.provisioner;
        let poll = async {
            loop {
                match provisioner.get(&name).await {
                    Ok(info) if info.power_state.is_running() => return info,
                    Ok(info) => {
                        tracing::debug!(instance = %name, "Power state: {}", info.power_state);
                        *last_state.lock() = info.power_state.to_string();
                    }
                    Err(e) => {
                        tracing::warn!(instance = %name, "Readiness query failed: {}", e);
                    }
                }
                tokio::time::sleep(interval).await;
            }
        };

        let result = self.ctx.scope.guard(Some(ready_timeout), poll).await;

        match result {
            Ok(info) => {
                tracing::info!(instance = %name, "Instance running");
                self.ctx.status.update(|s| {
                    s.instance = Some(info.clone());
                    s.complete_stage(STAGE_INSTANCE_READY);
                });
                Ok(self.transition(Ready { instance: info }))
            }
            Err(Interrupted::StageTimeout) => {
                let last_state = last_state.lock().clone();
                Err(self.abort(DeployError::NotReady {
                    name: name.to_string(),
                    waited: ready_timeout,
                    last_state,
                }))
            }
            Err(cause) => Err(self.abort(interrupted(DeploymentState::AwaitingReady.as_str(), cause))),
        }
    }
}

// =============================================================================
// Ready -> MeshJoined
// =============================================================================

impl Run<Ready> {
    /// Generate trust material and register the instance with the mesh.
    ///
    /// Trust material is required; workload and service registration
    /// failures are recorded as notes and the run continues.
    pub async fn join_mesh(self) -> TransitionResult<MeshJoined> {
        let Some(mesh) = self.ctx.request.mesh_enabled().cloned() else {
            let instance = self.state.instance.clone();
            return Ok(self.transition(MeshJoined { instance }));
        };

        self.enter(DeploymentState::MeshRegistering);
        let stage = DeploymentState::MeshRegistering.as_str();
        let scope = self
            .ctx
            .request
            .mesh_scope(&self.ctx.settings.mesh)
            .to_string();
        let instance = self.state.instance.clone();
        let registrar = self.ctx.deps.registrar.clone();

        let trust = self
            .ctx
            .scope
            .guard(None, registrar.generate_trust_material(&instance, &scope))
            .await;
        match trust {
            Ok(Ok(bundle)) => {
                tracing::debug!(instance = %instance.name, "Trust material: {:?}", bundle);
                let resource = Resource::registration(&bundle.handle);
                let files = bundle.files();
                self.ctx.status.update(|s| {
                    s.mesh_files = Some(files);
                    record(s, resource, STAGE_TRUST_MATERIAL);
                });
            }
            Ok(Err(e)) => return Err(self.abort(e.into())),
            Err(cause) => return Err(self.abort(interrupted(stage, cause))),
        }

        if mesh.create_workload_entry {
            let labels = self.ctx.request.workload_labels();
            let registered = self
                .ctx
                .scope
                .guard(None, registrar.register_workload(&instance, &scope, &labels))
                .await;
            match registered {
                Ok(result) => {
                    self.registered(result, STAGE_WORKLOAD_ENTRY, NoteKind::WorkloadRegistrationFailed)
                }
                Err(cause) => return Err(self.abort(interrupted(stage, cause))),
            }
        }

        if let Some(service) = mesh.service_to_register() {
            let registered = self
                .ctx
                .scope
                .guard(None, registrar.register_service(&instance, service, &scope))
                .await;
            match registered {
                Ok(result) => {
                    self.registered(result, STAGE_SERVICE_ENTRY, NoteKind::ServiceRegistrationFailed)
                }
                Err(cause) => return Err(self.abort(interrupted(stage, cause))),
            }
        }

        Ok(self.transition(MeshJoined { instance }))
    }

    fn registered(
        &self,
        result: Result<RegistrationHandle, crate::mesh::RegistrationError>,
        stage: &str,
        failure: NoteKind,
    ) {
        match result {
            Ok(handle) => {
                let resource = Resource::registration(&handle);
                self.ctx.status.update(|s| record(s, resource, stage));
            }
            Err(e) => self.note(failure, format!("{} skipped: {}", stage, e)),
        }
    }
}

// =============================================================================
// MeshJoined -> TasksDone
// =============================================================================

impl Run<MeshJoined> {
    /// Run every task in order. Task failures are recorded and the run
    /// continues; running out of budget or being cancelled stops it.
    pub async fn run_tasks(self) -> TransitionResult<TasksDone> {
        self.enter(DeploymentState::RunningTasks);

        let request = self.ctx.request.clone();
        let target = TaskTarget {
            instance: request.name.clone(),
            address: self.state.instance.remote_address().map(str::to_string),
            user: request.admin_username(&self.ctx.settings.cloud).to_string(),
        };

        for task in &request.tasks {
            self.ctx
                .status
                .update(|s| s.current_task = Some(task.name.clone()));

            let run = self.ctx.deps.tasks.run(&target, task, &self.ctx.scope).await;
            match run.result {
                Ok(()) => {
                    self.ctx
                        .status
                        .update(|s| s.complete_stage(task.completion_stage()));
                }
                Err(e) if e.is_interruption() => {
                    let stage = format!("{} (task {})", DeploymentState::RunningTasks, task.name);
                    let error = if self.ctx.scope.is_cancelled() {
                        DeployError::Cancelled { stage }
                    } else {
                        DeployError::Timeout { stage }
                    };
                    self.ctx.status.update(|s| {
                        s.failed_tasks.push(TaskFailure {
                            name: task.name.clone(),
                            error: e.to_string(),
                            attempts: run.attempts,
                        })
                    });
                    return Err(self.abort(error));
                }
                Err(e) => {
                    self.ctx.status.update(|s| {
                        s.failed_tasks.push(TaskFailure {
                            name: task.name.clone(),
                            error: e.to_string(),
                            attempts: run.attempts,
                        });
                        s.note(Note::new(NoteKind::TaskFailed, e.to_string()));
                    });
                }
            }
        }

        self.ctx.status.update(|s| s.current_task = None);
        let instance = self.state.instance.clone();
        Ok(self.transition(TasksDone { instance }))
    }
}

// =============================================================================
// TasksDone -> Validated
// =============================================================================

impl Run<TasksDone> {
    /// Check mesh reachability. A failed check leaves a note; it never
    /// fails the run.
    pub async fn final_validation(self) -> TransitionResult<Validated> {
        self.enter(DeploymentState::FinalValidation);

        if self.ctx.request.mesh_enabled().is_none() {
            return Ok(self.transition(Validated));
        }

        let Some(address) = self.state.instance.mesh_address().map(str::to_string) else {
            self.note(
                NoteKind::MeshValidationFailed,
                "mesh validation skipped: instance has no address".to_string(),
            );
            return Ok(self.transition(Validated));
        };

        let checked = self
            .ctx
            .scope
            .guard(None, self.ctx.deps.registrar.validate_reachability(&address))
            .await;

        match checked {
            Ok(Ok(true)) => {
                self.ctx
                    .status
                    .update(|s| s.complete_stage(STAGE_MESH_VALIDATION));
            }
            Ok(Ok(false)) => self.note(
                NoteKind::MeshValidationFailed,
                format!("mesh validation failed: {} is not reachable", address),
            ),
            Ok(Err(e)) => self.note(
                NoteKind::MeshValidationFailed,
                format!("mesh validation failed: {}", e),
            ),
            Err(cause) => {
                return Err(self.abort(interrupted(DeploymentState::FinalValidation.as_str(), cause)));
            }
        }

        Ok(self.transition(Validated))
    }
}

// =============================================================================
// Validated -> done
// =============================================================================

impl Run<Validated> {
    /// Mark the run completed and return the final status.
    pub fn finish(self) -> DeploymentStatus {
        self.ctx.status.update(|s| s.finish());
        tracing::info!(instance = %self.ctx.request.name, "Deployment completed");
        self.ctx.status.snapshot()
    }
}

impl Aborted {
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Instance info known at the time of failure, if any.
    pub fn instance(&self) -> Option<InstanceInfo> {
        self.ctx.status.snapshot().instance
    }
}
