// ABOUTME: Test support utilities.
// ABOUTME: Provides recording fakes for every collaborator and an orchestrator harness.

#![allow(dead_code)]

use async_trait::async_trait;
use meshvm::cloud::{
    CloudProvisioner, InstanceHandle, InstanceInfo, InstanceSpec, PowerState, ProvisionError,
};
use meshvm::config::EnvValue;
use meshvm::deploy::{Collaborators, Orchestrator, OrchestratorSettings};
use meshvm::mesh::{
    MeshRegistrar, RegistrationError, RegistrationHandle, RegistrationKind, TrustBundle,
};
use meshvm::request::DeploymentRequest;
use meshvm::ssh::CommandOutput;
use meshvm::tasks::{
    ExecError, HttpProbe, ProbeError, ProbeResponse, RemoteExecutor, RetryPolicy, TaskRunner,
};
use meshvm::types::InstanceName;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("meshvm=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const TEST_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAITest test@meshvm";
pub const PRIVATE_IP: &str = "10.0.0.4";
pub const CONTROL_PLANE: &str = "10.1.0.1:15012";
pub const TRUST_TOKEN: &str = "sa-token-7f3e";
pub const PUBLIC_IP: &str = "20.1.2.3";

// =============================================================================
// Call Log
// =============================================================================

/// One collaborator invocation, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Get(String),
    Delete(String),
    TrustMaterial { instance: String, scope: String },
    RegisterWorkload { instance: String, scope: String },
    RegisterService { service: String, scope: String },
    Deregister(RegistrationKind, String),
    Reachability(String),
    Execute { host: String, command: String },
    Probe(String),
}

#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn push(&self, call: Call) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Deletions and deregistrations, in order.
    pub fn removals(&self) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::Delete(_) | Call::Deregister(..)))
            .cloned()
            .collect()
    }

    pub fn gets(&self) -> usize {
        self.count(|c| matches!(c, Call::Get(_)))
    }
}

// =============================================================================
// Cloud Provisioner
// =============================================================================

pub struct FakeProvisioner {
    log: CallLog,
    create_error: Mutex<Option<String>>,
    create_delay: Mutex<Duration>,
    /// Power states reported by successive `get` calls; the last one repeats.
    power_states: Mutex<VecDeque<PowerState>>,
    get_errors: Mutex<u32>,
    delete_error: Mutex<Option<String>>,
    existing: Mutex<HashSet<String>>,
}

impl FakeProvisioner {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            create_error: Mutex::new(None),
            create_delay: Mutex::new(Duration::ZERO),
            power_states: Mutex::new(VecDeque::from([PowerState::Running])),
            get_errors: Mutex::new(0),
            delete_error: Mutex::new(None),
            existing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_create(&self, reason: &str) {
        *self.create_error.lock() = Some(reason.to_string());
    }

    pub fn delay_create(&self, delay: Duration) {
        *self.create_delay.lock() = delay;
    }

    pub fn power_states(&self, states: impl IntoIterator<Item = PowerState>) {
        *self.power_states.lock() = states.into_iter().collect();
    }

    /// Make the next `count` readiness queries fail.
    pub fn fail_gets(&self, count: u32) {
        *self.get_errors.lock() = count;
    }

    pub fn fail_delete(&self, reason: Option<&str>) {
        *self.delete_error.lock() = reason.map(str::to_string);
    }

    pub fn exists(&self, name: &str) -> bool {
        self.existing.lock().contains(name)
    }

    fn next_power_state(&self) -> PowerState {
        let mut states = self.power_states.lock();
        if states.len() > 1 {
            states.pop_front().unwrap_or(PowerState::Running)
        } else {
            states.front().cloned().unwrap_or(PowerState::Running)
        }
    }
}

#[async_trait]
impl CloudProvisioner for FakeProvisioner {
    async fn create(&self, spec: &InstanceSpec) -> Result<InstanceHandle, ProvisionError> {
        self.log.push(Call::Create(spec.name.to_string()));
        let delay = *self.create_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.create_error.lock().clone() {
            return Err(ProvisionError::CreateFailed(reason));
        }
        self.existing.lock().insert(spec.name.to_string());
        Ok(InstanceHandle {
            name: spec.name.clone(),
            id: None,
        })
    }

    async fn get(&self, name: &InstanceName) -> Result<InstanceInfo, ProvisionError> {
        self.log.push(Call::Get(name.to_string()));
        {
            let mut errors = self.get_errors.lock();
            if *errors > 0 {
                *errors -= 1;
                return Err(ProvisionError::QueryFailed("throttled".to_string()));
            }
        }
        Ok(InstanceInfo {
            name: name.clone(),
            power_state: self.next_power_state(),
            private_ip: Some(PRIVATE_IP.to_string()),
            public_ip: Some(PUBLIC_IP.to_string()),
        })
    }

    async fn delete(&self, name: &InstanceName) -> Result<(), ProvisionError> {
        self.log.push(Call::Delete(name.to_string()));
        if let Some(reason) = self.delete_error.lock().clone() {
            return Err(ProvisionError::DeleteFailed(reason));
        }
        self.existing.lock().remove(name.as_str());
        Ok(())
    }
}

// =============================================================================
// Mesh Registrar
// =============================================================================

pub struct FakeRegistrar {
    log: CallLog,
    trust_error: Mutex<Option<String>>,
    workload_error: Mutex<Option<String>>,
    service_error: Mutex<Option<String>>,
    reachable: Mutex<Result<bool, String>>,
    deregister_error: Mutex<Option<String>>,
}

impl FakeRegistrar {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            trust_error: Mutex::new(None),
            workload_error: Mutex::new(None),
            service_error: Mutex::new(None),
            reachable: Mutex::new(Ok(true)),
            deregister_error: Mutex::new(None),
        }
    }

    pub fn fail_trust(&self, reason: &str) {
        *self.trust_error.lock() = Some(reason.to_string());
    }

    pub fn fail_workload(&self, reason: &str) {
        *self.workload_error.lock() = Some(reason.to_string());
    }

    pub fn fail_service(&self, reason: &str) {
        *self.service_error.lock() = Some(reason.to_string());
    }

    pub fn reachable(&self, result: Result<bool, &str>) {
        *self.reachable.lock() = result.map_err(str::to_string);
    }

    pub fn fail_deregister(&self, reason: &str) {
        *self.deregister_error.lock() = Some(reason.to_string());
    }
}

#[async_trait]
impl MeshRegistrar for FakeRegistrar {
    async fn generate_trust_material(
        &self,
        instance: &InstanceInfo,
        scope: &str,
    ) -> Result<TrustBundle, RegistrationError> {
        self.log.push(Call::TrustMaterial {
            instance: instance.name.to_string(),
            scope: scope.to_string(),
        });
        if let Some(reason) = self.trust_error.lock().clone() {
            return Err(RegistrationError::TrustMaterial(reason));
        }
        let name = format!("vm-{}", instance.name);
        Ok(TrustBundle {
            handle: RegistrationHandle::new(RegistrationKind::TrustBundle, name, scope),
            token: TRUST_TOKEN.to_string(),
            root_cert: "-----BEGIN CERTIFICATE-----".to_string(),
            control_plane_address: CONTROL_PLANE.to_string(),
            cluster_env: format!("ISTIO_CP_ADDRESS={}\n", CONTROL_PLANE),
            mesh_config: format!("metadata:\n  name: istio-vm-{}\n", instance.name),
            hosts: "10.1.0.1 istiod.istio-system.svc".to_string(),
        })
    }

    async fn register_workload(
        &self,
        instance: &InstanceInfo,
        scope: &str,
        _labels: &BTreeMap<String, String>,
    ) -> Result<RegistrationHandle, RegistrationError> {
        self.log.push(Call::RegisterWorkload {
            instance: instance.name.to_string(),
            scope: scope.to_string(),
        });
        let name = format!("vm-{}", instance.name);
        if let Some(reason) = self.workload_error.lock().clone() {
            return Err(RegistrationError::Apply { name, reason });
        }
        Ok(RegistrationHandle::new(RegistrationKind::Workload, name, scope))
    }

    async fn register_service(
        &self,
        instance: &InstanceInfo,
        service_name: &str,
        scope: &str,
    ) -> Result<RegistrationHandle, RegistrationError> {
        self.log.push(Call::RegisterService {
            service: service_name.to_string(),
            scope: scope.to_string(),
        });
        let name = format!("vm-{}-service", instance.name);
        if let Some(reason) = self.service_error.lock().clone() {
            return Err(RegistrationError::Apply { name, reason });
        }
        Ok(RegistrationHandle::new(RegistrationKind::Service, name, scope))
    }

    async fn deregister(&self, handle: &RegistrationHandle) -> Result<(), RegistrationError> {
        self.log
            .push(Call::Deregister(handle.kind, handle.name.clone()));
        if let Some(reason) = self.deregister_error.lock().clone() {
            return Err(RegistrationError::Delete {
                name: handle.name.clone(),
                reason,
            });
        }
        Ok(())
    }

    async fn validate_reachability(&self, address: &str) -> Result<bool, RegistrationError> {
        self.log.push(Call::Reachability(address.to_string()));
        self.reachable
            .lock()
            .clone()
            .map_err(RegistrationError::Reachability)
    }
}

// =============================================================================
// Task I/O
// =============================================================================

pub struct FakeExecutor {
    log: CallLog,
    /// Outputs for successive calls; exit code 0 once exhausted.
    outputs: Mutex<VecDeque<CommandOutput>>,
    delay: Mutex<Duration>,
}

impl FakeExecutor {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            outputs: Mutex::new(VecDeque::new()),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn respond(&self, exit_code: u32, stdout: &str) {
        self.outputs.lock().push_back(CommandOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "command failed".to_string()
            },
        });
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn execute(
        &self,
        host: &str,
        _user: &str,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        self.log.push(Call::Execute {
            host: host.to_string(),
            command: command.to_string(),
        });
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.outputs.lock().pop_front().unwrap_or(CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }))
    }
}

pub struct FakeProbe {
    log: CallLog,
    /// Responses for successive calls; 200 "ok" once exhausted.
    responses: Mutex<VecDeque<ProbeResponse>>,
}

impl FakeProbe {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn respond(&self, status: u16, body: &str) {
        self.responses.lock().push_back(ProbeResponse {
            status,
            body: body.to_string(),
        });
    }
}

#[async_trait]
impl HttpProbe for FakeProbe {
    async fn get(&self, url: &str) -> Result<ProbeResponse, ProbeError> {
        self.log.push(Call::Probe(url.to_string()));
        Ok(self.responses.lock().pop_front().unwrap_or(ProbeResponse {
            status: 200,
            body: "ok".to_string(),
        }))
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Fakes wired into an orchestrator, sharing one call log.
pub struct Harness {
    pub log: CallLog,
    pub provisioner: Arc<FakeProvisioner>,
    pub registrar: Arc<FakeRegistrar>,
    pub executor: Arc<FakeExecutor>,
    pub probe: Arc<FakeProbe>,
}

impl Harness {
    pub fn new() -> Self {
        let log = CallLog::default();
        Self {
            provisioner: Arc::new(FakeProvisioner::new(log.clone())),
            registrar: Arc::new(FakeRegistrar::new(log.clone())),
            executor: Arc::new(FakeExecutor::new(log.clone())),
            probe: Arc::new(FakeProbe::new(log.clone())),
            log,
        }
    }

    pub fn task_runner(&self) -> TaskRunner {
        TaskRunner::new(self.executor.clone(), self.probe.clone())
            .with_retry(RetryPolicy {
                base: Duration::from_secs(2),
                max: Duration::from_secs(30),
            })
            .with_default_timeout(Duration::from_secs(60))
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(settings())
    }

    pub fn orchestrator_with(&self, settings: OrchestratorSettings) -> Orchestrator {
        let deps = Collaborators {
            provisioner: self.provisioner.clone(),
            registrar: self.registrar.clone(),
            tasks: self.task_runner(),
        };
        Orchestrator::new(deps, settings)
    }
}

/// Orchestrator settings with short, test-friendly timings.
pub fn settings() -> OrchestratorSettings {
    let mut settings = OrchestratorSettings::default();
    settings.orchestrator.ready_poll_interval = Duration::from_secs(5);
    settings.orchestrator.ready_timeout = Duration::from_secs(60);
    settings.orchestrator.deployment_timeout = Duration::from_secs(600);
    settings.orchestrator.task_timeout = Duration::from_secs(60);
    settings.orchestrator.cleanup_timeout = Duration::from_secs(60);
    settings
}

/// A valid request with no mesh directive and no tasks.
pub fn request(name: &str) -> DeploymentRequest {
    let mut request = DeploymentRequest::new(InstanceName::new(name).unwrap());
    request.admin.ssh_public_key = Some(EnvValue::Literal(TEST_KEY.to_string()));
    request
}

/// A valid request that joins the mesh in namespace `apps`.
pub fn mesh_request(name: &str) -> DeploymentRequest {
    let mut request = request(name);
    request.mesh = Some(meshvm::request::MeshIntegration {
        namespace: Some("apps".to_string()),
        ..Default::default()
    });
    request
}

pub fn name(value: &str) -> InstanceName {
    InstanceName::new(value).unwrap()
}
