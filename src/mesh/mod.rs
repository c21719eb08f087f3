// ABOUTME: Service mesh registration capability consumed by the orchestrator.
// ABOUTME: Defines the MeshRegistrar trait, trust material, and registration handles.

pub mod kubectl;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::cloud::InstanceInfo;

pub use kubectl::KubectlRegistrar;

/// What a registration handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistrationKind {
    /// Identity backing the instance's trust material (e.g. a service account).
    TrustBundle,
    Workload,
    Service,
}

impl fmt::Display for RegistrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationKind::TrustBundle => write!(f, "trust-bundle"),
            RegistrationKind::Workload => write!(f, "workload-registration"),
            RegistrationKind::Service => write!(f, "service-registration"),
        }
    }
}

/// Identifies one mesh record so it can be removed later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationHandle {
    pub kind: RegistrationKind,
    pub name: String,
    pub scope: String,
}

impl RegistrationHandle {
    pub fn new(kind: RegistrationKind, name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            scope: scope.into(),
        }
    }
}

impl fmt::Display for RegistrationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.scope, self.name)
    }
}

/// Credentials and connection metadata an instance needs to join the mesh.
#[derive(Clone)]
pub struct TrustBundle {
    pub handle: RegistrationHandle,
    pub token: String,
    pub root_cert: String,
    pub control_plane_address: String,
    pub cluster_env: String,
    pub mesh_config: String,
    pub hosts: String,
}

// Keep the token out of logs.
impl fmt::Debug for TrustBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustBundle")
            .field("handle", &self.handle)
            .field("token", &"<redacted>")
            .field("control_plane_address", &self.control_plane_address)
            .finish_non_exhaustive()
    }
}

impl TrustBundle {
    /// Instance-side mesh files, without the token.
    pub fn files(&self) -> MeshFiles {
        MeshFiles {
            control_plane_address: self.control_plane_address.clone(),
            cluster_env: self.cluster_env.clone(),
            mesh_config: self.mesh_config.clone(),
            root_cert: self.root_cert.clone(),
            hosts: self.hosts.clone(),
        }
    }
}

/// Contents an operator installs under `/etc/istio-vm` on the instance.
/// The service-account token is not included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshFiles {
    pub control_plane_address: String,
    pub cluster_env: String,
    pub mesh_config: String,
    pub root_cert: String,
    pub hosts: String,
}

impl MeshFiles {
    /// Each file's install path and contents. The hosts line is appended to `/etc/hosts`.
    pub fn entries(&self) -> [(&'static str, &str); 4] {
        [
            ("/etc/istio-vm/cluster.env", &self.cluster_env),
            ("/etc/istio-vm/mesh.yaml", &self.mesh_config),
            ("/etc/istio-vm/root-cert.pem", &self.root_cert),
            ("/etc/hosts", &self.hosts),
        ]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("failed to generate trust material: {0}")]
    TrustMaterial(String),

    #[error("instance has no address to register")]
    NoAddress,

    #[error("failed to create mesh record {name}: {reason}")]
    Apply { name: String, reason: String },

    #[error("failed to remove mesh record {name}: {reason}")]
    Delete { name: String, reason: String },

    #[error("reachability check failed: {0}")]
    Reachability(String),

    #[error("mesh command failed to run: {0}")]
    Command(#[from] std::io::Error),
}

/// Generates trust material and manages mesh membership records.
#[async_trait]
pub trait MeshRegistrar: Send + Sync {
    async fn generate_trust_material(
        &self,
        instance: &InstanceInfo,
        scope: &str,
    ) -> Result<TrustBundle, RegistrationError>;

    async fn register_workload(
        &self,
        instance: &InstanceInfo,
        scope: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<RegistrationHandle, RegistrationError>;

    async fn register_service(
        &self,
        instance: &InstanceInfo,
        service_name: &str,
        scope: &str,
    ) -> Result<RegistrationHandle, RegistrationError>;

    /// Remove a record. Removing a record that no longer exists succeeds.
    async fn deregister(&self, handle: &RegistrationHandle) -> Result<(), RegistrationError>;

    async fn validate_reachability(&self, address: &str) -> Result<bool, RegistrationError>;
}
