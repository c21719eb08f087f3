// ABOUTME: Deployment request model: provisioning parameters, mesh directive, tasks, policy.
// ABOUTME: Requests are loaded from YAML and validated before any resource is created.

mod task;

pub use task::{ADDRESS_PLACEHOLDER, Task, TaskKind};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::config::{CloudConfig, EnvValue, MeshConfig, OrchestratorConfig};
use crate::deploy::ValidationError;
use crate::error::{Error, Result};
use crate::types::InstanceName;

/// Caller-supplied description of one instance deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub name: InstanceName,

    /// Size class; falls back to `cloud.default_size`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    /// Base image; falls back to `cloud.default_image`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default)]
    pub admin: AdminCredentials,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<MeshIntegration>,

    #[serde(default)]
    pub tasks: Vec<Task>,

    /// Overall deployment budget; falls back to `orchestrator.deployment_timeout`.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub auto_cleanup: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCredentials {
    /// Falls back to `cloud.admin_user`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<EnvValue>,
}

/// Optional service mesh directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshIntegration {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Target namespace; falls back to `mesh.namespace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub create_workload_entry: bool,

    #[serde(default)]
    pub create_service_entry: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for MeshIntegration {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: None,
            labels: BTreeMap::new(),
            create_workload_entry: true,
            create_service_entry: false,
            service_name: None,
        }
    }
}

impl MeshIntegration {
    /// The service name, when service registration should happen.
    pub fn service_to_register(&self) -> Option<&str> {
        if !self.create_service_entry {
            return None;
        }
        self.service_name.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Run policy with configuration defaults applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub timeout: Duration,
    pub auto_cleanup: bool,
}

impl DeploymentRequest {
    pub fn new(name: InstanceName) -> Self {
        Self {
            name,
            size: None,
            image: None,
            admin: AdminCredentials::default(),
            tags: BTreeMap::new(),
            mesh: None,
            tasks: Vec::new(),
            timeout: None,
            auto_cleanup: false,
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse and validate a request file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let request = Self::from_yaml(&content)?;
        request.validate().map_err(|source| Error::InvalidRequest {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(request)
    }

    /// Mesh directive, if present and enabled.
    pub fn mesh_enabled(&self) -> Option<&MeshIntegration> {
        self.mesh.as_ref().filter(|m| m.enabled)
    }

    pub fn mesh_scope<'a>(&'a self, defaults: &'a MeshConfig) -> &'a str {
        self.mesh_enabled()
            .and_then(|m| m.namespace.as_deref())
            .unwrap_or(defaults.namespace.as_str())
    }

    /// Workload labels with `app` and `version` filled in when absent.
    pub fn workload_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self
            .mesh_enabled()
            .map(|m| m.labels.clone())
            .unwrap_or_default();
        labels
            .entry("app".to_string())
            .or_insert_with(|| self.name.to_string());
        labels
            .entry("version".to_string())
            .or_insert_with(|| "v1".to_string());
        labels
    }

    pub fn size<'a>(&'a self, defaults: &'a CloudConfig) -> &'a str {
        self.size.as_deref().unwrap_or(defaults.default_size.as_str())
    }

    pub fn image<'a>(&'a self, defaults: &'a CloudConfig) -> &'a str {
        self.image.as_deref().unwrap_or(defaults.default_image.as_str())
    }

    pub fn admin_username<'a>(&'a self, defaults: &'a CloudConfig) -> &'a str {
        self.admin
            .username
            .as_deref()
            .unwrap_or(defaults.admin_user.as_str())
    }

    /// Resolve the administrator public key.
    pub fn ssh_public_key(&self) -> std::result::Result<String, ValidationError> {
        let value = self
            .admin
            .ssh_public_key
            .as_ref()
            .ok_or(ValidationError::MissingCredential)?;
        let key = value
            .resolve()
            .map_err(|e| ValidationError::UnresolvedCredential(e.to_string()))?;
        if key.trim().is_empty() {
            return Err(ValidationError::MissingCredential);
        }
        Ok(key)
    }

    pub fn policy(&self, defaults: &OrchestratorConfig) -> Policy {
        Policy {
            timeout: self.timeout.unwrap_or(defaults.deployment_timeout),
            auto_cleanup: self.auto_cleanup,
        }
    }

    /// Check everything that can be checked without contacting anything.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if let Some(mesh) = self.mesh_enabled() {
            if mesh.create_service_entry && mesh.service_to_register().is_none() {
                return Err(ValidationError::MissingServiceName);
            }
            if mesh.namespace.as_deref().is_some_and(|n| n.trim().is_empty()) {
                return Err(ValidationError::EmptyField {
                    field: "mesh.namespace",
                });
            }
        }

        if self.size.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(ValidationError::EmptyField { field: "size" });
        }
        if self.image.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(ValidationError::EmptyField { field: "image" });
        }
        if self
            .admin
            .username
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            return Err(ValidationError::EmptyField {
                field: "admin.username",
            });
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ValidationError::ZeroTimeout("deployment".to_string()));
        }

        self.ssh_public_key()?;

        let mut seen = HashSet::new();
        for task in &self.tasks {
            task.check()?;
            if !seen.insert(task.name.as_str()) {
                return Err(ValidationError::DuplicateTask(task.name.clone()));
            }
        }

        Ok(())
    }
}
