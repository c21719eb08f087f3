// ABOUTME: Cloud provisioning capability consumed by the orchestrator.
// ABOUTME: Defines the CloudProvisioner trait and the instance records it exchanges.

pub mod az;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{InstanceId, InstanceName};

pub use az::AzCliProvisioner;

/// Everything needed to create one instance.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub name: InstanceName,
    pub size: String,
    pub image: String,
    pub admin_username: String,
    pub ssh_public_key: String,
    pub tags: BTreeMap<String, String>,
    /// Rendered first-boot configuration document.
    pub boot_config: String,
}

/// Returned by a successful create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub name: InstanceName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<InstanceId>,
}

/// Power state as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Deallocated,
    Unknown(String),
}

impl PowerState {
    /// Parse a provider display status such as `VM running`.
    pub fn from_display(status: &str) -> Self {
        let normalized = status.trim().to_lowercase();
        let normalized = normalized
            .strip_prefix("vm ")
            .or_else(|| normalized.strip_prefix("powerstate/"))
            .unwrap_or(&normalized);
        match normalized {
            "running" => PowerState::Running,
            "starting" => PowerState::Starting,
            "stopping" => PowerState::Stopping,
            "stopped" => PowerState::Stopped,
            "deallocated" | "deallocating" => PowerState::Deallocated,
            _ => PowerState::Unknown(status.trim().to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PowerState::Running)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Starting => write!(f, "starting"),
            PowerState::Running => write!(f, "running"),
            PowerState::Stopping => write!(f, "stopping"),
            PowerState::Stopped => write!(f, "stopped"),
            PowerState::Deallocated => write!(f, "deallocated"),
            PowerState::Unknown(s) if s.is_empty() => write!(f, "unknown"),
            PowerState::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Current view of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub name: InstanceName,
    pub power_state: PowerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
}

impl InstanceInfo {
    /// Address used for mesh registration (private network first).
    pub fn mesh_address(&self) -> Option<&str> {
        self.private_ip.as_deref().or(self.public_ip.as_deref())
    }

    /// Address used to reach the instance from the orchestrator (public first).
    pub fn remote_address(&self) -> Option<&str> {
        self.public_ip.as_deref().or(self.private_ip.as_deref())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("failed to create instance: {0}")]
    CreateFailed(String),

    #[error("failed to query instance: {0}")]
    QueryFailed(String),

    #[error("failed to delete instance: {0}")]
    DeleteFailed(String),

    #[error("provider command failed to run: {0}")]
    Command(#[from] std::io::Error),
}

/// Creates, queries and deletes compute instances.
#[async_trait]
pub trait CloudProvisioner: Send + Sync {
    async fn create(&self, spec: &InstanceSpec) -> Result<InstanceHandle, ProvisionError>;

    async fn get(&self, name: &InstanceName) -> Result<InstanceInfo, ProvisionError>;

    /// Delete an instance. Deleting an instance that no longer exists succeeds.
    async fn delete(&self, name: &InstanceName) -> Result<(), ProvisionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_display_status() {
        assert_eq!(PowerState::from_display("VM running"), PowerState::Running);
        assert_eq!(
            PowerState::from_display("PowerState/deallocated"),
            PowerState::Deallocated
        );
        assert_eq!(
            PowerState::from_display("VM starting"),
            PowerState::Starting
        );
        assert_eq!(
            PowerState::from_display("Provisioning"),
            PowerState::Unknown("Provisioning".to_string())
        );
    }

    #[test]
    fn addresses_prefer_expected_network() {
        let info = InstanceInfo {
            name: InstanceName::new("web").unwrap(),
            power_state: PowerState::Running,
            private_ip: Some("10.0.0.4".to_string()),
            public_ip: Some("20.1.2.3".to_string()),
        };
        assert_eq!(info.mesh_address(), Some("10.0.0.4"));
        assert_eq!(info.remote_address(), Some("20.1.2.3"));
    }
}
