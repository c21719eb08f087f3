// ABOUTME: CloudProvisioner backed by the Azure CLI (`az vm ...`).
// ABOUTME: Builds argument lists, runs them as child processes, and parses JSON output.

use async_trait::async_trait;
use serde::Deserialize;

use super::{CloudProvisioner, InstanceHandle, InstanceInfo, InstanceSpec, PowerState, ProvisionError};
use crate::config::CloudConfig;
use crate::process::{self, ProcessOutput};
use crate::types::{InstanceId, InstanceName};

/// Drives `az vm create`, `az vm show -d` and `az vm delete`.
#[derive(Debug, Clone)]
pub struct AzCliProvisioner {
    program: String,
    resource_group: String,
    location: Option<String>,
}

/// Subset of `az vm create` output.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOutput {
    id: Option<String>,
}

/// Subset of `az vm show -d` output.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShowOutput {
    #[serde(default)]
    power_state: Option<String>,
    #[serde(default)]
    private_ips: Option<String>,
    #[serde(default)]
    public_ips: Option<String>,
}

impl AzCliProvisioner {
    pub fn new(config: &CloudConfig) -> Self {
        Self {
            program: "az".to_string(),
            resource_group: config.resource_group.clone(),
            location: config.location.clone(),
        }
    }

    /// Use a different executable (e.g. a wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn create_args(&self, spec: &InstanceSpec) -> Vec<String> {
        let mut args: Vec<String> = [
            "vm",
            "create",
            "--resource-group",
            self.resource_group.as_str(),
            "--name",
            spec.name.as_str(),
            "--image",
            spec.image.as_str(),
            "--size",
            spec.size.as_str(),
            "--admin-username",
            spec.admin_username.as_str(),
            "--ssh-key-values",
            spec.ssh_public_key.as_str(),
            "--custom-data",
            spec.boot_config.as_str(),
            "--os-disk-delete-option",
            "Delete",
            "--nic-delete-option",
            "Delete",
            "--output",
            "json",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if let Some(location) = &self.location {
            args.push("--location".to_string());
            args.push(location.clone());
        }

        if !spec.tags.is_empty() {
            args.push("--tags".to_string());
            args.extend(spec.tags.iter().map(|(k, v)| format!("{}={}", k, v)));
        }

        args
    }

    fn show_args(&self, name: &InstanceName) -> Vec<String> {
        vec![
            "vm".to_string(),
            "show".to_string(),
            "--show-details".to_string(),
            "--resource-group".to_string(),
            self.resource_group.clone(),
            "--name".to_string(),
            name.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ]
    }

    fn delete_args(&self, name: &InstanceName) -> Vec<String> {
        vec![
            "vm".to_string(),
            "delete".to_string(),
            "--resource-group".to_string(),
            self.resource_group.clone(),
            "--name".to_string(),
            name.to_string(),
            "--yes".to_string(),
        ]
    }
}

fn is_not_found(output: &ProcessOutput) -> bool {
    let text = output.stderr.as_str();
    text.contains("ResourceNotFound")
        || text.contains("was not found")
        || text.contains("could not be found")
}

/// `az` reports comma-separated address lists; keep the first entry.
fn first_address(list: Option<String>) -> Option<String> {
    list.and_then(|s| {
        s.split(',')
            .map(str::trim)
            .find(|a| !a.is_empty())
            .map(str::to_string)
    })
}

fn parse_show(name: &InstanceName, stdout: &str) -> Result<InstanceInfo, ProvisionError> {
    let show: ShowOutput = serde_json::from_str(stdout)
        .map_err(|e| ProvisionError::QueryFailed(format!("unexpected az output: {}", e)))?;
    Ok(InstanceInfo {
        name: name.clone(),
        power_state: show
            .power_state
            .as_deref()
            .map(PowerState::from_display)
            .unwrap_or_else(|| PowerState::Unknown(String::new())),
        private_ip: first_address(show.private_ips),
        public_ip: first_address(show.public_ips),
    })
}

#[async_trait]
impl CloudProvisioner for AzCliProvisioner {
    async fn create(&self, spec: &InstanceSpec) -> Result<InstanceHandle, ProvisionError> {
        tracing::info!("Creating VM {} in {}", spec.name, self.resource_group);
        let output = process::run(&self.program, &self.create_args(spec), None).await?;
        if !output.success {
            return Err(ProvisionError::CreateFailed(output.diagnostic()));
        }

        // The VM exists even if the output is unparseable, so never fail here.
        let id = serde_json::from_str::<CreateOutput>(&output.stdout)
            .ok()
            .and_then(|o| o.id)
            .map(InstanceId::new);

        Ok(InstanceHandle {
            name: spec.name.clone(),
            id,
        })
    }

    async fn get(&self, name: &InstanceName) -> Result<InstanceInfo, ProvisionError> {
        let output = process::run(&self.program, &self.show_args(name), None).await?;
        if !output.success {
            if is_not_found(&output) {
                return Err(ProvisionError::NotFound(name.to_string()));
            }
            return Err(ProvisionError::QueryFailed(output.diagnostic()));
        }
        parse_show(name, &output.stdout)
    }

    async fn delete(&self, name: &InstanceName) -> Result<(), ProvisionError> {
        tracing::info!("Deleting VM {} from {}", name, self.resource_group);
        let output = process::run(&self.program, &self.delete_args(name), None).await?;
        if output.success || is_not_found(&output) {
            return Ok(());
        }
        Err(ProvisionError::DeleteFailed(output.diagnostic()))
    }
}
