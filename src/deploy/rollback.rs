// ABOUTME: Best-effort reverse-order teardown of resources created by a run.
// ABOUTME: Individual failures are logged and reported, never raised.

use serde::{Deserialize, Serialize};

use crate::cloud::CloudProvisioner;
use crate::mesh::MeshRegistrar;
use crate::types::InstanceName;

use super::manifest::{Resource, ResourceKind, RollbackManifest};
use super::scope::DeployScope;

/// Result of a teardown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Resources removed in this pass, in removal order.
    pub released: Vec<Resource>,
    pub failed: Vec<CleanupFailure>,
}

/// A resource that could not be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupFailure {
    pub resource: Resource,
    pub error: String,
}

impl CleanupReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.failed.is_empty()
    }
}

/// Remove every unreleased resource in `manifest`, newest first.
///
/// Successfully removed entries are marked released, so a second pass over
/// the same manifest does nothing.
pub async fn teardown(
    manifest: &mut RollbackManifest,
    provisioner: &dyn CloudProvisioner,
    registrar: &dyn MeshRegistrar,
    scope: &DeployScope,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    for index in manifest.pending_reverse() {
        let Some(resource) = manifest.get(index).cloned() else {
            continue;
        };

        tracing::info!("Releasing {}", resource);
        match scope.guard(None, release(&resource, provisioner, registrar)).await {
            Ok(Ok(())) => {
                manifest.mark_released(index);
                report.released.push(resource);
            }
            Ok(Err(error)) => {
                tracing::error!("Failed to release {}: {}", resource, error);
                report.failed.push(CleanupFailure { resource, error });
            }
            Err(interrupted) => {
                tracing::error!("Failed to release {}: cleanup {}", resource, interrupted);
                report.failed.push(CleanupFailure {
                    resource,
                    error: format!("cleanup interrupted: {}", interrupted),
                });
            }
        }
    }

    report
}

async fn release(
    resource: &Resource,
    provisioner: &dyn CloudProvisioner,
    registrar: &dyn MeshRegistrar,
) -> Result<(), String> {
    match resource.kind {
        ResourceKind::Instance => {
            let name = InstanceName::new(&resource.id).map_err(|e| e.to_string())?;
            provisioner.delete(&name).await.map_err(|e| e.to_string())
        }
        ResourceKind::TrustBundle
        | ResourceKind::WorkloadRegistration
        | ResourceKind::ServiceRegistration => {
            let handle = resource
                .registration_handle()
                .ok_or_else(|| format!("{} has no registration handle", resource))?;
            registrar.deregister(&handle).await.map_err(|e| e.to_string())
        }
    }
}
