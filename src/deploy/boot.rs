// ABOUTME: First-boot configuration (cloud-config) generation for new instances.
// ABOUTME: Adds mesh placeholder files and sidecar install steps when mesh integration is on.

use serde::Serialize;

use crate::config::{CloudConfig, MeshConfig};
use crate::request::DeploymentRequest;

use super::error::ValidationError;

const HEADER: &str = "#cloud-config\n";
const MESH_DIR: &str = "/etc/istio-vm";

const BASE_PACKAGES: &[&str] = &["curl", "wget", "unzip", "jq", "docker.io", "docker-compose"];

/// A cloud-config document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootConfig {
    pub package_update: bool,
    pub package_upgrade: bool,
    pub packages: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub write_files: Vec<BootFile>,
    pub runcmd: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootFile {
    pub path: String,
    pub content: String,
    pub permissions: String,
}

impl BootFile {
    fn placeholder(name: &str, permissions: &str) -> Self {
        Self {
            path: format!("{}/{}", MESH_DIR, name),
            content: format!("# Placeholder for {}\n", name),
            permissions: permissions.to_string(),
        }
    }
}

impl BootConfig {
    /// Assemble the boot configuration for a request.
    pub fn generate(
        request: &DeploymentRequest,
        cloud: &CloudConfig,
        mesh: &MeshConfig,
    ) -> Result<Self, ValidationError> {
        let admin = request.admin_username(cloud);

        let mut config = BootConfig {
            package_update: true,
            package_upgrade: true,
            packages: BASE_PACKAGES.iter().map(|p| p.to_string()).collect(),
            write_files: Vec::new(),
            runcmd: vec![
                "systemctl enable docker".to_string(),
                "systemctl start docker".to_string(),
                format!("usermod -aG docker {}", admin),
                format!("mkdir -p {}", MESH_DIR),
            ],
        };

        if request.mesh_enabled().is_some() {
            let url = mesh.sidecar_package_url.trim();
            if url.is_empty() {
                return Err(ValidationError::BootConfig(
                    "mesh.sidecar_package_url is empty".to_string(),
                ));
            }
            config.write_files = vec![
                BootFile::placeholder("cluster.env", "0644"),
                BootFile::placeholder("mesh.yaml", "0644"),
                BootFile::placeholder("istio-token", "0600"),
            ];
            config.runcmd.push(format!("curl -L -o /tmp/istio-sidecar.deb {}", url));
            config.runcmd.push("dpkg -i /tmp/istio-sidecar.deb".to_string());
        }

        Ok(config)
    }

    /// Render as a `#cloud-config` document.
    pub fn render(&self) -> Result<String, ValidationError> {
        let body =
            serde_yaml::to_string(self).map_err(|e| ValidationError::BootConfig(e.to_string()))?;
        Ok(format!("{}{}", HEADER, body))
    }
}
