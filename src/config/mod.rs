// ABOUTME: Configuration types and parsing for meshvm.yml.
// ABOUTME: Handles YAML parsing, section defaults, and template generation.

mod env_value;
mod ssh;

pub use env_value::EnvValue;
pub use ssh::SshSettings;

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "meshvm.yml";
pub const CONFIG_FILENAME_ALT: &str = "meshvm.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".meshvm/config.yml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cloud: CloudConfig,

    #[serde(default)]
    pub mesh: MeshConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub ssh: SshSettings,
}

/// Defaults and placement for provisioned instances.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    #[serde(default = "default_resource_group")]
    pub resource_group: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_size")]
    pub default_size: String,
    #[serde(default = "default_image")]
    pub default_image: String,
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

fn default_resource_group() -> String {
    "meshvm".to_string()
}

fn default_size() -> String {
    "Standard_B2s".to_string()
}

fn default_image() -> String {
    "Ubuntu2204".to_string()
}

fn default_admin_user() -> String {
    "azureuser".to_string()
}

impl Default for CloudConfig {
    fn default() -> Self {
        CloudConfig {
            resource_group: default_resource_group(),
            location: None,
            default_size: default_size(),
            default_image: default_image(),
            admin_user: default_admin_user(),
            tags: BTreeMap::new(),
        }
    }
}

/// Service mesh control plane settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MeshConfig {
    /// Scope used when a request does not name one.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_namespace")]
    pub control_plane_namespace: String,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    #[serde(default = "default_mesh_id")]
    pub mesh_id: String,
    #[serde(default = "default_service_port")]
    pub service_port: u16,
    #[serde(default = "default_sidecar_package_url")]
    pub sidecar_package_url: String,
    #[serde(default)]
    pub kubectl_context: Option<String>,
}

fn default_namespace() -> String {
    "istio-system".to_string()
}

fn default_network() -> String {
    "vm-network".to_string()
}

fn default_cluster_name() -> String {
    "cluster1".to_string()
}

fn default_mesh_id() -> String {
    "mesh1".to_string()
}

fn default_service_port() -> u16 {
    8080
}

fn default_sidecar_package_url() -> String {
    "https://storage.googleapis.com/istio-release/releases/1.19.3/deb/istio-sidecar.deb".to_string()
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            namespace: default_namespace(),
            control_plane_namespace: default_namespace(),
            network: default_network(),
            cluster_name: default_cluster_name(),
            mesh_id: default_mesh_id(),
            service_port: default_service_port(),
            sidecar_package_url: default_sidecar_package_url(),
            kubectl_context: None,
        }
    }
}

/// Timing knobs for the deployment orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_ready_poll_interval", with = "humantime_serde")]
    pub ready_poll_interval: Duration,

    #[serde(default = "default_ready_timeout", with = "humantime_serde")]
    pub ready_timeout: Duration,

    /// Overall budget used when a request does not set one.
    #[serde(default = "default_deployment_timeout", with = "humantime_serde")]
    pub deployment_timeout: Duration,

    /// Per-task timeout used when a task does not set one.
    #[serde(default = "default_task_timeout", with = "humantime_serde")]
    pub task_timeout: Duration,

    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,

    #[serde(default = "default_max_retry_delay", with = "humantime_serde")]
    pub max_retry_delay: Duration,

    #[serde(default = "default_cleanup_timeout", with = "humantime_serde")]
    pub cleanup_timeout: Duration,
}

fn default_ready_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_deployment_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_task_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_retry_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_cleanup_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            ready_poll_interval: default_ready_poll_interval(),
            ready_timeout: default_ready_timeout(),
            deployment_timeout: default_deployment_timeout(),
            task_timeout: default_task_timeout(),
            retry_delay: default_retry_delay(),
            max_retry_delay: default_max_retry_delay(),
            cleanup_timeout: default_cleanup_timeout(),
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document is a valid config with every default.
        if yaml.trim().is_empty() {
            return Ok(Config::default());
        }
        let config: Config = serde_yaml::from_str(yaml)?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Like `discover`, but falls back to defaults when no file exists.
    pub fn discover_or_default(dir: &Path) -> Result<Self> {
        match Self::discover(dir) {
            Err(Error::ConfigNotFound(_)) => Ok(Config::default()),
            other => other,
        }
    }

    fn check(&self) -> Result<()> {
        let o = &self.orchestrator;
        if o.ready_poll_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "orchestrator.ready_poll_interval must be greater than zero".to_string(),
            ));
        }
        if o.deployment_timeout.is_zero() || o.task_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "orchestrator timeouts must be greater than zero".to_string(),
            ));
        }
        if o.max_retry_delay < o.retry_delay {
            return Err(Error::InvalidConfig(
                "orchestrator.max_retry_delay must not be smaller than retry_delay".to_string(),
            ));
        }
        if self.cloud.resource_group.is_empty() {
            return Err(Error::InvalidConfig(
                "cloud.resource_group cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn init_config(dir: &Path, resource_group: Option<&str>, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let mut config = Config::default();
    if let Some(rg) = resource_group {
        config.cloud.resource_group = rg.to_string();
    }

    std::fs::write(&config_path, generate_template_yaml(&config))?;
    Ok(())
}

fn generate_template_yaml(config: &Config) -> String {
    format!(
        r#"cloud:
  resource_group: {}
  default_size: {}
  default_image: {}
  admin_user: {}
mesh:
  namespace: {}
  network: {}
  cluster_name: {}
  mesh_id: {}
orchestrator:
  ready_poll_interval: 30s
  deployment_timeout: 30m
  task_timeout: 5m
"#,
        config.cloud.resource_group,
        config.cloud.default_size,
        config.cloud.default_image,
        config.cloud.admin_user,
        config.mesh.namespace,
        config.mesh.network,
        config.mesh.cluster_name,
        config.mesh.mesh_id,
    )
}
