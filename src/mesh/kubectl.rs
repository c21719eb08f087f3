// ABOUTME: MeshRegistrar backed by kubectl against an Istio control plane.
// ABOUTME: Issues service account tokens and applies WorkloadEntry/ServiceEntry records.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;

use super::{MeshRegistrar, RegistrationError, RegistrationHandle, RegistrationKind, TrustBundle};
use crate::cloud::InstanceInfo;
use crate::config::MeshConfig;
use crate::process::{self, ProcessOutput};

const ISTIO_API_VERSION: &str = "networking.istio.io/v1beta1";
const TOKEN_DURATION: &str = "8760h";
const XDS_PORT: u16 = 15012;

/// Drives `kubectl` for mesh membership and `ping` for reachability.
#[derive(Debug, Clone)]
pub struct KubectlRegistrar {
    program: String,
    config: MeshConfig,
}

impl KubectlRegistrar {
    pub fn new(config: MeshConfig) -> Self {
        Self {
            program: "kubectl".to_string(),
            config,
        }
    }

    /// Use a different executable (e.g. a wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn kubectl(&self, args: &[&str], stdin: Option<&str>) -> std::io::Result<ProcessOutput> {
        let mut full: Vec<String> = Vec::with_capacity(args.len() + 2);
        if let Some(context) = &self.config.kubectl_context {
            full.push("--context".to_string());
            full.push(context.clone());
        }
        full.extend(args.iter().map(|a| a.to_string()));
        process::run(&self.program, &full, stdin).await
    }

    async fn ensure_service_account(&self, name: &str, scope: &str) -> Result<(), RegistrationError> {
        let output = self
            .kubectl(&["create", "serviceaccount", name, "-n", scope], None)
            .await?;
        if output.success || output.stderr.contains("AlreadyExists") || output.stderr.contains("already exists") {
            return Ok(());
        }
        Err(RegistrationError::TrustMaterial(format!(
            "cannot create service account {}: {}",
            name,
            output.diagnostic()
        )))
    }

    async fn fetch_trust(&self, account: &str, scope: &str) -> Result<(String, String, String), RegistrationError> {
        let duration = format!("--duration={}", TOKEN_DURATION);
        let token = self
            .kubectl(&["create", "token", account, "-n", scope, &duration], None)
            .await?;
        if !token.success {
            return Err(RegistrationError::TrustMaterial(format!(
                "cannot issue token: {}",
                token.diagnostic()
            )));
        }

        let cp_ns = self.config.control_plane_namespace.as_str();
        let cert = self
            .kubectl(
                &[
                    "get",
                    "configmap",
                    "istio-ca-root-cert",
                    "-n",
                    cp_ns,
                    "-o",
                    "jsonpath={.data.root-cert\\.pem}",
                ],
                None,
            )
            .await?;
        if !cert.success || cert.stdout.trim().is_empty() {
            return Err(RegistrationError::TrustMaterial(format!(
                "cannot read root certificate: {}",
                cert.diagnostic()
            )));
        }

        let svc = self
            .kubectl(
                &[
                    "get",
                    "svc",
                    "istiod",
                    "-n",
                    cp_ns,
                    "-o",
                    "jsonpath={.status.loadBalancer.ingress[0].ip}",
                ],
                None,
            )
            .await?;
        let ip = svc.stdout.trim();
        if !svc.success || ip.is_empty() {
            return Err(RegistrationError::TrustMaterial(
                "control plane has no external address".to_string(),
            ));
        }

        Ok((
            token.stdout.trim().to_string(),
            cert.stdout,
            format!("{}:{}", ip, XDS_PORT),
        ))
    }

    async fn apply(&self, name: &str, manifest: &serde_json::Value) -> Result<(), RegistrationError> {
        let body = manifest.to_string();
        let output = self.kubectl(&["apply", "-f", "-"], Some(&body)).await?;
        if output.success {
            Ok(())
        } else {
            Err(RegistrationError::Apply {
                name: name.to_string(),
                reason: output.diagnostic(),
            })
        }
    }

    fn service_account_name(instance: &InstanceInfo) -> String {
        instance.name.workload_record()
    }
}

fn resource_type(kind: RegistrationKind) -> &'static str {
    match kind {
        RegistrationKind::TrustBundle => "serviceaccount",
        RegistrationKind::Workload => "workloadentry",
        RegistrationKind::Service => "serviceentry",
    }
}

pub(crate) fn cluster_env(control_plane_address: &str) -> String {
    format!(
        "ISTIO_SERVICE_CIDR=10.0.0.0/16\n\
         ISTIO_INBOUND_PORTS=*\n\
         ISTIO_LOCAL_GATEWAY_PORT=15008\n\
         ISTIO_PILOT_PORT=15010\n\
         ISTIO_CP_ADDRESS={}\n",
        control_plane_address
    )
}

pub(crate) fn mesh_config(instance: &str, config: &MeshConfig) -> String {
    format!(
        "apiVersion: install.istio.io/v1alpha1\n\
         kind: IstioOperator\n\
         metadata:\n  name: istio-vm-{}\n\
         spec:\n  meshConfig:\n    defaultConfig:\n      proxyMetadata:\n        \
         ISTIO_META_DNS_CAPTURE: \"true\"\n        \
         ISTIO_META_DNS_AUTO_ALLOCATE: \"true\"\n        \
         ISTIO_META_NETWORK: {}\n        \
         ISTIO_META_CLUSTER_ID: {}\n        \
         ISTIO_META_MESH_ID: {}\n",
        instance, config.network, config.cluster_name, config.mesh_id
    )
}

/// Hosts file line pointing the control plane name at its external address.
pub(crate) fn hosts_entry(control_plane_address: &str, config: &MeshConfig) -> String {
    let ip = control_plane_address
        .rsplit_once(':')
        .map(|(ip, _)| ip)
        .unwrap_or(control_plane_address);
    format!("{} istiod.{}.svc", ip, config.control_plane_namespace)
}

pub(crate) fn workload_entry(
    name: &str,
    scope: &str,
    address: &str,
    account: &str,
    labels: &BTreeMap<String, String>,
    config: &MeshConfig,
) -> serde_json::Value {
    json!({
        "apiVersion": ISTIO_API_VERSION,
        "kind": "WorkloadEntry",
        "metadata": { "name": name, "namespace": scope },
        "spec": {
            "address": address,
            "network": config.network,
            "labels": labels,
            "serviceAccount": account,
            "ports": { "http": config.service_port },
        }
    })
}

pub(crate) fn service_entry(
    name: &str,
    scope: &str,
    host: &str,
    address: &str,
    config: &MeshConfig,
) -> serde_json::Value {
    json!({
        "apiVersion": ISTIO_API_VERSION,
        "kind": "ServiceEntry",
        "metadata": { "name": name, "namespace": scope },
        "spec": {
            "hosts": [host],
            "location": "MESH_EXTERNAL",
            "resolution": "STATIC",
            "ports": [{ "number": config.service_port, "name": "http", "protocol": "HTTP" }],
            "endpoints": [{
                "address": address,
                "network": config.network,
                "ports": { "http": config.service_port },
            }],
        }
    })
}

#[async_trait]
impl MeshRegistrar for KubectlRegistrar {
    async fn generate_trust_material(
        &self,
        instance: &InstanceInfo,
        scope: &str,
    ) -> Result<TrustBundle, RegistrationError> {
        let account = Self::service_account_name(instance);
        tracing::info!("Generating trust material for {} in {}", instance.name, scope);

        self.ensure_service_account(&account, scope).await?;
        let handle = RegistrationHandle::new(RegistrationKind::TrustBundle, &account, scope);

        let (token, root_cert, address) = match self.fetch_trust(&account, scope).await {
            Ok(parts) => parts,
            Err(e) => {
                // The account was created but no bundle is handed back; remove it here.
                if let Err(cleanup) = self.deregister(&handle).await {
                    tracing::warn!("Failed to remove service account {}: {}", account, cleanup);
                }
                return Err(e);
            }
        };

        Ok(TrustBundle {
            cluster_env: cluster_env(&address),
            mesh_config: mesh_config(instance.name.as_str(), &self.config),
            hosts: hosts_entry(&address, &self.config),
            handle,
            token,
            root_cert,
            control_plane_address: address,
        })
    }

    async fn register_workload(
        &self,
        instance: &InstanceInfo,
        scope: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<RegistrationHandle, RegistrationError> {
        let address = instance.mesh_address().ok_or(RegistrationError::NoAddress)?;
        let name = instance.name.workload_record();
        let account = Self::service_account_name(instance);
        tracing::info!("Creating WorkloadEntry {}/{}", scope, name);

        let manifest = workload_entry(&name, scope, address, &account, labels, &self.config);
        self.apply(&name, &manifest).await?;
        Ok(RegistrationHandle::new(RegistrationKind::Workload, name, scope))
    }

    async fn register_service(
        &self,
        instance: &InstanceInfo,
        service_name: &str,
        scope: &str,
    ) -> Result<RegistrationHandle, RegistrationError> {
        let address = instance.mesh_address().ok_or(RegistrationError::NoAddress)?;
        let name = instance.name.service_record();
        let host = format!("{}.{}.svc.cluster.local", service_name, scope);
        tracing::info!("Creating ServiceEntry {}/{} for {}", scope, name, host);

        let manifest = service_entry(&name, scope, &host, address, &self.config);
        self.apply(&name, &manifest).await?;
        Ok(RegistrationHandle::new(RegistrationKind::Service, name, scope))
    }

    async fn deregister(&self, handle: &RegistrationHandle) -> Result<(), RegistrationError> {
        tracing::info!("Removing {}", handle);
        let output = self
            .kubectl(
                &[
                    "delete",
                    resource_type(handle.kind),
                    &handle.name,
                    "-n",
                    &handle.scope,
                    "--ignore-not-found",
                ],
                None,
            )
            .await?;
        if output.success {
            Ok(())
        } else {
            Err(RegistrationError::Delete {
                name: handle.name.clone(),
                reason: output.diagnostic(),
            })
        }
    }

    async fn validate_reachability(&self, address: &str) -> Result<bool, RegistrationError> {
        let args = ["-c", "3", "-W", "2", address].map(str::to_string);
        let output = process::run("ping", &args, None)
            .await
            .map_err(|e| RegistrationError::Reachability(e.to_string()))?;
        Ok(output.success)
    }
}
