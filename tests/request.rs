// ABOUTME: Integration tests for deployment request parsing and validation.
// ABOUTME: Covers YAML loading, defaults, task kinds, and rejection of malformed requests.

use meshvm::config::{CloudConfig, MeshConfig, OrchestratorConfig};
use meshvm::deploy::{BootConfig, ValidationError};
use meshvm::error::Error;
use meshvm::request::{DeploymentRequest, TaskKind};
use std::fs;
use std::time::Duration;

const FULL_REQUEST: &str = r#"
name: api-01
size: Standard_D2s_v5
admin:
  username: ops
  ssh_public_key: "ssh-ed25519 AAAAC3Nza ops@laptop"
tags:
  team: platform
mesh:
  namespace: apps
  labels:
    tier: backend
  create_service_entry: true
  service_name: api
tasks:
  - name: settle
    type: wait
    duration: 30s
  - name: docker
    type: script
    command: docker info
    expect_output: "Server Version"
    retries: 2
  - name: health
    type: validate
    endpoint: "http://{address}:8080/health"
    expect_status: 200
    timeout: 10s
timeout: 20m
auto_cleanup: true
"#;

mod parsing {
    use super::*;

    #[test]
    fn parse_full_request() {
        let request = DeploymentRequest::from_yaml(FULL_REQUEST).unwrap();
        assert_eq!(request.name.as_str(), "api-01");
        assert_eq!(request.tasks.len(), 3);
        assert_eq!(request.timeout, Some(Duration::from_secs(20 * 60)));
        assert!(request.auto_cleanup);
        assert!(request.validate().is_ok());

        let mesh = request.mesh_enabled().unwrap();
        assert!(mesh.create_workload_entry);
        assert_eq!(mesh.service_to_register(), Some("api"));
        assert!(matches!(request.tasks[1].kind, TaskKind::Script { .. }));
        assert_eq!(request.tasks[1].retries, Some(2));
    }

    #[test]
    fn unset_fields_fall_back_to_config() {
        let request = DeploymentRequest::from_yaml(
            "name: web\nadmin:\n  ssh_public_key: \"ssh-ed25519 AAAA\"\n",
        )
        .unwrap();
        let cloud = CloudConfig::default();
        let orchestrator = OrchestratorConfig::default();

        assert_eq!(request.size(&cloud), "Standard_B2s");
        assert_eq!(request.image(&cloud), "Ubuntu2204");
        assert_eq!(request.admin_username(&cloud), "azureuser");
        assert_eq!(request.mesh_scope(&MeshConfig::default()), "istio-system");

        let policy = request.policy(&orchestrator);
        assert_eq!(policy.timeout, Duration::from_secs(30 * 60));
        assert!(!policy.auto_cleanup);
    }

    #[test]
    fn workload_labels_get_defaults() {
        let request = DeploymentRequest::from_yaml(FULL_REQUEST).unwrap();
        let labels = request.workload_labels();
        assert_eq!(labels.get("app").map(String::as_str), Some("api-01"));
        assert_eq!(labels.get("version").map(String::as_str), Some("v1"));
        assert_eq!(labels.get("tier").map(String::as_str), Some("backend"));
    }

    #[test]
    fn disabled_mesh_is_ignored() {
        let request = DeploymentRequest::from_yaml(
            "name: web\nadmin:\n  ssh_public_key: k\nmesh:\n  enabled: false\n",
        )
        .unwrap();
        assert!(request.mesh_enabled().is_none());
    }

    #[test]
    fn invalid_name_fails_to_parse() {
        assert!(DeploymentRequest::from_yaml("name: Web_01\n").is_err());
    }
}

mod validation {
    use super::*;

    fn request(yaml: &str) -> DeploymentRequest {
        DeploymentRequest::from_yaml(yaml).unwrap()
    }

    #[test]
    fn missing_public_key_is_rejected() {
        let err = request("name: web\n").validate().unwrap_err();
        assert_eq!(err, ValidationError::MissingCredential);
    }

    #[test]
    fn public_key_from_unset_env_is_rejected() {
        temp_env::with_var_unset("MESHVM_TEST_UNSET_KEY", || {
            let err = request("name: web\nadmin:\n  ssh_public_key:\n    env: MESHVM_TEST_UNSET_KEY\n")
                .validate()
                .unwrap_err();
            assert!(matches!(err, ValidationError::UnresolvedCredential(_)));
        });
    }

    #[test]
    fn public_key_from_env_resolves() {
        temp_env::with_var("MESHVM_TEST_KEY", Some("ssh-ed25519 AAAAenv"), || {
            let req = request("name: web\nadmin:\n  ssh_public_key:\n    env: MESHVM_TEST_KEY\n");
            assert!(req.validate().is_ok());
            assert_eq!(req.ssh_public_key().unwrap(), "ssh-ed25519 AAAAenv");
        });
    }

    #[test]
    fn service_entry_requires_name() {
        let err = request(
            "name: web\nadmin:\n  ssh_public_key: k\nmesh:\n  create_service_entry: true\n",
        )
        .validate()
        .unwrap_err();
        assert_eq!(err, ValidationError::MissingServiceName);
    }

    #[test]
    fn duplicate_task_names_are_rejected() {
        let err = request(
            r#"
name: web
admin:
  ssh_public_key: k
tasks:
  - { name: a, type: wait, duration: 1s }
  - { name: a, type: wait, duration: 2s }
"#,
        )
        .validate()
        .unwrap_err();
        assert_eq!(err, ValidationError::DuplicateTask("a".to_string()));
    }

    #[test]
    fn non_http_endpoint_is_rejected() {
        let err = request(
            r#"
name: web
admin:
  ssh_public_key: k
tasks:
  - { name: tls, type: validate, endpoint: "https://{address}/" }
"#,
        )
        .validate()
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidEndpoint { .. }));
    }

    #[test]
    fn empty_script_is_rejected() {
        let err = request(
            r#"
name: web
admin:
  ssh_public_key: k
tasks:
  - { name: noop, type: script, command: "  " }
"#,
        )
        .validate()
        .unwrap_err();
        assert_eq!(err, ValidationError::EmptyCommand("noop".to_string()));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = request("name: web\nadmin:\n  ssh_public_key: k\ntimeout: 0s\n")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::ZeroTimeout(_)));
    }

    #[test]
    fn load_reports_file_on_validation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.yml");
        fs::write(&path, "name: web\n").unwrap();

        match DeploymentRequest::load(&path) {
            Err(Error::InvalidRequest { path: p, source }) => {
                assert_eq!(p, path);
                assert_eq!(source, ValidationError::MissingCredential);
            }
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }
}

mod boot_config {
    use super::*;

    #[test]
    fn mesh_request_gets_placeholders_and_sidecar() {
        let request = DeploymentRequest::from_yaml(FULL_REQUEST).unwrap();
        let boot =
            BootConfig::generate(&request, &CloudConfig::default(), &MeshConfig::default()).unwrap();
        let rendered = boot.render().unwrap();

        assert!(rendered.starts_with("#cloud-config\n"));
        assert!(rendered.contains("/etc/istio-vm/istio-token"));
        assert!(rendered.contains("usermod -aG docker ops"));
        assert!(rendered.contains("dpkg -i"));
    }

    #[test]
    fn plain_request_has_no_mesh_files() {
        let request =
            DeploymentRequest::from_yaml("name: web\nadmin:\n  ssh_public_key: k\n").unwrap();
        let boot =
            BootConfig::generate(&request, &CloudConfig::default(), &MeshConfig::default()).unwrap();

        assert!(boot.write_files.is_empty());
        assert!(!boot.render().unwrap().contains("istio-token"));
    }
}
