// ABOUTME: SSH settings used to reach provisioned instances.
// ABOUTME: Converts into a session config for a concrete host and user.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::ssh::SessionConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Accept and record an unknown host key on first connection.
    #[serde(default = "default_trust_first_connection")]
    pub trust_first_connection: bool,
    #[serde(default)]
    pub known_hosts_path: Option<PathBuf>,
}

fn default_port() -> u16 {
    22
}

fn default_trust_first_connection() -> bool {
    true
}

impl Default for SshSettings {
    fn default() -> Self {
        SshSettings {
            port: default_port(),
            key_path: None,
            trust_first_connection: default_trust_first_connection(),
            known_hosts_path: None,
        }
    }
}

impl SshSettings {
    /// Build a session config for the given host and user.
    pub fn session_config(&self, host: &str, user: &str, timeout: Duration) -> SessionConfig {
        let mut config = SessionConfig::new(host, user)
            .port(self.port)
            .trust_on_first_use(self.trust_first_connection)
            .command_timeout(timeout);
        if let Some(path) = &self.key_path {
            config = config.key_path(path);
        }
        if let Some(path) = &self.known_hosts_path {
            config = config.known_hosts_path(path);
        }
        config
    }
}
