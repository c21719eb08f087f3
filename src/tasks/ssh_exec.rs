// ABOUTME: RemoteExecutor that runs script tasks over an SSH session.
// ABOUTME: Opens a session per command and disconnects afterwards.

use async_trait::async_trait;
use std::time::Duration;

use super::{ExecError, RemoteExecutor};
use crate::config::SshSettings;
use crate::ssh::{CommandOutput, Session};

#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    settings: SshSettings,
}

impl SshExecutor {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        host: &str,
        user: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let config = self.settings.session_config(host, user, timeout);
        let session = Session::connect(config).await?;
        tracing::debug!("Executing on {}@{}: {}", user, host, command);

        let result = session.exec(command).await;

        if let Err(e) = session.disconnect().await {
            tracing::debug!("SSH disconnect from {} failed: {}", host, e);
        }

        Ok(result?)
    }
}
