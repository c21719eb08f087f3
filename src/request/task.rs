// ABOUTME: Post-boot task declarations carried by a deployment request.
// ABOUTME: Task parameters are a closed tagged union checked at validation time.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::deploy::ValidationError;

/// Placeholder replaced by the instance address in `validate` endpoints.
pub const ADDRESS_PLACEHOLDER: &str = "{address}";

/// One unit of post-boot work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,

    #[serde(flatten)]
    pub kind: TaskKind,

    /// Per-attempt timeout; the runner default applies when unset.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Additional attempts after the first; zero when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskKind {
    /// Sleep for a fixed duration.
    Wait {
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },
    /// HTTP GET an endpoint and compare the response.
    Validate {
        endpoint: String,
        /// Exact status to expect; any 2xx when unset.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect_status: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect_body: Option<String>,
    },
    /// Run a command on the instance over SSH.
    Script {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect_output: Option<String>,
    },
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Wait { .. } => "wait",
            TaskKind::Validate { .. } => "validate",
            TaskKind::Script { .. } => "script",
        }
    }
}

impl Task {
    pub fn wait(name: impl Into<String>, duration: Duration) -> Self {
        Self::new(name, TaskKind::Wait { duration })
    }

    pub fn script(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(
            name,
            TaskKind::Script {
                command: command.into(),
                expect_output: None,
            },
        )
    }

    pub fn validate(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::new(
            name,
            TaskKind::Validate {
                endpoint: endpoint.into(),
                expect_status: None,
                expect_body: None,
            },
        )
    }

    fn new(name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            kind,
            timeout: None,
            retries: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Identifier recorded in the status when this task succeeds.
    pub fn completion_stage(&self) -> String {
        format!("task_{}_completed", self.name)
    }

    pub(crate) fn check(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyTaskName);
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ValidationError::ZeroTimeout(format!("task {}", self.name)));
        }

        match &self.kind {
            TaskKind::Wait { .. } => Ok(()),
            TaskKind::Script { command, .. } => {
                if command.trim().is_empty() {
                    Err(ValidationError::EmptyCommand(self.name.clone()))
                } else {
                    Ok(())
                }
            }
            TaskKind::Validate {
                endpoint,
                expect_status,
                ..
            } => {
                let invalid = |reason: &str| ValidationError::InvalidEndpoint {
                    task: self.name.clone(),
                    endpoint: endpoint.clone(),
                    reason: reason.to_string(),
                };

                let probe = endpoint.replace(ADDRESS_PLACEHOLDER, "127.0.0.1");
                let uri: hyper::Uri = probe.parse().map_err(|_| invalid("not a valid URI"))?;
                if uri.scheme_str() != Some("http") {
                    return Err(invalid("only http:// endpoints are supported"));
                }
                if uri.host().is_none() {
                    return Err(invalid("missing host"));
                }
                if let Some(status) = expect_status
                    && !(100..=599).contains(status)
                {
                    return Err(invalid("expect_status is not an HTTP status code"));
                }
                Ok(())
            }
        }
    }
}
