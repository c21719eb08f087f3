// ABOUTME: Post-boot task execution against a provisioned instance.
// ABOUTME: Applies per-attempt timeouts, capped exponential retry, and the deployment scope.

mod error;
pub mod probe;
pub mod ssh_exec;

use error::{CheckFailedSnafu, ProbeSnafu, RemoteSnafu};
pub use error::{ExecError, ProbeError, TaskError, TaskErrorKind};
pub use probe::HyperProbe;
pub use ssh_exec::SshExecutor;

use async_trait::async_trait;
use snafu::ResultExt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::OrchestratorConfig;
use crate::deploy::{DeployScope, Interrupted};
use crate::request::{ADDRESS_PLACEHOLDER, Task, TaskKind};
use crate::ssh::CommandOutput;
use crate::types::InstanceName;

/// Where and as whom tasks run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTarget {
    pub instance: InstanceName,
    /// Address reachable from this host, if the instance has one.
    pub address: Option<String>,
    pub user: String,
}

/// Response seen by an HTTP probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

/// Executes one command on a remote instance.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(
        &self,
        host: &str,
        user: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError>;
}

/// Performs one HTTP GET.
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn get(&self, url: &str) -> Result<ProbeResponse, ProbeError>;
}

/// Delay between attempts: `min(base * 2^(attempt-1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(30),
        }
    }
}

/// Result of running one task, including how many attempts it took.
#[derive(Debug)]
pub struct TaskRun {
    pub attempts: u32,
    pub result: Result<(), TaskError>,
}

impl TaskRun {
    fn finished(attempts: u32, result: Result<(), TaskError>) -> Self {
        Self { attempts, result }
    }
}

/// Runs declared tasks one at a time.
#[derive(Clone)]
pub struct TaskRunner {
    executor: Arc<dyn RemoteExecutor>,
    probe: Arc<dyn HttpProbe>,
    retry: RetryPolicy,
    default_timeout: Duration,
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("retry", &self.retry)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl TaskRunner {
    pub fn new(executor: Arc<dyn RemoteExecutor>, probe: Arc<dyn HttpProbe>) -> Self {
        Self {
            executor,
            probe,
            retry: RetryPolicy::default(),
            default_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_settings(mut self, settings: &OrchestratorConfig) -> Self {
        self.retry = RetryPolicy {
            base: settings.retry_delay,
            max: settings.max_retry_delay,
        };
        self.default_timeout = settings.task_timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Run `task`, retrying `script` and `validate` up to `task.retries` extra times.
    pub async fn run(&self, target: &TaskTarget, task: &Task, scope: &DeployScope) -> TaskRun {
        tracing::info!(instance = %target.instance, "Running {} task {}", task.kind.label(), task.name);

        if let TaskKind::Wait { duration } = &task.kind {
            return TaskRun::finished(1, self.run_wait(task, *duration, scope).await);
        }

        let per_attempt = task.timeout.unwrap_or(self.default_timeout);
        let max_attempts = task.retries.unwrap_or(0).saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            if let Some(cause) = scope.interrupted() {
                return TaskRun::finished(attempt - 1, Err(interruption(task, cause)));
            }

            let result = match scope.guard(Some(per_attempt), self.attempt(target, task, per_attempt)).await {
                Ok(result) => result,
                Err(Interrupted::StageTimeout) => Err(TaskError::TimedOut {
                    task: task.name.clone(),
                    timeout: per_attempt,
                }),
                Err(cause) => return TaskRun::finished(attempt, Err(interruption(task, cause))),
            };

            let err = match result {
                Ok(()) => return TaskRun::finished(attempt, Ok(())),
                Err(err) if attempt >= max_attempts => return TaskRun::finished(attempt, Err(err)),
                Err(err) => err,
            };

            let delay = self.retry.delay(attempt);
            tracing::warn!(
                "Task {} attempt {}/{} failed: {}; retrying in {:?}",
                task.name,
                attempt,
                max_attempts,
                err,
                delay
            );

            if let Err(cause) = scope.sleep(delay).await {
                return TaskRun::finished(attempt, Err(interruption(task, cause)));
            }
        }
    }

    /// `wait` is only limited by an explicit task timeout and the scope.
    async fn run_wait(
        &self,
        task: &Task,
        duration: Duration,
        scope: &DeployScope,
    ) -> Result<(), TaskError> {
        match scope.guard(task.timeout, tokio::time::sleep(duration)).await {
            Ok(()) => Ok(()),
            Err(Interrupted::StageTimeout) => Err(TaskError::TimedOut {
                task: task.name.clone(),
                timeout: task.timeout.unwrap_or(duration),
            }),
            Err(cause) => Err(interruption(task, cause)),
        }
    }

    async fn attempt(&self, target: &TaskTarget, task: &Task, timeout: Duration) -> Result<(), TaskError> {
        match &task.kind {
            TaskKind::Wait { .. } => Ok(()),
            TaskKind::Validate {
                endpoint,
                expect_status,
                expect_body,
            } => {
                let url = resolve_endpoint(endpoint, target, task)?;
                let response = self
                    .probe
                    .get(&url)
                    .await
                    .context(ProbeSnafu { task: &task.name })?;
                check_response(task, &response, *expect_status, expect_body.as_deref())
            }
            TaskKind::Script {
                command,
                expect_output,
            } => {
                let host = target.address.as_deref().ok_or_else(|| TaskError::NoAddress {
                    task: task.name.clone(),
                })?;
                let output = self
                    .executor
                    .execute(host, &target.user, command, timeout)
                    .await
                    .context(RemoteSnafu { task: &task.name })?;
                check_output(task, &output, expect_output.as_deref())
            }
        }
    }
}

fn interruption(task: &Task, cause: Interrupted) -> TaskError {
    match cause {
        Interrupted::Cancelled => TaskError::Cancelled {
            task: task.name.clone(),
        },
        Interrupted::DeadlineExceeded | Interrupted::StageTimeout => TaskError::DeadlineExceeded {
            task: task.name.clone(),
        },
    }
}

fn resolve_endpoint(endpoint: &str, target: &TaskTarget, task: &Task) -> Result<String, TaskError> {
    if !endpoint.contains(ADDRESS_PLACEHOLDER) {
        return Ok(endpoint.to_string());
    }
    let address = target.address.as_deref().ok_or_else(|| TaskError::NoAddress {
        task: task.name.clone(),
    })?;
    Ok(endpoint.replace(ADDRESS_PLACEHOLDER, address))
}

fn check_response(
    task: &Task,
    response: &ProbeResponse,
    expect_status: Option<u16>,
    expect_body: Option<&str>,
) -> Result<(), TaskError> {
    let status_ok = match expect_status {
        Some(expected) => response.status == expected,
        None => (200..300).contains(&response.status),
    };
    if !status_ok {
        let expected = expect_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "2xx".to_string());
        return Err(TaskError::CheckFailed {
            task: task.name.clone(),
            reason: format!("expected status {}, got {}", expected, response.status),
        });
    }
    if let Some(needle) = expect_body
        && !response.body.contains(needle)
    {
        return Err(TaskError::CheckFailed {
            task: task.name.clone(),
            reason: format!("response body does not contain {:?}", needle),
        });
    }
    Ok(())
}

fn check_output(task: &Task, output: &CommandOutput, expect: Option<&str>) -> Result<(), TaskError> {
    if !output.success() {
        return Err(TaskError::NonZeroExit {
            task: task.name.clone(),
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    if let Some(needle) = expect
        && !output.stdout.contains(needle)
    {
        return CheckFailedSnafu {
            task: &task.name,
            reason: format!("output does not contain {:?}", needle),
        }
        .fail();
    }
    Ok(())
}
