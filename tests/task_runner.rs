// ABOUTME: Tests for the post-boot task runner.
// ABOUTME: Verifies wait timing, retry limits, early success, expectations, and deadlines.

mod support;

use meshvm::deploy::DeployScope;
use meshvm::request::{Task, TaskKind};
use meshvm::tasks::{TaskErrorKind, TaskTarget};
use std::time::Duration;
use support::{Call, Harness, name};
use tokio::time::Instant;

fn target() -> TaskTarget {
    TaskTarget {
        instance: name("web-01"),
        address: Some(support::PUBLIC_IP.to_string()),
        user: "azureuser".to_string(),
    }
}

fn executions(harness: &Harness) -> usize {
    harness.log.count(|c| matches!(c, Call::Execute { .. }))
}

// =============================================================================
// Wait
// =============================================================================

/// Test: A wait task returns after exactly its duration.
#[tokio::test(start_paused = true)]
async fn wait_elapses_full_duration() {
    let harness = Harness::new();
    let (scope, _cancel) = DeployScope::new(Duration::from_secs(600));
    let task = Task::wait("settle", Duration::from_secs(45));

    let started = Instant::now();
    let run = harness.task_runner().run(&target(), &task, &scope).await;

    assert!(run.result.is_ok());
    assert_eq!(run.attempts, 1);
    assert_eq!(started.elapsed(), Duration::from_secs(45));
}

/// Test: A wait task longer than the remaining budget stops at the deadline.
#[tokio::test(start_paused = true)]
async fn wait_is_cut_at_deadline() {
    let harness = Harness::new();
    let (scope, _cancel) = DeployScope::new(Duration::from_secs(10));
    let task = Task::wait("settle", Duration::from_secs(45));

    let started = Instant::now();
    let run = harness.task_runner().run(&target(), &task, &scope).await;

    let err = run.result.unwrap_err();
    assert_eq!(err.kind(), TaskErrorKind::DeadlineExceeded);
    assert!(err.is_interruption());
    assert_eq!(started.elapsed(), Duration::from_secs(10));
}

/// Test: A wait task is not limited by the default task timeout.
#[tokio::test(start_paused = true)]
async fn wait_ignores_default_task_timeout() {
    let harness = Harness::new();
    let (scope, _cancel) = DeployScope::new(Duration::from_secs(600));
    let task = Task::wait("settle", Duration::from_secs(120));

    let run = harness
        .task_runner()
        .with_default_timeout(Duration::from_secs(5))
        .run(&target(), &task, &scope)
        .await;

    assert!(run.result.is_ok());
}

/// Test: An explicit timeout shorter than the wait fails the task.
#[tokio::test(start_paused = true)]
async fn wait_with_short_timeout_times_out() {
    let harness = Harness::new();
    let (scope, _cancel) = DeployScope::new(Duration::from_secs(600));
    let task = Task::wait("settle", Duration::from_secs(120)).with_timeout(Duration::from_secs(5));

    let started = Instant::now();
    let run = harness.task_runner().run(&target(), &task, &scope).await;

    assert_eq!(run.result.unwrap_err().kind(), TaskErrorKind::Timeout);
    assert_eq!(started.elapsed(), Duration::from_secs(5));
}

// =============================================================================
// Script
// =============================================================================

/// Test: A script with R retries runs at most R+1 times.
#[tokio::test(start_paused = true)]
async fn script_attempts_at_most_retries_plus_one() {
    let harness = Harness::new();
    for _ in 0..10 {
        harness.executor.respond(1, "");
    }
    let (scope, _cancel) = DeployScope::new(Duration::from_secs(3600));
    let task = Task::script("migrate", "./migrate.sh").with_retries(3);

    let run = harness.task_runner().run(&target(), &task, &scope).await;

    let err = run.result.unwrap_err();
    assert_eq!(err.kind(), TaskErrorKind::CheckFailed);
    assert_eq!(run.attempts, 4);
    assert_eq!(executions(&harness), 4);
}

/// Test: A script stops retrying at the first success.
#[tokio::test(start_paused = true)]
async fn script_stops_at_first_success() {
    let harness = Harness::new();
    harness.executor.respond(1, "");
    harness.executor.respond(0, "done");
    let (scope, _cancel) = DeployScope::new(Duration::from_secs(3600));
    let task = Task::script("migrate", "./migrate.sh").with_retries(5);

    let started = Instant::now();
    let run = harness.task_runner().run(&target(), &task, &scope).await;

    assert!(run.result.is_ok());
    assert_eq!(run.attempts, 2);
    assert_eq!(executions(&harness), 2);
    // One retry delay of the 2s base.
    assert_eq!(started.elapsed(), Duration::from_secs(2));
}

/// Test: Retry delays grow exponentially up to the cap.
#[tokio::test(start_paused = true)]
async fn script_retry_delays_are_capped() {
    let harness = Harness::new();
    for _ in 0..10 {
        harness.executor.respond(1, "");
    }
    let (scope, _cancel) = DeployScope::new(Duration::from_secs(3600));
    let task = Task::script("migrate", "./migrate.sh").with_retries(6);

    let started = Instant::now();
    harness.task_runner().run(&target(), &task, &scope).await;

    // 2 + 4 + 8 + 16 + 30 + 30
    assert_eq!(started.elapsed(), Duration::from_secs(90));
}

/// Test: Each script attempt is bounded by the per-attempt timeout.
#[tokio::test(start_paused = true)]
async fn script_attempt_times_out() {
    let harness = Harness::new();
    harness.executor.delay(Duration::from_secs(300));
    let (scope, _cancel) = DeployScope::new(Duration::from_secs(3600));
    let task = Task::script("hang", "sleep 300")
        .with_timeout(Duration::from_secs(10))
        .with_retries(1);

    let started = Instant::now();
    let run = harness.task_runner().run(&target(), &task, &scope).await;

    assert_eq!(run.result.unwrap_err().kind(), TaskErrorKind::Timeout);
    assert_eq!(run.attempts, 2);
    // Two 10s attempts around one 2s retry delay.
    assert_eq!(started.elapsed(), Duration::from_secs(22));
}

/// Test: The deadline interrupts a retry loop instead of running every retry.
#[tokio::test(start_paused = true)]
async fn deadline_interrupts_retries() {
    let harness = Harness::new();
    harness.executor.delay(Duration::from_secs(300));
    let (scope, _cancel) = DeployScope::new(Duration::from_secs(25));
    let task = Task::script("hang", "sleep 300")
        .with_timeout(Duration::from_secs(10))
        .with_retries(10);

    let started = Instant::now();
    let run = harness.task_runner().run(&target(), &task, &scope).await;

    let err = run.result.unwrap_err();
    assert_eq!(err.kind(), TaskErrorKind::DeadlineExceeded);
    assert_eq!(started.elapsed(), Duration::from_secs(25));
    assert_eq!(executions(&harness), 2);
}

/// Test: Expected output must appear in stdout.
#[tokio::test(start_paused = true)]
async fn script_checks_expected_output() {
    let harness = Harness::new();
    harness.executor.respond(0, "Server Version: 24.0");
    let (scope, _cancel) = DeployScope::new(Duration::from_secs(600));
    let mut task = Task::script("docker", "docker info");
    task.kind = TaskKind::Script {
        command: "docker info".to_string(),
        expect_output: Some("Server Version: 25".to_string()),
    };

    let run = harness.task_runner().run(&target(), &task, &scope).await;

    assert_eq!(run.result.unwrap_err().kind(), TaskErrorKind::CheckFailed);
}

/// Test: A script needs an instance address.
#[tokio::test(start_paused = true)]
async fn script_without_address_is_unreachable() {
    let harness = Harness::new();
    let (scope, _cancel) = DeployScope::new(Duration::from_secs(600));
    let mut target = target();
    target.address = None;

    let run = harness
        .task_runner()
        .run(&target, &Task::script("ls", "ls"), &scope)
        .await;

    assert_eq!(run.result.unwrap_err().kind(), TaskErrorKind::Unreachable);
    assert_eq!(executions(&harness), 0);
}

// =============================================================================
// Validate
// =============================================================================

/// Test: The address placeholder is substituted and any 2xx passes by default.
#[tokio::test(start_paused = true)]
async fn validate_substitutes_address() {
    let harness = Harness::new();
    harness.probe.respond(204, "");
    let (scope, _cancel) = DeployScope::new(Duration::from_secs(600));
    let task = Task::validate("health", "http://{address}:8080/healthz");

    let run = harness.task_runner().run(&target(), &task, &scope).await;

    assert!(run.result.is_ok());
    assert_eq!(
        harness.log.calls(),
        vec![Call::Probe("http://20.1.2.3:8080/healthz".to_string())]
    );
}

/// Test: A status mismatch is retried like a script.
#[tokio::test(start_paused = true)]
async fn validate_retries_on_status_mismatch() {
    let harness = Harness::new();
    harness.probe.respond(503, "starting");
    harness.probe.respond(503, "starting");
    harness.probe.respond(200, "ready");
    let (scope, _cancel) = DeployScope::new(Duration::from_secs(600));
    let task = Task {
        kind: TaskKind::Validate {
            endpoint: "http://{address}/".to_string(),
            expect_status: Some(200),
            expect_body: Some("ready".to_string()),
        },
        ..Task::validate("health", "http://{address}/").with_retries(5)
    };

    let run = harness.task_runner().run(&target(), &task, &scope).await;

    assert!(run.result.is_ok());
    assert_eq!(run.attempts, 3);
}

/// Test: A body that lacks the expected text fails.
#[tokio::test(start_paused = true)]
async fn validate_checks_body() {
    let harness = Harness::new();
    harness.probe.respond(200, "degraded");
    let (scope, _cancel) = DeployScope::new(Duration::from_secs(600));
    let task = Task {
        kind: TaskKind::Validate {
            endpoint: "http://10.0.0.9/status".to_string(),
            expect_status: None,
            expect_body: Some("healthy".to_string()),
        },
        ..Task::validate("status", "http://10.0.0.9/status")
    };

    let run = harness.task_runner().run(&target(), &task, &scope).await;

    assert_eq!(run.result.unwrap_err().kind(), TaskErrorKind::CheckFailed);
    assert_eq!(run.attempts, 1);
}

/// Test: A cancelled scope stops the runner before the next attempt.
#[tokio::test(start_paused = true)]
async fn cancelled_scope_stops_runner() {
    let harness = Harness::new();
    let (scope, cancel) = DeployScope::new(Duration::from_secs(600));
    cancel.cancel();

    let run = harness
        .task_runner()
        .run(&target(), &Task::script("ls", "ls"), &scope)
        .await;

    assert_eq!(run.result.unwrap_err().kind(), TaskErrorKind::Cancelled);
    assert_eq!(run.attempts, 0);
    assert_eq!(executions(&harness), 0);
}
