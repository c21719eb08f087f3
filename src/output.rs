// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes, including deployment statuses.

use serde::Serialize;
use std::time::Instant;

use crate::deploy::{CleanupReport, DeploymentStatus, Outcome};
use crate::mesh::MeshFiles;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
#[derive(Debug, Clone)]
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => println!("{message}"),
            OutputMode::Json => self.emit_stdout(&JsonEvent {
                event: "success",
                message,
                duration_secs: self.duration(),
            }),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Error: {message}"),
            OutputMode::Json => {
                let event = JsonEvent {
                    event: "error",
                    message,
                    duration_secs: self.duration(),
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }

    /// Print a deployment status.
    pub fn status(&self, status: &DeploymentStatus) {
        match self.mode {
            OutputMode::Normal => print!("{}", render_status(status)),
            OutputMode::Quiet => println!("{} {}", status.name, summary(status)),
            OutputMode::Json => self.emit_stdout(&StatusEvent {
                event: "status",
                status,
            }),
        }
    }

    /// Print the generated mesh files for an instance.
    pub fn mesh_files(&self, name: &str, files: &MeshFiles) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => print!("{}", render_mesh_files(files)),
            OutputMode::Json => self.emit_stdout(&MeshFilesEvent {
                event: "mesh_files",
                instance: name,
                files,
            }),
        }
    }

    /// Print the result of a cleanup pass.
    pub fn cleanup(&self, name: &str, report: &CleanupReport) {
        match self.mode {
            OutputMode::Normal => {
                if report.is_empty() {
                    println!("{name}: nothing to clean up");
                }
                for resource in &report.released {
                    println!("  ✓ released {resource}");
                }
                for failure in &report.failed {
                    println!("  ✗ {}: {}", failure.resource, failure.error);
                }
            }
            OutputMode::Quiet => println!(
                "{name} released={} failed={}",
                report.released.len(),
                report.failed.len()
            ),
            OutputMode::Json => self.emit_stdout(&CleanupEvent {
                event: "cleanup",
                instance: name,
                report,
            }),
        }
    }

    fn emit_stdout<T: Serialize>(&self, event: &T) {
        if let Ok(json) = serde_json::to_string(event) {
            println!("{json}");
        }
    }
}

/// One-word summary: completed, degraded, failed, or the current state.
pub fn summary(status: &DeploymentStatus) -> String {
    match status.outcome {
        Some(Outcome::Completed) if status.is_degraded() => "degraded".to_string(),
        Some(Outcome::Completed) => "completed".to_string(),
        Some(Outcome::Failed) => "failed".to_string(),
        None => status.state.to_string(),
    }
}

/// Multi-line human rendering of a status.
pub fn render_status(status: &DeploymentStatus) -> String {
    let mut out = format!("{}: {} ({})\n", status.name, summary(status), status.state);

    if let Some(task) = &status.current_task {
        out.push_str(&format!("  running: {}\n", task));
    }
    if let Some(instance) = &status.instance {
        let address = instance.remote_address().unwrap_or("-");
        out.push_str(&format!(
            "  instance: {} [{}]\n",
            address, instance.power_state
        ));
    }
    if let Some(files) = &status.mesh_files {
        out.push_str(&format!(
            "  mesh: control plane {}\n",
            files.control_plane_address
        ));
    }
    for stage in &status.completed_tasks {
        out.push_str(&format!("  ✓ {}\n", stage));
    }
    for failure in &status.failed_tasks {
        out.push_str(&format!(
            "  ✗ task {} after {} attempt(s): {}\n",
            failure.name, failure.attempts, failure.error
        ));
    }
    for note in &status.notes {
        out.push_str(&format!("  ! {}\n", note.message));
    }
    if let Some(error) = &status.error {
        out.push_str(&format!("  error: {}\n", error.message));
    }
    let held: Vec<_> = status
        .resources
        .entries()
        .iter()
        .filter(|r| !r.released)
        .collect();
    if !held.is_empty() {
        out.push_str("  resources:\n");
        for resource in held {
            out.push_str(&format!("    - {}\n", resource));
        }
    }
    out
}

/// Mesh files as `# path` headers followed by contents.
pub fn render_mesh_files(files: &MeshFiles) -> String {
    let mut out = String::new();
    for (path, content) in files.entries() {
        out.push_str(&format!("# {}\n{}", path, content));
        if !content.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[derive(Serialize)]
struct StatusEvent<'a> {
    event: &'a str,
    status: &'a DeploymentStatus,
}

#[derive(Serialize)]
struct MeshFilesEvent<'a> {
    event: &'a str,
    instance: &'a str,
    files: &'a MeshFiles,
}

#[derive(Serialize)]
struct CleanupEvent<'a> {
    event: &'a str,
    instance: &'a str,
    report: &'a CleanupReport,
}
