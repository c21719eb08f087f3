// ABOUTME: Deploy command implementation.
// ABOUTME: Runs every request concurrently, prints and persists each final status.

use futures::future::join_all;
use meshvm::config::Config;
use meshvm::deploy::{DeploymentStatus, Orchestrator, Outcome};
use meshvm::error::{Error, Result};
use meshvm::output::Output;
use meshvm::request::DeploymentRequest;
use meshvm::store::StatusStore;
use std::path::{Path, PathBuf};

/// Deploy every request file.
pub async fn deploy(config: Config, paths: &[PathBuf], mut output: Output) -> Result<()> {
    let store = StatusStore::default_location()?;
    let orchestrator = Orchestrator::from_config(&config);

    output.start_timer();
    output.progress(&format!("Deploying {} instance(s)", paths.len()));

    let runs = paths
        .iter()
        .map(|path| deploy_one(&orchestrator, path, &output));
    let results = join_all(runs).await;

    let mut failed = Vec::new();
    for (path, result) in paths.iter().zip(results) {
        match result {
            Ok(status) => {
                if let Err(e) = store.save(&status) {
                    output.error(&format!("failed to save status of {}: {}", status.name, e));
                }
                output.status(&status);
                if status.outcome != Some(Outcome::Completed) {
                    failed.push(status.name.to_string());
                }
            }
            Err(e) => {
                output.error(&format!("{}: {}", path.display(), e));
                failed.push(path.display().to_string());
            }
        }
    }

    if failed.is_empty() {
        output.success("Deployment complete!");
        Ok(())
    } else {
        Err(Error::DeploymentFailed(failed.join(", ")))
    }
}

async fn deploy_one(
    orchestrator: &Orchestrator,
    path: &Path,
    output: &Output,
) -> Result<DeploymentStatus> {
    let request = DeploymentRequest::load(path)?;
    output.progress(&format!("  → {} ({})", request.name, path.display()));
    Ok(orchestrator.deploy(request).await?)
}
