// ABOUTME: Cleanup command implementation.
// ABOUTME: Tears down the resources recorded in a persisted deployment status.

use meshvm::config::Config;
use meshvm::deploy::Orchestrator;
use meshvm::error::{Error, Result};
use meshvm::output::Output;
use meshvm::store::StatusStore;
use meshvm::types::InstanceName;

pub async fn cleanup(config: Config, name: &str, mut output: Output) -> Result<()> {
    let name = InstanceName::new(name)?;
    let store = StatusStore::default_location()?;
    let status = store.load(&name)?;

    output.start_timer();
    output.progress(&format!("Cleaning up {}", name));

    let orchestrator = Orchestrator::from_config(&config);
    orchestrator.adopt(status)?;
    let report = orchestrator.cleanup(&name).await?;

    store.save(&orchestrator.status(&name)?)?;
    output.cleanup(name.as_str(), &report);

    if report.all_succeeded() {
        output.success(&format!("Cleanup of {} complete", name));
        Ok(())
    } else {
        Err(Error::CleanupIncomplete {
            name: name.to_string(),
            failed: report.failed.len(),
        })
    }
}
