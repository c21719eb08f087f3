// ABOUTME: Status command implementation.
// ABOUTME: Prints persisted deployment statuses from the state directory.

use meshvm::error::{Error, Result};
use meshvm::output::Output;
use meshvm::store::StatusStore;
use meshvm::types::InstanceName;

pub fn status(name: Option<&str>, mesh_files: bool, output: &Output) -> Result<()> {
    let store = StatusStore::default_location()?;

    match name {
        Some(name) => {
            let name = InstanceName::new(name)?;
            let status = store.load(&name)?;
            if mesh_files {
                let files = status
                    .mesh_files
                    .as_ref()
                    .ok_or_else(|| Error::NoMeshFiles(name.to_string()))?;
                output.mesh_files(name.as_str(), files);
            } else {
                output.status(&status);
            }
        }
        None => {
            let statuses = store.list()?;
            if statuses.is_empty() {
                output.progress("No deployments recorded");
            }
            for status in &statuses {
                output.status(status);
            }
        }
    }
    Ok(())
}
