// ABOUTME: Validate command implementation.
// ABOUTME: Parses requests and prints their boot configuration without contacting anything.

use meshvm::config::Config;
use meshvm::deploy::BootConfig;
use meshvm::error::{Error, Result};
use meshvm::output::{Output, OutputMode};
use meshvm::request::DeploymentRequest;
use std::path::PathBuf;

pub fn validate(config: &Config, paths: &[PathBuf], output: &Output) -> Result<()> {
    for path in paths {
        let request = DeploymentRequest::load(path)?;
        let boot = BootConfig::generate(&request, &config.cloud, &config.mesh)
            .and_then(|boot| boot.render())
            .map_err(|source| Error::InvalidRequest {
                path: path.clone(),
                source,
            })?;

        output.progress(&format!("# {} ({})", request.name, path.display()));
        if output.mode() == OutputMode::Normal {
            print!("{boot}");
        }
        output.success(&format!("{} is valid", request.name));
    }
    Ok(())
}
