// ABOUTME: On-disk retention of deployment statuses for later inspection and cleanup.
// ABOUTME: One JSON file per instance under ~/.local/state/meshvm (XDG compliant).

use std::path::{Path, PathBuf};

use crate::deploy::DeploymentStatus;
use crate::error::{Error, Result};
use crate::types::InstanceName;

/// Base directory for meshvm state files, relative to $HOME.
const STATE_DIR: &str = ".local/state/meshvm";

#[derive(Debug, Clone)]
pub struct StatusStore {
    dir: PathBuf,
}

impl StatusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$XDG_STATE_HOME/meshvm`, falling back to `$HOME/.local/state/meshvm`.
    pub fn default_location() -> Result<Self> {
        if let Some(state_home) = std::env::var_os("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
            return Ok(Self::new(PathBuf::from(state_home).join("meshvm")));
        }
        let home = std::env::var_os("HOME")
            .filter(|v| !v.is_empty())
            .ok_or(Error::NoStateDir)?;
        Ok(Self::new(PathBuf::from(home).join(STATE_DIR)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &InstanceName) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Write a status, replacing any earlier one for the same instance.
    pub fn save(&self, status: &DeploymentStatus) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&status.name);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(status)?)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!("Saved status for {} to {}", status.name, path.display());
        Ok(path)
    }

    pub fn load(&self, name: &InstanceName) -> Result<DeploymentStatus> {
        let path = self.path_for(name);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::StatusNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&content)?)
    }

    /// Every readable status, ordered by instance name. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<DeploymentStatus>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut statuses = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read(&path)
                .map_err(Error::from)
                .and_then(|c| serde_json::from_slice::<DeploymentStatus>(&c).map_err(Error::from))
            {
                Ok(status) => statuses.push(status),
                Err(e) => tracing::warn!("Skipping unreadable status {}: {}", path.display(), e),
            }
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(statuses)
    }
}
