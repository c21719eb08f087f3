// ABOUTME: Per-instance deploy lock and registry of known deployments.
// ABOUTME: Rejects a second deploy or cleanup of the same name while one is in flight.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::InstanceName;

use super::error::DeployError;
use super::scope::CancelHandle;
use super::status::StatusHandle;

/// Information about who holds a deploy lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    /// Instance being deployed or cleaned up.
    pub instance: String,
}

impl LockInfo {
    /// Create new lock info for the current process.
    pub fn new(instance: &InstanceName) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            instance: instance.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Entry {
    status: Option<StatusHandle>,
    lock: Option<LockInfo>,
    cancel: Option<CancelHandle>,
}

type Entries = Arc<Mutex<HashMap<InstanceName, Entry>>>;

/// All deployments known to one orchestrator.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Entries,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `name`, failing if someone else holds it.
    pub fn acquire(&self, name: &InstanceName) -> Result<DeployLock, DeployError> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(name.clone()).or_default();

        if let Some(held) = &entry.lock {
            return Err(DeployError::lock_held(
                name.as_str(),
                held.holder.clone(),
                held.pid,
                held.started_at,
            ));
        }

        entry.lock = Some(LockInfo::new(name));
        Ok(DeployLock {
            entries: Arc::clone(&self.entries),
            name: name.clone(),
        })
    }

    /// Make a status visible to pollers, replacing any earlier one.
    pub fn publish(&self, name: &InstanceName, status: StatusHandle, cancel: Option<CancelHandle>) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(name.clone()).or_default();
        entry.status = Some(status);
        entry.cancel = cancel;
    }

    pub fn status(&self, name: &InstanceName) -> Option<StatusHandle> {
        self.entries.lock().get(name).and_then(|e| e.status.clone())
    }

    pub fn cancel_handle(&self, name: &InstanceName) -> Option<CancelHandle> {
        self.entries.lock().get(name).and_then(|e| e.cancel.clone())
    }

    pub fn lock_info(&self, name: &InstanceName) -> Option<LockInfo> {
        self.entries.lock().get(name).and_then(|e| e.lock.clone())
    }

    pub fn names(&self) -> Vec<InstanceName> {
        let mut names: Vec<_> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, e)| e.status.is_some())
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }
}

/// A held deploy lock that releases on drop.
pub struct DeployLock {
    entries: Entries,
    name: InstanceName,
}

impl std::fmt::Debug for DeployLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployLock")
            .field("instance", &self.name)
            .finish()
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&self.name) {
            entry.lock = None;
            entry.cancel = None;
            if entry.status.is_none() {
                entries.remove(&self.name);
            }
        }
    }
}
