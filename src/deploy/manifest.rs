// ABOUTME: Ordered record of resources created during a deployment run.
// ABOUTME: Append-only while deploying, consumed newest-first during cleanup.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::mesh::{RegistrationHandle, RegistrationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Instance,
    TrustBundle,
    WorkloadRegistration,
    ServiceRegistration,
}

impl ResourceKind {
    pub fn is_mesh(&self) -> bool {
        !matches!(self, ResourceKind::Instance)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Instance => "instance",
            ResourceKind::TrustBundle => "trust-bundle",
            ResourceKind::WorkloadRegistration => "workload-registration",
            ResourceKind::ServiceRegistration => "service-registration",
        };
        f.write_str(s)
    }
}

impl From<RegistrationKind> for ResourceKind {
    fn from(kind: RegistrationKind) -> Self {
        match kind {
            RegistrationKind::TrustBundle => ResourceKind::TrustBundle,
            RegistrationKind::Workload => ResourceKind::WorkloadRegistration,
            RegistrationKind::Service => ResourceKind::ServiceRegistration,
        }
    }
}

/// One created resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceKind,
    pub id: String,
    /// Mesh namespace for registration records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Set once cleanup has removed the resource.
    #[serde(default)]
    pub released: bool,
}

impl Resource {
    pub fn instance(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Instance,
            id: name.into(),
            scope: None,
            released: false,
        }
    }

    pub fn registration(handle: &RegistrationHandle) -> Self {
        Self {
            kind: handle.kind.into(),
            id: handle.name.clone(),
            scope: Some(handle.scope.clone()),
            released: false,
        }
    }

    /// Mesh handle for this resource, or None for instances.
    pub fn registration_handle(&self) -> Option<RegistrationHandle> {
        let kind = match self.kind {
            ResourceKind::Instance => return None,
            ResourceKind::TrustBundle => RegistrationKind::TrustBundle,
            ResourceKind::WorkloadRegistration => RegistrationKind::Workload,
            ResourceKind::ServiceRegistration => RegistrationKind::Service,
        };
        Some(RegistrationHandle::new(
            kind,
            self.id.clone(),
            self.scope.clone().unwrap_or_default(),
        ))
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{} {}/{}", self.kind, scope, self.id),
            None => write!(f, "{} {}", self.kind, self.id),
        }
    }
}

/// Creation-ordered list of resources, the input to cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RollbackManifest {
    entries: Vec<Resource>,
}

impl RollbackManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, resource: Resource) {
        self.entries.push(resource);
    }

    /// Entries in creation order.
    pub fn entries(&self) -> &[Resource] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Indices of resources still held, newest first.
    pub fn pending_reverse(&self) -> Vec<usize> {
        (0..self.entries.len())
            .rev()
            .filter(|&i| !self.entries[i].released)
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<&Resource> {
        self.entries.get(index)
    }

    pub fn mark_released(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.released = true;
        }
    }

    pub fn all_released(&self) -> bool {
        self.entries.iter().all(|e| e.released)
    }

    pub fn contains_kind(&self, kind: ResourceKind) -> bool {
        self.entries.iter().any(|e| e.kind == kind)
    }
}
