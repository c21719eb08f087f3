// ABOUTME: DNS-compatible instance name validation.
// ABOUTME: Instance names double as hostnames and mesh record names, so they follow RFC 1123.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstanceNameError {
    #[error("instance name cannot be empty")]
    Empty,

    #[error("instance name exceeds maximum length of 63 characters")]
    TooLong,

    #[error("instance name cannot start with a hyphen")]
    StartsWithHyphen,

    #[error("instance name cannot end with a hyphen")]
    EndsWithHyphen,

    #[error("instance name must be lowercase")]
    NotLowercase,

    #[error("invalid character in instance name: '{0}'")]
    InvalidChar(char),
}

/// Caller-chosen name of a compute instance, unique within the target scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceName(String);

impl InstanceName {
    pub fn new(value: &str) -> Result<Self, InstanceNameError> {
        if value.is_empty() {
            return Err(InstanceNameError::Empty);
        }

        if value.len() > 63 {
            return Err(InstanceNameError::TooLong);
        }

        if value.starts_with('-') {
            return Err(InstanceNameError::StartsWithHyphen);
        }

        if value.ends_with('-') {
            return Err(InstanceNameError::EndsWithHyphen);
        }

        for c in value.chars() {
            if c.is_ascii_uppercase() {
                return Err(InstanceNameError::NotLowercase);
            }
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
                return Err(InstanceNameError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the mesh workload record and service account for this instance.
    pub fn workload_record(&self) -> String {
        format!("vm-{}", self.0)
    }

    /// Name of the mesh service record for this instance.
    pub fn service_record(&self) -> String {
        format!("vm-{}-service", self.0)
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for InstanceName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for InstanceName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        InstanceName::new(&s).map_err(serde::de::Error::custom)
    }
}
