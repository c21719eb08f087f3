// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to keep provider identifiers apart from plain strings.

mod id;
mod instance_name;

pub use id::{Id, InstanceId};
pub use instance_name::{InstanceName, InstanceNameError};
