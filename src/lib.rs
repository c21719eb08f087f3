// ABOUTME: Library root for meshvm - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod cloud;
pub mod config;
pub mod deploy;
pub mod error;
pub mod mesh;
pub mod output;
pub mod process;
pub mod request;
pub mod ssh;
pub mod store;
pub mod tasks;
pub mod types;
