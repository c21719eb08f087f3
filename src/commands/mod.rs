// ABOUTME: Command module aggregator for the meshvm CLI.
// ABOUTME: Re-exports validate, deploy, status, and cleanup command handlers.

mod cleanup;
mod deploy;
mod status;
mod validate;

pub use cleanup::cleanup;
pub use deploy::deploy;
pub use status::status;
pub use validate::validate;
