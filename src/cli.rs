// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "meshvm")]
#[command(about = "Provision VMs, join them to a service mesh, and roll back on failure")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output JSON lines for scripting
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub json: bool,

    /// Only print final results
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to meshvm.yml discovery in the working directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new meshvm.yml configuration file
    Init {
        /// Resource group new instances are placed in
        #[arg(long)]
        resource_group: Option<String>,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Validate deployment requests and print their boot configuration
    Validate {
        /// Deployment request files
        #[arg(required = true)]
        requests: Vec<PathBuf>,
    },

    /// Deploy one or more instances concurrently
    Deploy {
        /// Deployment request files
        #[arg(required = true)]
        requests: Vec<PathBuf>,
    },

    /// Show stored deployment status
    Status {
        /// Instance name (all deployments when omitted)
        name: Option<String>,

        /// Print the instance's generated mesh files instead
        #[arg(long, requires = "name")]
        mesh_files: bool,
    },

    /// Release every resource a deployment still holds
    Cleanup {
        /// Instance name
        name: String,
    },
}
