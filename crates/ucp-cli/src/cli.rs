use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "ucp",
    about = "Universal Control Plane: an ARM-RPC-compatible resource front door",
    version
)]
pub struct Cli {
    /// Base URL of a running UCP server. Unused by `serve`.
    #[arg(long, env = "UCP_URL", global = true, default_value = "http://localhost:8080")]
    pub url: String,

    /// Bearer token for API calls. Falls back to the token written by the
    /// last `serve` run (~/.ucp/token) when unset.
    #[arg(long, env = "UCP_TOKEN", global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load config, wire storage/planes/controllers, and run the worker and
    /// HTTP frontend in-process.
    Serve {
        /// YAML config file. Falls back to built-in defaults plus the
        /// UCP_* environment overlay when absent.
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        #[arg(long, default_value_t = 8080)]
        port: u16,

        /// Rotate the bearer token even if one already exists on disk.
        #[arg(long)]
        rotate_token: bool,
    },

    /// Show registered types/planes and dead-letter count.
    Status,

    /// Fetch a resource by its full `/planes/...` id.
    Get {
        resource_id: String,
    },

    /// Create or update a resource from a JSON body file.
    Put {
        resource_id: String,
        json_file: PathBuf,

        #[arg(long, default_value = "2024-01-01")]
        api_version: String,
    },

    /// Poll an operation's status by id.
    Operation {
        id: Uuid,
    },
}
