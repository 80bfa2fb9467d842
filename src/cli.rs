//! Command-line surface: `start`, `status`, `step`, and an ambient `serve`
//! subcommand exposing the HTTP/SSE bridge.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "forge-loom")]
#[command(version, about = "Multi-phase, multi-agent workflow orchestrator")]
pub struct Cli {
    /// Path to a TOML config file. Created with defaults if missing.
    #[arg(long, global = true, default_value = "orchestrator.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new operation from a prompt, opening its root phase.
    Start { prompt: String },
    /// Report the current phase and state of an operation.
    Status { operation_id: String },
    /// Advance an operation to its next phase.
    Step { operation_id: String },
    /// Run the HTTP/SSE bridge, republishing event bus and health traffic.
    Serve,
}
