//! Command-line interface definitions for the `baton` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `baton` binary.
#[derive(Debug, Parser)]
#[command(
    name = "baton",
    about = "Keep an agent alive across leased sandboxes by chaining snapshots",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Bootstrap the agent on a blank sandbox and record its first image.
    #[command(
        name = "deploy",
        about = "Bootstrap the agent on a blank sandbox and record its first image"
    )]
    Deploy,
    /// Run one full lease cycle and print the result as JSON.
    #[command(name = "cycle", about = "Run one full lease cycle and print the result as JSON")]
    Cycle(CycleCommand),
    /// Run lease cycles back to back until interrupted.
    #[command(name = "keepalive", about = "Run lease cycles back to back until interrupted")]
    Keepalive(KeepaliveCommand),
    /// Serve the authenticated one-shot trigger endpoint.
    #[command(name = "listen", about = "Serve the authenticated one-shot trigger endpoint")]
    Listen(ListenCommand),
    /// Print the current handoff record.
    #[command(name = "status", about = "Print the current handoff record")]
    Status,
}

/// Arguments for the `baton cycle` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CycleCommand {
    /// Resume from this image instead of the one in the handoff record.
    #[arg(long, value_name = "SNAPSHOT_ID")]
    pub(crate) snapshot_id: Option<String>,
    /// Capture as soon as readiness has been probed instead of holding
    /// until the lease nears expiry.
    #[arg(long)]
    pub(crate) no_hold: bool,
}

/// Arguments for the `baton keepalive` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct KeepaliveCommand {
    /// Stop after this many cycles.
    #[arg(long, value_name = "COUNT")]
    pub(crate) max_cycles: Option<u32>,
}

/// Arguments for the `baton listen` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ListenCommand {
    /// Socket address to bind, overriding `BATON_LISTEN`.
    #[arg(long, value_name = "ADDR")]
    pub(crate) listen: Option<String>,
}
