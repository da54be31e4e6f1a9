//! CLI command implementations.
//!
//! Each command maps onto one library operation:
//!
//! - create: create the container and launch its jail (init waits)
//! - start: release init by completing the exec fifo handshake
//! - run: create and start in one step
//! - state, kill, delete: load by id and query, signal or destroy

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jailbox_container::{Container, Factory, RuntimeConfig};
use std::path::{Path, PathBuf};

use crate::root;

pub mod create;
pub mod delete;
pub mod kill;
pub mod run;
pub mod start;
pub mod state;

/// jailbox - FreeBSD jail container runtime
#[derive(Parser)]
#[command(name = "jailbox")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Directory for container state
    ///
    /// Defaults to $XDG_RUNTIME_DIR/jailbox for unprivileged users, otherwise
    /// the configured root (/var/run/jailbox).
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create a container and launch its jail
    Create(create::CreateArgs),

    /// Start the init process of a created container
    Start(start::StartArgs),

    /// Create and start a container
    Run(create::CreateArgs),

    /// Print the state of a container
    State(state::StateArgs),

    /// Send a signal to a container
    Kill(kill::KillArgs),

    /// Destroy a container
    Delete(delete::DeleteArgs),
}

/// Builds the factory from configuration and command-line overrides.
pub fn load_factory(cli: &Cli) -> Result<Factory> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load_from(path),
        None => RuntimeConfig::load(),
    }
    .context("failed to load configuration")?;

    let xdg_runtime_dir = std::env::var_os("XDG_RUNTIME_DIR");
    let euid = nix::unistd::geteuid().as_raw();
    let root = root::resolve(
        cli.root.as_deref(),
        &config.root,
        xdg_runtime_dir.as_deref(),
        euid,
    );
    config.root = absolute(&root)?;

    Factory::from_runtime_config(&config)
        .with_context(|| format!("failed to open state root {}", config.root.display()))
}

/// Destroys a container, logging instead of failing.
pub async fn destroy(container: &Container) {
    if let Err(err) = container.destroy().await {
        tracing::error!(container_id = %container.id(), error = %err, "failed to destroy container");
    }
}

/// Rejects empty container ids before touching the factory.
pub fn require_id(id: &str) -> Result<()> {
    if id.is_empty() {
        anyhow::bail!("container id cannot be empty");
    }
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("invalid path {}", path.display()))
}
