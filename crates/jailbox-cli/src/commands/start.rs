//! Start command implementation.

use anyhow::{Context, Result};
use clap::Args;
use jailbox_container::Factory;

use super::require_id;

/// Arguments for the start command.
#[derive(Args)]
pub struct StartArgs {
    /// Container ID
    pub id: String,
}

/// Executes the start command.
pub async fn execute(factory: &Factory, args: StartArgs) -> Result<()> {
    require_id(&args.id)?;
    let container = factory.load(&args.id).await?;

    container
        .exec()
        .await
        .with_context(|| format!("failed to start container {}", args.id))?;

    tracing::info!(container_id = %args.id, "container started");
    Ok(())
}
