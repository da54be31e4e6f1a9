//! Run command implementation.

use anyhow::{Context, Result};
use jailbox_container::Factory;

use super::create::CreateArgs;
use super::destroy;

/// Executes the run command.
pub async fn execute(factory: &Factory, args: CreateArgs) -> Result<()> {
    let (config, init) = args.prepare()?;
    let container = factory.create(&args.id, config)?;

    if let Err(err) = container.run(&init).await {
        destroy(&container).await;
        return Err(err).with_context(|| format!("failed to run container {}", args.id));
    }

    tracing::info!(container_id = %args.id, "container running");
    Ok(())
}
