//! Delete command implementation.

use anyhow::Result;
use clap::Args;
use jailbox_container::{ContainerError, ContainerStatus, Factory, Signal};

use super::{destroy, require_id};

/// Arguments for the delete command.
#[derive(Args)]
pub struct DeleteArgs {
    /// Container ID
    pub id: String,

    /// Kill and delete a running container; ignore unknown ids
    #[arg(short, long)]
    pub force: bool,
}

/// Executes the delete command.
pub async fn execute(factory: &Factory, args: DeleteArgs) -> Result<()> {
    require_id(&args.id)?;

    let container = match factory.load(&args.id).await {
        Ok(container) => container,
        Err(ContainerError::NotFound(_)) if args.force => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    match container.status().await? {
        ContainerStatus::Stopped | ContainerStatus::Created => {}
        status if args.force => {
            tracing::debug!(container_id = %args.id, %status, "killing container before delete");
            if let Err(err) = container.signal(Signal::SIGKILL, true).await {
                tracing::warn!(container_id = %args.id, error = %err, "failed to kill container");
            }
        }
        status => {
            anyhow::bail!("cannot delete container {} that is not stopped: {status}", args.id);
        }
    }

    destroy(&container).await;
    Ok(())
}
