//! State command implementation.

use anyhow::Result;
use clap::Args;
use jailbox_container::{ContainerStatus, Factory, State};
use serde_json::json;

use super::require_id;

/// Arguments for the state command.
#[derive(Args)]
pub struct StateArgs {
    /// Container ID
    pub id: String,
}

/// Executes the state command.
pub async fn execute(factory: &Factory, args: StateArgs) -> Result<()> {
    require_id(&args.id)?;
    let container = factory.load(&args.id).await?;

    let status = container.status().await?;
    let state = container.state().await?;
    println!("{}", serde_json::to_string_pretty(&render(status, &state))?);
    Ok(())
}

fn render(status: ContainerStatus, state: &State) -> serde_json::Value {
    json!({
        "id": state.id,
        "status": status,
        "jid": state.jail_id,
        "pid": state.init_process_pid,
        "rootfs": state.config.rootfs,
        "created": state.created,
        "rootless": state.rootless,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jailbox_container::Config;

    #[test]
    fn test_render_state() {
        let state = State {
            id: "c1".to_string(),
            config: Config::new("/var/containers/c1/root"),
            jail_id: Some("7".to_string()),
            init_process_pid: 812,
            init_process_start: "Mon Oct 19 10:02:11 2026".to_string(),
            created: chrono::Utc::now(),
            rootless: false,
            dev_mount_path: None,
        };

        let value = render(ContainerStatus::Running, &state);
        assert_eq!(value["status"], "running");
        assert_eq!(value["jid"], "7");
        assert_eq!(value["pid"], 812);
        assert_eq!(value["rootfs"], "/var/containers/c1/root");
    }
}
