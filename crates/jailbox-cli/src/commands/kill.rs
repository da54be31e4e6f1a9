//! Kill command implementation.

use anyhow::{Context, Result};
use clap::Args;
use jailbox_container::{Factory, Signal};
use std::str::FromStr;

use super::require_id;

/// Arguments for the kill command.
#[derive(Args)]
pub struct KillArgs {
    /// Container ID
    pub id: String,

    /// Signal name or number
    #[arg(default_value = "SIGTERM")]
    pub signal: String,

    /// Send the signal to every process in the jail
    #[arg(short, long)]
    pub all: bool,
}

/// Executes the kill command.
pub async fn execute(factory: &Factory, args: KillArgs) -> Result<()> {
    require_id(&args.id)?;
    let signal = parse_signal(&args.signal)?;
    let container = factory.load(&args.id).await?;

    container
        .signal(signal, args.all)
        .await
        .with_context(|| format!("failed to signal container {}", args.id))
}

/// Parses `TERM`, `SIGTERM` or `15`.
pub fn parse_signal(raw: &str) -> Result<Signal> {
    if let Ok(number) = raw.parse::<i32>() {
        return Signal::try_from(number).with_context(|| format!("invalid signal {raw}"));
    }

    let upper = raw.to_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name).with_context(|| format!("invalid signal {raw}"))
}
