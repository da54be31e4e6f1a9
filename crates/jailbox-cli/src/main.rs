//! jailbox - FreeBSD jail container runtime.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod root;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on debug flag
    let filter = if cli.debug {
        "jailbox=debug,jailbox_container=debug"
    } else {
        "jailbox=info,jailbox_container=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let factory = commands::load_factory(&cli)?;

    match cli.command {
        Commands::Create(args) => commands::create::execute(&factory, args).await,
        Commands::Start(args) => commands::start::execute(&factory, args).await,
        Commands::Run(args) => commands::run::execute(&factory, args).await,
        Commands::State(args) => commands::state::execute(&factory, args).await,
        Commands::Kill(args) => commands::kill::execute(&factory, args).await,
        Commands::Delete(args) => commands::delete::execute(&factory, args).await,
    }
}
