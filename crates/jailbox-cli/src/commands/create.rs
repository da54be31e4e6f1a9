//! Create command implementation.

use anyhow::{Context, Result};
use clap::Args;
use jailbox_container::{Config, Factory, InitSpec};
use std::path::PathBuf;

use super::{absolute, destroy, require_id};

/// Arguments shared by the create and run commands.
#[derive(Args)]
pub struct CreateArgs {
    /// Container ID
    pub id: String,

    /// Root filesystem of the jail
    #[arg(long)]
    pub rootfs: PathBuf,

    /// Run without root privileges
    #[arg(long)]
    pub rootless: bool,

    /// Init command and its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl CreateArgs {
    /// Checks the arguments and builds the container config and init spec.
    pub fn prepare(&self) -> Result<(Config, InitSpec)> {
        require_id(&self.id)?;

        let rootfs = absolute(&self.rootfs)?;
        if !rootfs.exists() {
            anyhow::bail!("rootfs ({}) does not exist", rootfs.display());
        }

        let config = Config {
            rootless: self.rootless,
            ..Config::new(rootfs)
        };
        Ok((config, InitSpec::new(self.args.iter().cloned())))
    }
}

/// Executes the create command.
pub async fn execute(factory: &Factory, args: CreateArgs) -> Result<()> {
    let (config, init) = args.prepare()?;
    let container = factory.create(&args.id, config)?;

    if let Err(err) = container.start(&init).await {
        destroy(&container).await;
        return Err(err).with_context(|| format!("failed to create container {}", args.id));
    }

    tracing::info!(container_id = %args.id, "container created, waiting for start");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Commands};
    use clap::Parser;

    fn parse(argv: &[&str]) -> CreateArgs {
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Create(args) | Commands::Run(args) => args,
            _ => panic!("expected create or run"),
        }
    }

    #[test]
    fn test_parse_init_args() {
        let args = parse(&[
            "jailbox", "create", "c1", "--rootfs", "/var/containers/c1/root", "--", "/bin/sh",
            "-c", "true",
        ]);
        assert_eq!(args.id, "c1");
        assert_eq!(args.rootfs, PathBuf::from("/var/containers/c1/root"));
        assert_eq!(args.args, ["/bin/sh", "-c", "true"]);
        assert!(!args.rootless);
    }

    #[test]
    fn test_prepare_checks_rootfs() {
        let args = parse(&[
            "jailbox",
            "run",
            "c1",
            "--rootfs",
            "/nonexistent/jailbox/root",
            "--",
            "/bin/sh",
        ]);
        let err = args.prepare().unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_prepare_builds_config() {
        let dir = std::env::temp_dir();
        let args = CreateArgs {
            id: "c1".to_string(),
            rootfs: dir.clone(),
            rootless: true,
            args: vec!["/bin/sh".to_string()],
        };

        let (config, init) = args.prepare().unwrap();
        assert_eq!(config.rootfs, dir);
        assert!(config.rootless);
        assert_eq!(init.args, ["/bin/sh"]);
    }
}
