//! CLI command definitions and dispatch.

mod build;
mod push;
mod version;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fnbuild_core::BuilderConfig;
use tokio_util::sync::CancellationToken;

/// fnbuild - daemonless multi-platform image builder for functions.
#[derive(Parser)]
#[command(name = "fnbuild", version, about)]
pub struct Cli {
    /// Enable debug logging and stream compiler output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Builder configuration file (default: ~/.config/fnbuild/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build a function into an OCI image layout
    Build(build::BuildArgs),
    /// Push the last build of a function to its registry
    Push(push::PushArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Load the builder configuration, falling back to defaults when the file
/// is absent.
pub(crate) fn load_config(
    path: Option<&PathBuf>,
) -> Result<BuilderConfig, Box<dyn std::error::Error>> {
    let path = path.cloned().unwrap_or_else(fnbuild_core::config_path);
    Ok(BuilderConfig::load_or_default(&path)?)
}

/// Token cancelled on Ctrl-C.
pub(crate) fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            child.cancel();
        }
    });
    token
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let verbose = cli.verbose;
    let config = cli.config;
    match cli.command {
        Command::Build(args) => build::execute(args, config.as_ref(), verbose).await,
        Command::Push(args) => push::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build_platforms() {
        let cli = Cli::parse_from([
            "fnbuild",
            "build",
            "./hello",
            "--platform",
            "linux/amd64",
            "--platform",
            "linux/arm/v7",
            "-v",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Command::Build(args) => {
                assert_eq!(args.path, "./hello");
                assert_eq!(args.platforms.len(), 2);
                assert_eq!(args.platforms[1].variant.as_deref(), Some("v7"));
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_parse_push_defaults() {
        let cli = Cli::parse_from(["fnbuild", "push"]);
        match cli.command {
            Command::Push(args) => {
                assert_eq!(args.path, ".");
                assert!(!args.insecure);
            }
            _ => panic!("expected push"),
        }
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("absent.yaml");
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.platforms.len(), 6);
    }
}
