//! `fnbuild build` command - Build a function into an OCI image layout.

use std::path::PathBuf;

use clap::Args;
use fnbuild_core::{Function, Platform};
use fnbuild_runtime::Builder;

#[derive(Args)]
pub struct BuildArgs {
    /// Function root directory (contains func.yaml)
    #[arg(default_value = ".")]
    pub path: String,

    /// Target platform (os/arch[/variant]), can be repeated
    #[arg(long = "platform")]
    pub platforms: Vec<Platform>,
}

pub async fn execute(
    args: BuildArgs,
    config: Option<&PathBuf>,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let root = PathBuf::from(&args.path)
        .canonicalize()
        .map_err(|e| format!("Invalid function path '{}': {}", args.path, e))?;
    let function = Function::load(&root)?;

    let mut config = super::load_config(config)?;
    if !args.platforms.is_empty() {
        config = config.with_platforms(args.platforms);
    }
    let platforms: Vec<String> = config.platforms.iter().map(|p| p.to_string()).collect();

    println!("Building {} for {}", root.display(), platforms.join(", "));

    let builder = Builder::new(config).verbose(verbose);
    let cancel = super::interrupt_token();
    builder.build(&cancel, &function).await?;

    let dir = builder.last_build_dir(&function)?;
    println!("Built {}", dir.join("oci").display());
    Ok(())
}
