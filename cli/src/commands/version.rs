//! `fnbuild version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("fnbuild version {}", fnbuild_core::VERSION);
    println!("runtime {}", fnbuild_runtime::VERSION);
    Ok(())
}
