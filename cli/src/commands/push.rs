//! `fnbuild push` command - Push the last build of a function.

use std::path::PathBuf;

use clap::Args;
use fnbuild_core::Function;
use fnbuild_runtime::{PushProgress, Pusher, RegistryAuth};
use tokio::sync::mpsc;

#[derive(Args)]
pub struct PushArgs {
    /// Function root directory (contains func.yaml)
    #[arg(default_value = ".")]
    pub path: String,

    /// Use plain HTTP to reach the registry
    #[arg(long)]
    pub insecure: bool,

    /// Only print the pushed digest
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: PushArgs) -> Result<(), Box<dyn std::error::Error>> {
    let root = PathBuf::from(&args.path)
        .canonicalize()
        .map_err(|e| format!("Invalid function path '{}': {}", args.path, e))?;
    let function = Function::load(&root)?;

    // Credentials from REGISTRY_USERNAME / REGISTRY_PASSWORD, else anonymous
    let auth = RegistryAuth::from_env();
    let mut pusher = if args.insecure {
        Pusher::insecure(auth)
    } else {
        Pusher::with_auth(auth)
    };

    let printer = if args.quiet {
        None
    } else {
        println!("Pushing {}...", function.image);
        let (tx, rx) = mpsc::channel(16);
        pusher = pusher.with_progress(tx);
        Some(tokio::spawn(print_progress(rx)))
    };

    let cancel = super::interrupt_token();
    let result = pusher.push(&cancel, &function).await;
    drop(pusher);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    let digest = result?;

    if args.quiet {
        println!("{}", digest);
    } else {
        println!("Pushed: {} ({})", function.image, digest);
    }
    Ok(())
}

async fn print_progress(mut rx: mpsc::Receiver<PushProgress>) {
    while let Some(p) = rx.recv().await {
        let percent = if p.total == 0 {
            100
        } else {
            p.complete * 100 / p.total
        };
        println!("  {:>3}% ({}/{} bytes)", percent, p.complete, p.total);
    }
}
