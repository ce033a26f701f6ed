//! Build coordination.
//!
//! A build is keyed by the content hash of the function source. Before
//! writing anything the coordinator takes an advisory lock in the form of a
//! `by-pid/<pid>` symlink to the hash directory; any other live process
//! holding a marker on the same hash makes the build fail fast with
//! [`FnError::BuildInProgress`]. Locks left by dead processes are reclaimed,
//! and unreferenced build directories collected, whenever a build ends.

pub mod context;
pub mod dirs;
pub mod process;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use fnbuild_core::{BuilderConfig, FnError, Function, Phase, PhaseContext, Result};
use tokio_util::sync::CancellationToken;

pub use context::BuildContext;
pub use dirs::BuildDirs;
pub use process::{ProcessTable, SystemProcesses};

use crate::oci::containerize::containerize;
use crate::oci::language::LayerBuilders;
use crate::scaffold::Scaffolder;

/// Host builder: compiles a function and writes a multi-platform OCI layout
/// into its `.func/builds` directory.
pub struct Builder {
    config: BuilderConfig,
    layer_builders: LayerBuilders,
    processes: Arc<dyn ProcessTable>,
    scaffolder: Option<Arc<dyn Scaffolder>>,
    verbose: bool,
}

impl Builder {
    pub fn new(config: BuilderConfig) -> Self {
        Self {
            config,
            layer_builders: LayerBuilders::with_defaults(),
            processes: Arc::new(SystemProcesses),
            scaffolder: None,
            verbose: false,
        }
    }

    pub fn with_layer_builders(mut self, layer_builders: LayerBuilders) -> Self {
        self.layer_builders = layer_builders;
        self
    }

    pub fn with_process_table(mut self, processes: Arc<dyn ProcessTable>) -> Self {
        self.processes = processes;
        self
    }

    pub fn with_scaffolder(mut self, scaffolder: Arc<dyn Scaffolder>) -> Self {
        self.scaffolder = Some(scaffolder);
        self
    }

    /// Stream toolchain output instead of capturing it.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Build `function` for every configured platform.
    ///
    /// On success `builds/last` points at the new layout. Bookkeeping is
    /// torn down on every exit path once the lock has been taken, including
    /// when the returned future is dropped.
    pub async fn build(&self, cancel: &CancellationToken, function: &Function) -> Result<()> {
        let layer_builder = self.layer_builders.resolve(&function.runtime)?;

        let mut ctx = BuildContext::new(
            cancel.clone(),
            function.clone(),
            self.config.clone(),
            self.verbose,
        );
        let hash = ctx.hash()?.to_string();
        let dirs = BuildDirs::new(ctx.builds_dir());
        let pid = self.processes.current_pid();

        let build_dir = self.setup(&dirs, pid, &hash)?;
        let _teardown = Teardown {
            dirs: &dirs,
            processes: self.processes.as_ref(),
            pid,
        };
        tracing::info!(
            hash = %hash,
            pid,
            runtime = %function.runtime,
            dir = %build_dir.display(),
            "Starting build"
        );

        let timestamp = match self.config.timestamp {
            Some(t) => t,
            None => dirs.created_stamp(&hash, Utc::now()).during(Phase::Setup)?,
        };
        ctx.pin_timestamp(timestamp);

        if let Some(scaffolder) = &self.scaffolder {
            let out = ctx.scaffolding_dir()?;
            std::fs::create_dir_all(&out).during(Phase::Setup)?;
            scaffolder
                .write(&out, &function.root, &function.runtime, function.invoke_or_default())
                .during(Phase::Setup)?;
            ctx.mark_scaffolded();
            tracing::debug!(dir = %out.display(), "Wrote scaffolding");
        }

        containerize(&ctx, layer_builder.as_ref()).await?;

        dirs.set_last(pid, &hash).during(Phase::LastPointer)?;
        tracing::info!(hash = %hash, "Build complete");
        Ok(())
    }

    /// Take the advisory lock on `hash` for `pid` and create its directory.
    fn setup(&self, dirs: &BuildDirs, pid: u32, hash: &str) -> Result<PathBuf> {
        if let Some(holder) = dirs.holder(hash, self.processes.as_ref()).during(Phase::Setup)? {
            return Err(FnError::BuildInProgress {
                hash: hash.to_string(),
                pid: holder,
            });
        }
        // One marker slot per process: a second concurrent build from the
        // same process would overwrite the first one's lock.
        if let Some(other) = dirs.marker_target(pid) {
            return Err(FnError::BuildInProgress { hash: other, pid });
        }
        dirs.acquire(pid, hash).during(Phase::Setup).map_err(|e| {
            let _ = dirs.release(pid);
            e
        })
    }

    /// Directory of the function's last successful build.
    pub fn last_build_dir(&self, function: &Function) -> Result<PathBuf> {
        BuildDirs::new(function.builds_dir()).last_build_dir()
    }

    /// Directory this process is currently building into, if any.
    pub fn current_build_dir(&self, function: &Function) -> Option<PathBuf> {
        let dirs = BuildDirs::new(function.builds_dir());
        dirs.marker_target(self.processes.current_pid())
            .map(|hash| dirs.hash_dir(&hash))
    }
}

/// Releases this process's lock, reclaims stale locks and collects
/// unreferenced build directories when dropped.
struct Teardown<'a> {
    dirs: &'a BuildDirs,
    processes: &'a dyn ProcessTable,
    pid: u32,
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.dirs.release(self.pid) {
            tracing::warn!(pid = self.pid, error = %e, "Failed to remove build lock");
        }
        match self.dirs.reclaim_stale(self.processes) {
            Ok(reclaimed) if !reclaimed.is_empty() => {
                tracing::debug!(count = reclaimed.len(), "Reclaimed stale build locks")
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to reclaim stale build locks"),
        }
        match self.dirs.collect_garbage(self.processes) {
            Ok(removed) if !removed.is_empty() => {
                tracing::debug!(count = removed.len(), "Collected unreferenced builds")
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to collect unreferenced builds"),
        }
    }
}
