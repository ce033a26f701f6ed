//! Scaffolding hook.
//!
//! A scaffolder wraps the user's function source into a runnable program
//! (a `main` package for Go). Generating that source is the job of the
//! surrounding tooling; the builder only decides where it goes and compiles
//! from there.

use std::path::Path;

use fnbuild_core::Result;

pub trait Scaffolder: Send + Sync {
    /// Write scaffolding for the function at `src` into `out`.
    ///
    /// `invoke` is the invocation style, e.g. `http` or `cloudevent`.
    fn write(&self, out: &Path, src: &Path, runtime: &str, invoke: &str) -> Result<()>;
}
