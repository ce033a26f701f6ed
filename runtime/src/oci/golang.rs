//! Go cross-compilation layer builder.
//!
//! Compiles the function into a static binary for the requested platform
//! with the host's Go toolchain and packages it as the exec layer.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use fnbuild_core::{FnError, Function, Platform, Result};
use tokio::process::Command;

use super::blob::BlobStore;
use super::language::LayerBuilder;
use super::layer::{create_exec_layer, Layer};
use crate::build::BuildContext;

/// Host variables passed through to the toolchain when set.
const PASSTHROUGH_ENVS: &[&str] = &["PATH", "GOPATH", "GOCACHE", "GOMODCACHE", "GOPROXY", "GOFLAGS"];

/// Builds exec layers by invoking `go build`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoLayerBuilder;

#[async_trait]
impl LayerBuilder for GoLayerBuilder {
    async fn build(
        &self,
        ctx: &BuildContext,
        platform: &Platform,
        store: &BlobStore,
    ) -> Result<Layer> {
        ctx.check_cancelled()?;

        let output = output_path(&ctx.result_dir()?, platform);
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        go_build(ctx, platform, &output).await?;

        let staged = ctx
            .build_dir()?
            .join(format!("execlayer.{}.tar.gz", platform.file_suffix()));
        let layer = create_exec_layer(&output, ctx.timestamp(), &staged, store)?;
        tracing::info!(
            platform = %platform,
            digest = %layer.descriptor.digest,
            size = layer.descriptor.size,
            "Created exec layer"
        );
        Ok(layer)
    }
}

/// `<result_dir>/f.<os>.<arch>[.<variant>]`
pub fn output_path(result_dir: &Path, platform: &Platform) -> PathBuf {
    result_dir.join(format!("f.{}", platform.file_suffix()))
}

/// Program and arguments that compile the function to `output`.
///
/// A function's own build command replaces `<go> build -o <output>`; it must
/// still leave the binary at `output`.
pub fn go_build_command(
    go: &str,
    build_command: &str,
    output: &Path,
) -> Result<(String, Vec<String>)> {
    if build_command.contains("toolexec") {
        return Err(FnError::FunctionError(
            "function build command may not include 'toolexec'".to_string(),
        ));
    }
    let mut parts = build_command.split_whitespace().map(str::to_string);
    if let Some(program) = parts.next() {
        return Ok((program, parts.collect()));
    }
    Ok((
        go.to_string(),
        vec![
            "build".to_string(),
            "-o".to_string(),
            output.to_string_lossy().to_string(),
        ],
    ))
}

/// Toolchain environment for one target platform.
///
/// The host environment is not inherited; only `HOME` and the Go cache and
/// path variables pass through, followed by the target selection and the
/// function's declared build envs.
pub fn go_build_envs(function: &Function, platform: &Platform) -> Vec<(String, String)> {
    let mut envs = vec![(
        "HOME".to_string(),
        std::env::var("HOME").unwrap_or_default(),
    )];
    for name in PASSTHROUGH_ENVS {
        if let Ok(value) = std::env::var(name) {
            envs.push((name.to_string(), value));
        }
    }
    envs.push(("CGO_ENABLED".to_string(), "0".to_string()));
    envs.push(("GOOS".to_string(), platform.os.clone()));
    envs.push(("GOARCH".to_string(), platform.architecture.clone()));

    if let Some(variant) = platform.variant.as_deref().filter(|v| !v.is_empty()) {
        match platform.architecture.as_str() {
            "arm" => envs.push((
                "GOARM".to_string(),
                variant.trim_start_matches('v').to_string(),
            )),
            "amd64" => envs.push(("GOAMD64".to_string(), variant.to_string())),
            _ => {}
        }
    }

    for env in &function.build.build_envs {
        if let Some(pair) = env.key_value_pair() {
            if let Some((key, value)) = pair.split_once('=') {
                envs.push((key.to_string(), value.to_string()));
            }
        }
    }
    envs
}

async fn go_build(ctx: &BuildContext, platform: &Platform, output: &Path) -> Result<()> {
    let (program, args) = go_build_command(
        &ctx.config().go_binary,
        &ctx.function().build.build_command,
        output,
    )?;
    let dir = ctx.source_dir()?;

    tracing::info!(platform = %platform, output = %output.display(), "Compiling function");
    tracing::debug!(program = %program, args = ?args, dir = %dir.display(), "Build command");

    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .current_dir(&dir)
        .env_clear()
        .envs(go_build_envs(ctx.function(), platform))
        .stdin(Stdio::null())
        .kill_on_drop(true);

    if ctx.verbose() {
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    } else {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    }

    let child = cmd.spawn().map_err(|e| FnError::CompileFailed {
        platform: platform.to_string(),
        message: format!("Failed to start {}: {}", program, e),
    })?;

    let result = tokio::select! {
        result = child.wait_with_output() => result,
        _ = ctx.cancel_token().cancelled() => {
            tracing::warn!(platform = %platform, "Compilation cancelled");
            return Err(FnError::Cancelled);
        }
    };

    let result = result.map_err(|e| FnError::CompileFailed {
        platform: platform.to_string(),
        message: format!("Failed to wait for {}: {}", program, e),
    })?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(FnError::CompileFailed {
            platform: platform.to_string(),
            message: format!(
                "{} exited with {}: {}",
                program,
                result.status.code().unwrap_or(-1),
                stderr.trim()
            ),
        });
    }
    if !output.is_file() {
        return Err(FnError::CompileFailed {
            platform: platform.to_string(),
            message: format!("{} did not produce {}", program, output.display()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnbuild_core::{BuilderConfig, Env};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn lookup<'a>(envs: &'a [(String, String)], key: &str) -> Option<&'a str> {
        envs.iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_output_path() {
        let dir = Path::new("/b/result");
        assert_eq!(
            output_path(dir, &Platform::new("linux", "amd64")),
            PathBuf::from("/b/result/f.linux.amd64")
        );
        assert_eq!(
            output_path(dir, &Platform::new("linux", "arm").with_variant("v7")),
            PathBuf::from("/b/result/f.linux.arm.v7")
        );
    }

    #[test]
    fn test_default_build_command() {
        let (program, args) = go_build_command("go", "", Path::new("/out/f")).unwrap();
        assert_eq!(program, "go");
        assert_eq!(args, vec!["build", "-o", "/out/f"]);
    }

    #[test]
    fn test_function_build_command_overrides_toolchain() {
        let (program, args) = go_build_command(
            "/usr/local/go/bin/go",
            "go build  -trimpath -o /b/result/f.linux.amd64",
            Path::new("/b/result/f.linux.amd64"),
        )
        .unwrap();
        assert_eq!(program, "go");
        assert_eq!(args, vec!["build", "-trimpath", "-o", "/b/result/f.linux.amd64"]);
    }

    #[test]
    fn test_build_command_rejects_toolexec() {
        let err = go_build_command("go", "go build -toolexec=/tmp/x", Path::new("/out/f"))
            .unwrap_err();
        assert!(matches!(err, FnError::FunctionError(_)));
        assert!(err
            .to_string()
            .contains("function build command may not include 'toolexec'"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_command_output_becomes_exec_layer() {
        let tmp = TempDir::new().unwrap();
        let prebuilt = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("handle.go"), "package function\n").unwrap();
        let binary = prebuilt.path().join("f");
        std::fs::write(&binary, "prebuilt binary").unwrap();

        let platform = Platform::new("linux", "amd64");
        let context = |function: Function| {
            BuildContext::new(
                CancellationToken::new(),
                function,
                BuilderConfig::default().with_platforms(vec![platform.clone()]),
                false,
            )
        };
        let output = output_path(
            &context(Function::new(tmp.path(), "go")).result_dir().unwrap(),
            &platform,
        );

        let mut function = Function::new(tmp.path(), "go");
        function.build.build_command = format!("cp {} {}", binary.display(), output.display());
        let ctx = context(function);
        let store = BlobStore::open(&ctx.oci_dir().unwrap()).unwrap();

        let layer = GoLayerBuilder.build(&ctx, &platform, &store).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"prebuilt binary");
        assert!(store.contains(&layer.descriptor.digest));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_command_without_output_fails() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("handle.go"), "package function\n").unwrap();
        let mut function = Function::new(tmp.path(), "go");
        function.build.build_command = "true".to_string();
        let ctx = BuildContext::new(
            CancellationToken::new(),
            function,
            BuilderConfig::default(),
            false,
        );
        let store = BlobStore::open(&ctx.oci_dir().unwrap()).unwrap();

        let err = GoLayerBuilder
            .build(&ctx, &Platform::new("linux", "amd64"), &store)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FnError::CompileFailed { .. }));
    }

    #[test]
    fn test_envs_select_target() {
        let f = Function::new("/tmp/f", "go");
        let envs = go_build_envs(&f, &Platform::new("darwin", "arm64"));
        assert_eq!(lookup(&envs, "CGO_ENABLED"), Some("0"));
        assert_eq!(lookup(&envs, "GOOS"), Some("darwin"));
        assert_eq!(lookup(&envs, "GOARCH"), Some("arm64"));
        assert_eq!(lookup(&envs, "GOARM"), None);
        assert_eq!(lookup(&envs, "GOAMD64"), None);
        assert!(lookup(&envs, "HOME").is_some());
    }

    #[test]
    fn test_arm_variant_sets_goarm() {
        let f = Function::new("/tmp/f", "go");
        let envs = go_build_envs(&f, &Platform::new("linux", "arm").with_variant("v6"));
        assert_eq!(lookup(&envs, "GOARM"), Some("6"));
        assert_eq!(lookup(&envs, "GOAMD64"), None);
    }

    #[test]
    fn test_amd64_variant_sets_goamd64() {
        let f = Function::new("/tmp/f", "go");
        let envs = go_build_envs(&f, &Platform::new("linux", "amd64").with_variant("v3"));
        assert_eq!(lookup(&envs, "GOAMD64"), Some("v3"));
        assert_eq!(lookup(&envs, "GOARM"), None);
    }

    #[test]
    fn test_build_envs_appended_last() {
        let mut f = Function::new("/tmp/f", "go");
        f.build.build_envs.push(Env::new("GOFLAGS", "-mod=vendor"));
        f.build.build_envs.push(Env {
            name: None,
            value: Some("ignored".to_string()),
        });
        let envs = go_build_envs(&f, &Platform::new("linux", "amd64"));

        assert_eq!(
            envs.last(),
            Some(&("GOFLAGS".to_string(), "-mod=vendor".to_string()))
        );
        assert!(!envs.iter().any(|(_, v)| v == "ignored"));
    }

    #[test]
    fn test_env_values_may_contain_equals() {
        let mut f = Function::new("/tmp/f", "go");
        f.build.build_envs.push(Env::new("LDFLAGS", "-X main.v=1"));
        let envs = go_build_envs(&f, &Platform::new("linux", "amd64"));
        assert_eq!(lookup(&envs, "LDFLAGS"), Some("-X main.v=1"));
    }
}
