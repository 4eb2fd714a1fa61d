use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;

use super::{CompilationResult, truncate_output, wait_capped};

/// Compiles `source` into `executable` with the given compiler and flags.
///
/// A compiler that runs past `limit` is killed and reported as a failed compilation.
/// Warnings on stderr do not fail the build; only the exit status and the
/// presence of the executable count.
pub(super) async fn compile_source(
    compiler: &str,
    flags: &[String],
    source: &Path,
    executable: &Path,
    limit: Duration,
) -> Result<CompilationResult> {
    let mut cmd = Command::new(compiler);
    cmd.args(flags)
        .arg(source)
        .arg("-o")
        .arg(executable)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn compiler {compiler}"))?;

    let run = wait_capped(child, limit)
        .await
        .context("Failed to wait for compiler")?;
    let Some(status) = run.status else {
        log::warn!("Compilation exceeded {} ms", limit.as_millis());
        return Ok(CompilationResult {
            success: false,
            diagnostics: "Compilation timeout".to_string(),
        });
    };

    let mut diagnostics = truncate_output(&run.stderr);
    if !run.stdout.is_empty() {
        diagnostics.push_str(&truncate_output(&run.stdout));
    }

    Ok(CompilationResult {
        success: status.success() && executable.exists(),
        diagnostics,
    })
}
