use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

use crate::config::StressConfig;

use super::compile::compile_source;
use super::{CheckOutcome, StressSandbox, truncate_output, wait_capped};

/// Compiles and runs generated programs as plain child processes.
///
/// LocalSandbox only enforces a wall-clock limit. It has no memory, file system
/// or network restrictions, so it must run under an unprivileged account.
pub struct LocalSandbox {
    compiler: String,
    flags: Vec<String>,
    compile_timeout: Duration,
    run_timeout: Duration,
    /// Parent of the per-check scratch directories
    scratch_root: PathBuf,
}

impl LocalSandbox {
    pub fn build(config: &StressConfig) -> Result<Self> {
        let scratch_root = config
            .scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("stresser"));
        fs::create_dir_all(&scratch_root).with_context(|| {
            format!("Unable to create scratch dir {}", scratch_root.display())
        })?;

        log::info!(
            "LocalSandbox ready: {} {:?}, scratch at {}",
            config.compiler,
            config.compile_flags,
            scratch_root.display()
        );
        log::warn!("LocalSandbox provides NO security isolation - use only in trusted environments");

        Ok(Self {
            compiler: config.compiler.clone(),
            flags: config.compile_flags.clone(),
            compile_timeout: config.compile_timeout.into(),
            run_timeout: config.run_timeout.into(),
            scratch_root,
        })
    }

    /// Runs `executable` with empty stdin, killing it once the run timer fires.
    async fn run_executable(&self, executable: &Path, work_dir: &Path) -> Result<CheckOutcome> {
        let mut cmd = Command::new(executable);
        cmd.current_dir(work_dir);
        self.execute(cmd).await
    }

    async fn execute(&self, mut cmd: Command) -> Result<CheckOutcome> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().context("Failed to spawn generated program")?;

        // Close stdin right away so programs that read input see EOF
        if let Some(mut stdin) = child.stdin.take() {
            stdin.shutdown().await.ok();
        }

        let start_time = Instant::now();
        let run = wait_capped(child, self.run_timeout)
            .await
            .context("Failed to wait for generated program")?;
        let stdout = truncate_output(&run.stdout);
        let stderr = truncate_output(&run.stderr);

        match run.status {
            Some(status) => {
                log::debug!(
                    "Generated program exited with {:?} after {} ms",
                    status.code(),
                    start_time.elapsed().as_millis()
                );
                Ok(CheckOutcome::Finished {
                    stdout,
                    stderr,
                    exit_code: status.code(),
                })
            }
            None => {
                log::info!(
                    "Generated program killed after {} ms",
                    self.run_timeout.as_millis()
                );
                Ok(CheckOutcome::TimedOut { stdout, stderr })
            }
        }
    }
}

#[async_trait]
impl StressSandbox for LocalSandbox {
    async fn check(&self, source: &str) -> Result<CheckOutcome> {
        // Removed on drop, whatever the outcome
        let scratch = tempfile::Builder::new()
            .prefix("stress-")
            .tempdir_in(&self.scratch_root)?;

        let job_id = Uuid::new_v4();
        let source_path = scratch.path().join(format!("{job_id}.cpp"));
        let executable_path = scratch.path().join(format!("{job_id}.out"));
        tokio::fs::write(&source_path, format!("{source}\n")).await?;

        let compilation = compile_source(
            &self.compiler,
            &self.flags,
            &source_path,
            &executable_path,
            self.compile_timeout,
        )
        .await?;

        if !compilation.success {
            log::info!("Generated program {job_id} failed to compile");
            return Ok(CheckOutcome::CompileError(compilation.diagnostics));
        }

        self.run_executable(&executable_path, scratch.path()).await
    }
}
