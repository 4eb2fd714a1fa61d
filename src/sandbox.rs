mod compile;
mod local_runner;
mod runner;

use std::process::ExitStatus;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::time::timeout;

pub use local_runner::LocalSandbox;
pub use runner::StressSandbox;

/// Captured output beyond this many bytes is cut off
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Result of compiling generated source
#[derive(Debug)]
pub struct CompilationResult {
    pub success: bool,
    pub diagnostics: String,
}

/// What happened to one generated stress-tester
#[derive(Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    CompileError(String),
    /// Killed by the run timer, with whatever it printed before that
    TimedOut { stdout: String, stderr: String },
    Finished {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },
}

impl CheckOutcome {
    /// The failing input reported by the program: stderr if it wrote any, stdout otherwise.
    ///
    /// A program that printed its failing case and then hung still reports it.
    pub fn counterexample(&self) -> Option<&str> {
        let (Self::Finished { stdout, stderr, .. } | Self::TimedOut { stdout, stderr }) = self
        else {
            return None;
        };
        [stderr.trim(), stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
    }
}

/// Output of a child process collected under a deadline
struct CapturedRun {
    /// `None` when the deadline fired and the child was killed
    status: Option<ExitStatus>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Waits for `child` while reading its piped stdout and stderr, keeping at most
/// `MAX_OUTPUT_BYTES + 1` bytes of each. On timeout the child is killed and the
/// output read so far is returned.
async fn wait_capped(mut child: Child, limit: Duration) -> Result<CapturedRun> {
    let mut stdout_pipe = child.stdout.take().context("stdout is not piped")?;
    let mut stderr_pipe = child.stderr.take().context("stderr is not piped")?;
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let finished = timeout(limit, async {
        tokio::try_join!(
            child.wait(),
            read_capped(&mut stdout_pipe, &mut stdout),
            read_capped(&mut stderr_pipe, &mut stderr),
        )
    })
    .await;

    let status = match finished {
        Ok(result) => {
            let (status, (), ()) = result?;
            Some(status)
        }
        Err(_) => {
            child.kill().await.ok();
            None
        }
    };

    Ok(CapturedRun {
        status,
        stdout,
        stderr,
    })
}

/// Reads `reader` to the end. Bytes past the cap are drained and dropped so the
/// writer never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        let room = (MAX_OUTPUT_BYTES + 1).saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
}

/// Lossy UTF-8 conversion capped at `MAX_OUTPUT_BYTES`.
fn truncate_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_OUTPUT_BYTES)]).into_owned();
    if bytes.len() > MAX_OUTPUT_BYTES {
        format!("{text}\n... (output truncated)")
    } else {
        text
    }
}
