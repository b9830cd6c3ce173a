use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};

/// Exit status and merged stdout/stderr of one indexer process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub output: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

enum Outcome {
    Finished(std::io::Result<ExitStatus>),
    Stopped,
    TimedOut(Duration),
}

/// Runs a single indexer process for a single job.
///
/// The process gets stdin and stdout piped, with stderr merged into the
/// same output stream in arrival order. [`ProcessRunner::stop`] may be called
/// from any task or thread and makes a pending `execute` return promptly
/// with [`BridgeError::Cancelled`]. A stopped runner never spawns again.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    label: String,
    stop: CancellationToken,
    quiet: bool,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            label: label.into(),
            stop: CancellationToken::new(),
            quiet: false,
        }
    }

    /// Suppress per-run debug logging (used by polling-style jobs).
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Terminate the running process, if any. Idempotent.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            tracing::debug!(job_id = %self.label, "Stopping process");
        }
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Run the process to completion and collect all of its output.
    pub async fn execute(
        &self,
        args: &[String],
        input: &[u8],
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput> {
        let mut output = Vec::new();
        let exit_code = self
            .run(args, input, timeout, |line| {
                output.extend_from_slice(line);
                ControlFlow::Continue(())
            })
            .await?;
        Ok(ProcessOutput { exit_code, output })
    }

    /// Run the process and hand every output line to `on_line` as it arrives.
    ///
    /// Returning `ControlFlow::Break` from `on_line` kills the process. The
    /// returned [`ProcessOutput`] carries no output bytes.
    pub async fn execute_streaming<F>(
        &self,
        args: &[String],
        input: &[u8],
        timeout: Option<Duration>,
        on_line: F,
    ) -> Result<ProcessOutput>
    where
        F: FnMut(&[u8]) -> ControlFlow<()>,
    {
        let exit_code = self.run(args, input, timeout, on_line).await?;
        Ok(ProcessOutput {
            exit_code,
            output: Vec::new(),
        })
    }

    async fn run<F>(
        &self,
        args: &[String],
        input: &[u8],
        timeout: Option<Duration>,
        mut on_line: F,
    ) -> Result<Option<i32>>
    where
        F: FnMut(&[u8]) -> ControlFlow<()>,
    {
        if self.stop.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        if !self.quiet {
            tracing::debug!(
                job_id = %self.label,
                program = %self.program.display(),
                ?args,
                input_len = input.len(),
                ?timeout,
                "Starting process"
            );
        }

        let started = Instant::now();
        let mut child = self.spawn(args)?;
        let lines = merge_output(&mut child);

        let outcome = {
            let communicate = communicate(&mut child, input, lines, &mut on_line);
            let deadline = async {
                match timeout {
                    Some(limit) => {
                        tokio::time::sleep(limit).await;
                        limit
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                status = communicate => Outcome::Finished(status),
                _ = self.stop.cancelled() => Outcome::Stopped,
                limit = deadline => Outcome::TimedOut(limit),
            }
        };

        let result = match outcome {
            Outcome::Finished(Ok(status)) => Ok(status.code()),
            Outcome::Finished(Err(e)) => {
                terminate(&mut child).await;
                Err(BridgeError::Io(e))
            }
            Outcome::Stopped => {
                terminate(&mut child).await;
                Err(BridgeError::Cancelled)
            }
            Outcome::TimedOut(limit) => {
                tracing::warn!(job_id = %self.label, timeout = ?limit, "Process timed out");
                terminate(&mut child).await;
                Err(BridgeError::Timeout(limit))
            }
        };

        if !self.quiet {
            tracing::debug!(
                job_id = %self.label,
                elapsed_ms = started.elapsed().as_millis() as u64,
                exit_code = ?result.as_ref().ok().copied().flatten(),
                "Process finished"
            );
        }

        result
    }

    fn spawn(&self, args: &[String]) -> Result<Child> {
        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                tracing::error!(
                    job_id = %self.label,
                    program = %self.program.display(),
                    error = %source,
                    "Failed to launch process"
                );
                BridgeError::Launch {
                    program: self.program.display().to_string(),
                    source,
                }
            })
    }
}

/// Write all input, then drain merged output until both pipes close.
async fn communicate<F>(
    child: &mut Child,
    input: &[u8],
    mut lines: mpsc::UnboundedReceiver<Vec<u8>>,
    on_line: &mut F,
) -> std::io::Result<ExitStatus>
where
    F: FnMut(&[u8]) -> ControlFlow<()>,
{
    if let Some(mut stdin) = child.stdin.take() {
        if !input.is_empty() {
            match stdin.write_all(input).await {
                Ok(()) => {}
                // The process exited without reading its input; its output still counts.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e),
            }
        }
        drop(stdin);
    }

    while let Some(line) = lines.recv().await {
        if on_line(&line).is_break() {
            terminate(child).await;
            break;
        }
    }

    child.wait().await
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "Process already gone");
    }
    let _ = child.wait().await;
}

/// Forward stdout and stderr line by line into one channel.
fn merge_output(child: &mut Child) -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx));
    }
    rx
}

async fn forward_lines<R>(pipe: R, tx: mpsc::UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Output pipe read failed");
                break;
            }
        }
    }
}
