//! Invokes the storage client as a blocking subprocess and times it.

use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::CommandLine;

/// A client operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Stores a file in the cluster.
    Upload,
    /// Fetches a previously uploaded file.
    Read,
}

impl OperationKind {
    /// The client subcommand for this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Upload => "upload",
            OperationKind::Read => "read",
        }
    }

    /// Human-readable name used in reports, e.g. `Upload`.
    pub fn title(&self) -> &'static str {
        match self {
            OperationKind::Upload => "Upload",
            OperationKind::Read => "Read",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            s if s.eq_ignore_ascii_case("upload") => Ok(OperationKind::Upload),
            s if s.eq_ignore_ascii_case("read") => Ok(OperationKind::Read),
            s => Err(format!(r#"unknown operation "{s}": expected "upload" or "read""#)),
        }
    }
}

/// Whether the client exited with status 0.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The client exited with status 0.
    Success,
    /// The client exited unsuccessfully, was killed or could not be started.
    Failure,
}

/// Captured output of one client process.
#[derive(Clone, Debug, Default)]
pub struct ClientOutput {
    /// Exit code, or `None` if the process was killed by a signal or never started.
    pub code: Option<i32>,
    /// Captured standard output, lossily decoded.
    pub stdout: String,
    /// Captured standard error, or the spawn error if the process never started.
    pub stderr: String,
}

/// The timing and result of a single client invocation.
#[derive(Clone, Debug)]
pub struct OperationRecord {
    /// The operation that was timed.
    pub kind: OperationKind,
    /// Wall-clock time from issuing the command until the process exited.
    pub elapsed: Duration,
    /// Whether the client succeeded.
    pub outcome: Outcome,
    /// What the client printed and how it exited.
    pub output: ClientOutput,
}

impl OperationRecord {
    /// Returns `true` if the client exited with status 0.
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Runs client commands one at a time.
///
/// Invocations take `&mut self`, so at most one client process is in flight per invoker.
#[derive(Debug)]
pub struct ClientInvoker {
    client: CommandLine,
    work_dir: PathBuf,
}

impl ClientInvoker {
    /// Creates an invoker that runs `client` with `work_dir` as its current directory.
    pub fn new(client: CommandLine, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            work_dir: work_dir.into(),
        }
    }

    /// Runs `<client> <kind> <file_name>` and measures its end-to-end latency.
    ///
    /// The measured interval includes process startup and teardown. A non-zero exit, a signal,
    /// or a client that cannot be spawned at all produce [`Outcome::Failure`]; none of them is
    /// an error for the caller.
    pub async fn invoke(&mut self, kind: OperationKind, file_name: &str) -> OperationRecord {
        let (elapsed, outcome, output) = self.run(&[kind.as_str(), file_name]).await;

        match outcome {
            Outcome::Success => {
                tracing::info!(%kind, file_name, ?elapsed, "client operation succeeded");
                tracing::debug!(stdout = output.stdout.trim_end(), "client output");
            }
            Outcome::Failure => {
                tracing::warn!(
                    %kind,
                    file_name,
                    ?elapsed,
                    code = ?output.code,
                    stderr = output.stderr.trim_end(),
                    "client operation failed",
                );
            }
        }

        OperationRecord {
            kind,
            elapsed,
            outcome,
            output,
        }
    }

    /// Runs the client with arbitrary arguments and reports only whether it succeeded.
    pub async fn probe(&mut self, args: &[String]) -> bool {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let (elapsed, outcome, output) = self.run(&args).await;
        tracing::debug!(?args, ?elapsed, code = ?output.code, "readiness probe finished");
        outcome == Outcome::Success
    }

    async fn run(&mut self, args: &[&str]) -> (Duration, Outcome, ClientOutput) {
        let mut command = self.client.command();
        command
            .args(args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("executing: {} {}", self.client, args.join(" "));

        let start = Instant::now();
        let result = command.output().await;
        let elapsed = start.elapsed();

        match result {
            Ok(output) => {
                let outcome = classify(output.status);
                let output = ClientOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                };
                (elapsed, outcome, output)
            }
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    program = %self.client.program.display(),
                    "failed to spawn client",
                );
                let output = ClientOutput {
                    code: None,
                    stdout: String::new(),
                    stderr: err.to_string(),
                };
                (elapsed, Outcome::Failure, output)
            }
        }
    }
}

fn classify(status: ExitStatus) -> Outcome {
    if status.success() {
        Outcome::Success
    } else {
        Outcome::Failure
    }
}
