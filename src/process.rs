use std::{io::ErrorKind, process::Stdio, time::Duration};

use thiserror::Error;
use tokio::{process::Command, time::timeout};
use tracing::{debug, info, warn};

/// Substrings in tool stderr that mean the site refused us rather than the tool breaking.
const BLOCK_MARKERS: [&str; 12] = [
    "login required",
    "log in",
    "sign in to confirm",
    "private",
    "checkpoint",
    "not available in your country",
    "geo restrict",
    "429",
    "too many requests",
    "please wait a few minutes",
    "401 unauthorized",
    "403: forbidden",
];

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{program} is not installed")]
    NotInstalled { program: String },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {seconds}s")]
    TimedOut { program: String, seconds: u64 },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

impl ToolError {
    /// True when the tool reported an authentication, privacy, geo or rate block.
    pub fn is_blocked(&self) -> bool {
        let Self::Failed { stderr, .. } = self else {
            return false;
        };
        let lower = stderr.to_ascii_lowercase();
        BLOCK_MARKERS.iter().any(|marker| lower.contains(marker))
    }
}

/// An external program plus the arguments that always precede the per-call ones, so
/// `python3 -m yt_dlp` works as well as a plain `yt-dlp` binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    prefix_args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Splits a whitespace-separated command line. Returns `None` for blank input.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split_whitespace().map(ToString::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            prefix_args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs the tool to completion and returns its output when it exits successfully.
    ///
    /// Arguments go straight to argv, no shell is involved. The child is killed if the
    /// returned future is dropped, which is what happens when the caller disconnects or the
    /// timeout fires.
    pub async fn run(
        &self,
        args: &[String],
        limit: Duration,
    ) -> Result<std::process::Output, ToolError> {
        debug!("Running {} {:?} {:?}", self.program, self.prefix_args, args);

        let command_future = Command::new(&self.program)
            .args(&self.prefix_args)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = timeout(limit, command_future)
            .await
            .map_err(|_| ToolError::TimedOut {
                program: self.program.clone(),
                seconds: limit.as_secs(),
            })?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ToolError::NotInstalled {
                        program: self.program.clone(),
                    }
                } else {
                    ToolError::Spawn {
                        program: self.program.clone(),
                        source: error,
                    }
                }
            })?;

        if !output.status.success() {
            return Err(ToolError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: last_stderr_lines(&output.stderr),
            });
        }

        Ok(output)
    }

    /// Logs whether the tool is available, for startup diagnostics.
    pub async fn log_version(&self) -> bool {
        let args = ["--version".to_string()];
        match self.run(&args, Duration::from_secs(15)).await {
            Ok(output) => {
                let version = String::from_utf8_lossy(&output.stdout);
                info!(
                    "{} is available, version: {}",
                    self.program,
                    version.lines().next().unwrap_or("unknown").trim()
                );
                true
            }
            Err(error) => {
                warn!("{} is not usable: {error}", self.program);
                false
            }
        }
    }
}

fn last_stderr_lines(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" | ")
}
