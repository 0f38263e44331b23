//! External tool invocation shared by the rasterizer and the recogniser.
//!
//! Every child is spawned with `kill_on_drop(true)`: when the orchestrator
//! drops a render or recognise future (page timeout, job deadline,
//! cancellation) the process is killed with it, so no engine keeps running
//! for a page that has already been reported Failed.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Longest stderr excerpt carried in an error.
const STDERR_EXCERPT: usize = 512;

/// Failure of one external tool run.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} not found (install it or pass its path explicitly)")]
    NotFound { tool: String },

    #[error("{tool}: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },
}

/// Captured output of a successful run.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Build a command for `program` with piped stdio and kill-on-drop.
pub fn command(program: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Run `cmd` to completion, optionally feeding `stdin`, and return its
/// output if it exited successfully.
pub async fn run(mut cmd: Command, stdin: Option<Bytes>) -> Result<ToolOutput, ToolError> {
    let tool = tool_name(cmd.as_std().get_program());
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    }

    let mut child = cmd.spawn().map_err(|e| spawn_error(&tool, e))?;
    debug!("Spawned {} (pid {:?})", tool, child.id());

    let output = match (stdin, child.stdin.take()) {
        (Some(data), Some(mut pipe)) => {
            let feed = async move {
                match pipe.write_all(&data).await {
                    // The tool may exit before reading everything; its exit
                    // status tells the real story.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                }
                // `pipe` drops here, closing stdin.
            };
            let (_, output) = tokio::try_join!(feed, child.wait_with_output())
                .map_err(|e| io_error(&tool, e))?;
            output
        }
        _ => child
            .wait_with_output()
            .await
            .map_err(|e| io_error(&tool, e))?,
    };

    if output.status.success() {
        Ok(ToolOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    } else {
        Err(ToolError::Failed {
            tool,
            status: output.status.to_string(),
            stderr: excerpt(&output.stderr),
        })
    }
}

fn tool_name(program: &std::ffi::OsStr) -> String {
    PathBuf::from(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string_lossy().into_owned())
}

fn spawn_error(tool: &str, e: std::io::Error) -> ToolError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ToolError::NotFound {
            tool: tool.to_string(),
        }
    } else {
        io_error(tool, e)
    }
}

fn io_error(tool: &str, source: std::io::Error) -> ToolError {
    ToolError::Io {
        tool: tool.to_string(),
        source,
    }
}

fn excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().nth(STDERR_EXCERPT) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
