// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{path::Path, process::Output, process::Stdio};

use lazy_static::lazy_static;
use thiserror::Error;
use tokio::{process::Command, sync::Mutex};
use tokio_util::sync::CancellationToken;

lazy_static! {
    // zypper takes an exclusive repository lock; concurrent invocations fail.
    static ref ZYPPER_LOCK: Mutex<()> = Mutex::new(());
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("command canceled")]
    Canceled,
    #[error("{command}: {status}\n{stdout}\n{stderr}")]
    Failed {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },
    #[error("spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, CommandError::Canceled)
    }
}

/// Prefix the command with `sudo` unless we already run as root.
pub fn sudo_wrap(binary: &str, args: &[&str]) -> (String, Vec<String>) {
    if nix::unistd::Uid::effective().is_root() {
        (
            binary.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        )
    } else {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(binary.to_string());
        full.extend(args.iter().map(|a| a.to_string()));
        ("sudo".to_string(), full)
    }
}

/// Run a command to completion, capturing output. Cancellation kills the
/// child process. Non-zero exit reports the captured stdout and stderr.
pub async fn run_cmd(
    shutdown: &CancellationToken,
    cwd: Option<&Path>,
    binary: &str,
    args: &[&str],
) -> Result<(), CommandError> {
    run_cmd_capture(shutdown, cwd, binary, args).await.map(|_| ())
}

/// Like `run_cmd` but hands the captured output back on success.
pub async fn run_cmd_capture(
    shutdown: &CancellationToken,
    cwd: Option<&Path>,
    binary: &str,
    args: &[&str],
) -> Result<Output, CommandError> {
    let display = format!("{} {}", binary, args.join(" "));

    let mut command = Command::new(binary);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = tokio::select! {
        _ = shutdown.cancelled() => return Err(CommandError::Canceled),
        output = command.output() => output.map_err(|source| CommandError::Spawn {
            command: display.clone(),
            source,
        })?,
    };

    if !output.status.success() {
        return Err(CommandError::Failed {
            command: display,
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output)
}

/// Run zypper under the process-wide lock, with privilege elevation, and
/// return its stdout.
pub async fn run_zypper(
    shutdown: &CancellationToken,
    args: &[&str],
) -> Result<String, CommandError> {
    let _guard = ZYPPER_LOCK.lock().await;

    let (binary, full_args) = sudo_wrap("zypper", args);
    let arg_refs: Vec<&str> = full_args.iter().map(String::as_str).collect();
    let output = run_cmd_capture(shutdown, None, &binary, &arg_refs).await?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let shutdown = CancellationToken::new();
        let output = run_cmd_capture(&shutdown, None, "echo", &["hello"]).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_reports_stderr() {
        let shutdown = CancellationToken::new();
        let err = run_cmd(&shutdown, None, "sh", &["-c", "echo oops >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            CommandError::Failed { stderr, .. } => assert!(stderr.contains("oops")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let err = run_cmd(&shutdown, None, "sleep", &["30"]).await.unwrap_err();
        assert!(err.is_canceled());
    }

    #[test]
    fn sudo_wrap_keeps_the_argument_order() {
        let (binary, args) = sudo_wrap("yum", &["search", "kernel-debuginfo"]);
        if binary == "sudo" {
            assert_eq!(args, vec!["yum", "search", "kernel-debuginfo"]);
        } else {
            assert_eq!(binary, "yum");
            assert_eq!(args, vec!["search", "kernel-debuginfo"]);
        }
    }
}
