//! Launching one isolated replay run.
//!
//! The limiter only knows the [`RunLauncher`] contract; how isolation is
//! achieved (child process, separate browser context, in-process task) is the
//! launcher's business. [`ProcessLauncher`] re-invokes this executable's
//! `run` subcommand per job, so each run gets its own process and page state.

use crate::status::RunStatus;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{error, info};

#[async_trait]
pub trait RunLauncher: Send + Sync {
    /// Run the named test to completion and report the final status.
    async fn launch(&self, test_name: &str) -> RunStatus;
}

pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Launcher that re-invokes the current executable with `args` followed
    /// by the test name, e.g. `webreplay run --config cfg.toml <test>`.
    pub fn current_exe(args: Vec<String>) -> anyhow::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, args))
    }
}

#[async_trait]
impl RunLauncher for ProcessLauncher {
    async fn launch(&self, test_name: &str) -> RunStatus {
        let mut child = match Command::new(&self.program)
            .args(&self.args)
            .arg(test_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!(test = %test_name, error = %e, "failed to spawn replay process");
                return RunStatus::Failed;
            }
        };

        let out = child.stdout.take().map(|s| forward(s, test_name, false));
        let err = child.stderr.take().map(|s| forward(s, test_name, true));

        let status = child.wait().await;
        if let Some(task) = out {
            let _ = task.await;
        }
        if let Some(task) = err {
            let _ = task.await;
        }

        match status {
            Ok(s) if s.success() => RunStatus::Done,
            Ok(s) => {
                info!(test = %test_name, code = ?s.code(), "replay process exited non-zero");
                RunStatus::Failed
            }
            Err(e) => {
                error!(test = %test_name, error = %e, "failed to wait on replay process");
                RunStatus::Failed
            }
        }
    }
}

fn forward<R>(stream: R, test_name: &str, is_stderr: bool) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let test = test_name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                error!(test = %test, "[replay stderr] {line}");
            } else {
                info!(test = %test, "[replay stdout] {line}");
            }
        }
    })
}
