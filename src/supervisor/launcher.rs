//! Process launching
//!
//! `Launcher` spawns a backend and hands back a `ProcessHandle` exposing the
//! merged stdout/stderr line stream, exit polling and termination.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::supervisor::command::LaunchSpec;
use crate::supervisor::LaunchError;

/// How long `kill` waits for the process to be reaped
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when terminated by a signal
    pub code: Option<i32>,
}

/// Handle on a spawned backend process
#[async_trait]
pub trait ProcessHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Merged stdout/stderr, one item per line. Can be taken once.
    fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<String>>;

    /// `Some` once the process has exited
    fn try_exit(&mut self) -> Option<ProcessExit>;

    /// Terminate the process and wait for it to go away
    async fn kill(&mut self);
}

/// Spawns backend processes
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>, LaunchError>;
}

/// Launcher backed by `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct TokioLauncher;

#[async_trait]
impl Launcher for TokioLauncher {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>, LaunchError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.envs(spec.env.iter().map(|(key, value)| (key, value)));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| LaunchError::Spawn {
            program: spec.program.clone(),
            source: e,
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx);
        }

        Ok(Box::new(TokioProcess {
            child,
            output: Some(rx),
            exit: None,
        }))
    }
}

fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

struct TokioProcess {
    child: Child,
    output: Option<mpsc::UnboundedReceiver<String>>,
    exit: Option<ProcessExit>,
}

#[async_trait]
impl ProcessHandle for TokioProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.output.take()
    }

    fn try_exit(&mut self) -> Option<ProcessExit> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.exit = Some(ProcessExit {
                        code: status.code(),
                    })
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Failed to poll process {:?}: {}", self.child.id(), e);
                }
            }
        }
        self.exit
    }

    async fn kill(&mut self) {
        if self.try_exit().is_some() {
            return;
        }
        if let Err(e) = self.child.start_kill() {
            tracing::warn!("Failed to signal process {:?}: {}", self.child.id(), e);
        }
        match tokio::time::timeout(KILL_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exit = Some(ProcessExit {
                    code: status.code(),
                })
            }
            Ok(Err(e)) => tracing::warn!("Failed to reap process: {}", e),
            Err(_) => tracing::warn!(
                "Process {:?} did not exit within {:?}",
                self.child.id(),
                KILL_TIMEOUT
            ),
        }
    }
}
