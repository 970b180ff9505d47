//! Boundary to whatever starts the runner process.
//!
//! The session only needs the runner to connect to its socket. How that
//! happens belongs to the caller: [`AttachedRunner`] assumes it is already
//! taken care of, [`CommandRunner`] launches a command once per session.
//! A session serves a single connection, so a runner that has exited is
//! reported instead of relaunched.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::SessionError;
use crate::router::ResolverKind;

pub const SOCKET_ENV: &str = "TESTBRIDGE_SOCKET";
pub const WORKSPACE_ENV: &str = "TESTBRIDGE_WORKSPACE";
pub const SESSION_ENV: &str = "TESTBRIDGE_SESSION";

/// Everything a launcher may need to point a runner at a session.
#[derive(Debug, Clone)]
pub struct RunnerLaunch {
    pub session_id: String,
    /// Listening socket, `None` for sessions built over an existing stream.
    pub endpoint: Option<PathBuf>,
    pub workspace_root: PathBuf,
    pub correlation_id: String,
    pub kind: ResolverKind,
}

#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    /// Called before a request is written. Must be idempotent: every
    /// request on a session calls it.
    async fn prepare(&self, launch: &RunnerLaunch) -> Result<(), SessionError>;
}

/// The runner is launched and connected by someone else.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachedRunner;

#[async_trait]
impl ExecutionEnvironment for AttachedRunner {
    async fn prepare(&self, _launch: &RunnerLaunch) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Launches `program args..` with the session socket in its environment.
/// Once the runner has exited, later requests fail with
/// [`SessionError::Launch`].
#[derive(Debug)]
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: Mutex::new(None),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub async fn kill(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
    }
}

#[async_trait]
impl ExecutionEnvironment for CommandRunner {
    async fn prepare(&self, launch: &RunnerLaunch) -> Result<(), SessionError> {
        let mut slot = self.child.lock().await;

        if let Some(child) = slot.as_mut() {
            return match child.try_wait() {
                Ok(None) => Ok(()),
                Ok(Some(status)) => {
                    warn!(%status, program = %self.program, "runner already exited");
                    Err(SessionError::Launch(format!("{} exited: {status}", self.program)))
                }
                Err(e) => Err(SessionError::Launch(format!(
                    "{}: cannot poll runner: {e}",
                    self.program
                ))),
            };
        }

        let endpoint = launch.endpoint.as_ref().ok_or_else(|| {
            SessionError::Launch("session has no listening socket to hand the runner".into())
        })?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(SOCKET_ENV, endpoint)
            .env(WORKSPACE_ENV, &launch.workspace_root)
            .env(SESSION_ENV, &launch.session_id)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if launch.workspace_root.is_dir() {
            cmd.current_dir(&launch.workspace_root);
        }

        let child = cmd
            .spawn()
            .map_err(|e| SessionError::Launch(format!("{}: {e}", self.program)))?;
        info!(program = %self.program, pid = ?child.id(), kind = %launch.kind, "launched runner");
        *slot = Some(child);
        Ok(())
    }
}
