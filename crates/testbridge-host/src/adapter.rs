//! Discovery and execution adapters: issue one request on a session and
//! hand the decoded result to a [`ResultResolver`].

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::env::ExecutionEnvironment;
use crate::error::SessionError;
use crate::payload::{DiscoveryPayload, ExecutionPayload, Status};
use crate::session::TestServerSession;

/// Cancellation scope of one test run. Clones share the same signal.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    token: CancellationToken,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Receives decoded results. Each method is invoked at most once per
/// issued request.
#[async_trait]
pub trait ResultResolver: Send + Sync {
    async fn resolve_discovery(
        &self,
        payload: DiscoveryPayload,
        run: Option<&RunContext>,
    ) -> Result<(), SessionError>;

    async fn resolve_execution(
        &self,
        payload: ExecutionPayload,
        run: Option<&RunContext>,
    ) -> Result<(), SessionError>;
}

fn log_runner_errors(kind: &str, status: Status, errors: &[String]) {
    if status != Status::Success || !errors.is_empty() {
        warn!(kind, ?status, errors = errors.len(), "runner reported errors");
    }
    for error in errors {
        warn!(kind, "{error}");
    }
}

pub struct DiscoveryAdapter {
    session: Arc<TestServerSession>,
    resolver: Arc<dyn ResultResolver>,
}

impl DiscoveryAdapter {
    pub fn new(session: Arc<TestServerSession>, resolver: Arc<dyn ResultResolver>) -> Self {
        Self { session, resolver }
    }

    /// Completes once the resolver has seen the discovery result.
    pub async fn discover_tests(
        &self,
        workspace_root: &Path,
        env: &dyn ExecutionEnvironment,
    ) -> Result<(), SessionError> {
        info!(root = %workspace_root.display(), "discovering tests");
        let payload = self
            .session
            .issue_discovery_request(workspace_root, env)
            .await?;
        log_runner_errors("discovery", payload.status, payload.errors());
        self.resolver.resolve_discovery(payload, None).await
    }
}

pub struct ExecutionAdapter {
    session: Arc<TestServerSession>,
    resolver: Arc<dyn ResultResolver>,
}

impl ExecutionAdapter {
    pub fn new(session: Arc<TestServerSession>, resolver: Arc<dyn ResultResolver>) -> Self {
        Self { session, resolver }
    }

    /// Run `test_ids`. Cancelling `run` abandons the request; the resolver
    /// is then never invoked.
    pub async fn run_tests(
        &self,
        workspace_root: &Path,
        test_ids: &[String],
        is_debug: bool,
        run: &RunContext,
        env: &dyn ExecutionEnvironment,
    ) -> Result<(), SessionError> {
        info!(
            root = %workspace_root.display(),
            tests = test_ids.len(),
            debug = is_debug,
            "running tests"
        );
        let payload = self
            .session
            .issue_execution_request(workspace_root, test_ids, is_debug, Some(run), env)
            .await?;
        log_runner_errors("execution", payload.status, payload.errors());
        self.resolver.resolve_execution(payload, Some(run)).await
    }
}

/// Keeps every result it is given.
#[derive(Debug, Default)]
pub struct RecordingResolver {
    discoveries: Mutex<Vec<DiscoveryPayload>>,
    executions: Mutex<Vec<ExecutionPayload>>,
}

impl RecordingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discoveries(&self) -> Vec<DiscoveryPayload> {
        self.discoveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn executions(&self) -> Vec<ExecutionPayload> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ResultResolver for RecordingResolver {
    async fn resolve_discovery(
        &self,
        payload: DiscoveryPayload,
        _run: Option<&RunContext>,
    ) -> Result<(), SessionError> {
        self.discoveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
        Ok(())
    }

    async fn resolve_execution(
        &self,
        payload: ExecutionPayload,
        _run: Option<&RunContext>,
    ) -> Result<(), SessionError> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
        Ok(())
    }
}
