//! One connection to a test runner.
//!
//! A single reader task owns the inbound half and the [`FrameDecoder`]; it
//! drains every complete frame from each chunk before reading the next one,
//! so results are routed strictly in stream order. Requests may be issued
//! concurrently from any number of tasks: they share the writer behind a
//! mutex and are told apart only by their correlation id.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::BytesMut;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::{oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::RunContext;
use crate::config::SessionConfig;
use crate::env::{ExecutionEnvironment, RunnerLaunch};
use crate::error::{ProtocolError, SessionError};
use crate::frame::{encode_frame, FrameDecoder, RawFrame};
use crate::payload::{DiscoveryPayload, ExecutionPayload, RunnerRequest};
use crate::router::{CorrelationRouter, Resolution, ResolverKind};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Listening, no runner connected yet.
    Pending,
    Ready,
    Closed,
}

/// A decoded, correlated result frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub correlation_id: String,
    pub body: Value,
}

/// Decode a frame's payload as JSON and pair it with its correlation id.
/// `Ok(None)` for frames that carry no payload at all.
pub fn decode_message(frame: &RawFrame) -> Result<Option<DecodedMessage>, ProtocolError> {
    let correlation_id = frame.headers.correlation_id().map(str::to_string);
    if frame.payload.is_empty() {
        debug!(?correlation_id, state = ?frame.state, "frame without payload");
        return Ok(None);
    }

    let body: Value = serde_json::from_slice(&frame.payload.to_bytes()).map_err(|e| {
        ProtocolError::MalformedPayload {
            correlation_id: correlation_id.clone(),
            reason: e.to_string(),
        }
    })?;
    let correlation_id = correlation_id.ok_or(ProtocolError::MissingCorrelationId)?;
    Ok(Some(DecodedMessage {
        correlation_id,
        body,
    }))
}

async fn wait_closed(rx: &mut watch::Receiver<Handshake>) {
    let _ = rx.wait_for(|h| *h == Handshake::Closed).await;
}

// ── Shared state ────────────────────────────────────────────────────

struct Shared {
    config: SessionConfig,
    endpoint: Option<PathBuf>,
    router: CorrelationRouter,
    writer: Mutex<Option<BoxedWriter>>,
    handshake: watch::Sender<Handshake>,
}

impl Shared {
    fn new(config: SessionConfig, endpoint: Option<PathBuf>, writer: Option<BoxedWriter>) -> Self {
        let initial = if writer.is_some() {
            Handshake::Ready
        } else {
            Handshake::Pending
        };
        let (handshake, _) = watch::channel(initial);
        Self {
            config,
            endpoint,
            router: CorrelationRouter::new(),
            writer: Mutex::new(writer),
            handshake,
        }
    }

    async fn accept(self: Arc<Self>, listener: UnixListener) {
        let mut closed = self.handshake.subscribe();
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = wait_closed(&mut closed) => {
                self.terminate().await;
                return;
            }
        };
        drop(listener);

        match accepted {
            Ok((stream, _)) => {
                let (reader, writer) = stream.into_split();
                *self.writer.lock().await = Some(Box::new(writer));
                self.handshake.send_if_modified(|h| {
                    if *h == Handshake::Pending {
                        *h = Handshake::Ready;
                        true
                    } else {
                        false
                    }
                });
                info!(session = %self.config.session_id, "runner connected");
                self.read_loop(reader).await;
            }
            Err(e) => {
                warn!(session = %self.config.session_id, error = %e, "accept failed");
                self.terminate().await;
            }
        }
    }

    async fn read_loop<R>(self: Arc<Self>, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::with_capacity(self.config.read_chunk_bytes);
        let mut closed = self.handshake.subscribe();

        loop {
            buf.reserve(self.config.read_chunk_bytes);
            tokio::select! {
                read = reader.read_buf(&mut buf) => match read {
                    Ok(0) => {
                        info!(session = %self.config.session_id, "runner closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(session = %self.config.session_id, error = %e, "read failed");
                        break;
                    }
                },
                _ = wait_closed(&mut closed) => break,
            }

            for frame in decoder.push(buf.split().freeze()) {
                self.dispatch(&frame);
            }
        }

        if decoder.buffered() > 0 {
            warn!(
                session = %self.config.session_id,
                buffered = decoder.buffered(),
                missing = ?decoder.missing(),
                "connection ended inside a frame"
            );
        }
        self.terminate().await;
    }

    fn dispatch(&self, frame: &RawFrame) {
        match decode_message(frame) {
            Ok(Some(message)) => {
                self.router.route(&message.correlation_id, message.body);
            }
            Ok(None) => {}
            Err(e) => warn!(session = %self.config.session_id, error = %e, "dropping frame"),
        }
    }

    async fn terminate(&self) {
        let previous = self.handshake.send_replace(Handshake::Closed);
        let rejected = self.router.terminate();

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        if previous != Handshake::Closed || rejected > 0 {
            info!(session = %self.config.session_id, rejected, "session terminated");
        }
        if let Some(path) = &self.endpoint {
            let _ = fs::remove_file(path);
        }
    }

    async fn write_frame(&self, correlation_id: &str, payload: &[u8]) -> Result<(), SessionError> {
        let frame = encode_frame(correlation_id, payload);
        let mut slot = self.writer.lock().await;
        let writer = slot.as_mut().ok_or(SessionError::SessionTerminated)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Cancels the pending entry if the request is abandoned before its result
/// arrives (dropped future, timeout, run cancellation).
struct PendingGuard<'a> {
    router: &'a CorrelationRouter,
    correlation_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.router.cancel(self.correlation_id) {
            debug!(correlation_id = self.correlation_id, "request abandoned");
        }
    }
}

// ── Session ─────────────────────────────────────────────────────────

pub struct TestServerSession {
    shared: Arc<Shared>,
}

impl TestServerSession {
    /// Bind the configured Unix socket and wait for a runner to connect.
    /// Must be called from within a tokio runtime.
    pub fn listen(config: SessionConfig) -> io::Result<Self> {
        let path = config.socket_path.clone();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        // Clean up stale socket from a previous crash
        let _ = fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        info!(session = %config.session_id, socket = %path.display(), "listening for runner");

        let shared = Arc::new(Shared::new(config, Some(path), None));
        tokio::spawn(Arc::clone(&shared).accept(listener));
        Ok(Self { shared })
    }

    /// Wrap an already-connected transport. The handshake is complete at
    /// construction.
    pub fn from_stream<R, W>(reader: R, writer: W, config: SessionConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared::new(config, None, Some(Box::new(writer))));
        tokio::spawn(Arc::clone(&shared).read_loop(reader));
        Self { shared }
    }

    pub fn session_id(&self) -> &str {
        &self.shared.config.session_id
    }

    pub fn endpoint(&self) -> Option<&Path> {
        self.shared.endpoint.as_deref()
    }

    pub fn handshake(&self) -> Handshake {
        *self.shared.handshake.borrow()
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.router.pending_count()
    }

    /// Wait until a runner is connected. Any number of callers may wait at
    /// once; all are released together.
    pub async fn server_ready(&self) -> Result<(), SessionError> {
        let mut rx = self.shared.handshake.subscribe();
        let state = *rx
            .wait_for(|h| *h != Handshake::Pending)
            .await
            .map_err(|_| SessionError::SessionTerminated)?;
        match state {
            Handshake::Ready => Ok(()),
            _ => Err(SessionError::SessionTerminated),
        }
    }

    pub async fn issue_discovery_request(
        &self,
        workspace_root: &Path,
        env: &dyn ExecutionEnvironment,
    ) -> Result<DiscoveryPayload, SessionError> {
        let request = RunnerRequest::Discovery {
            cwd: workspace_root.display().to_string(),
        };
        let body = self
            .issue(ResolverKind::Discovery, workspace_root, &request, env, None)
            .await?;
        serde_json::from_value(body).map_err(|e| SessionError::MalformedResult {
            kind: ResolverKind::Discovery,
            reason: e.to_string(),
        })
    }

    /// Issue an execution request. Cancelling `run` abandons the request.
    pub async fn issue_execution_request(
        &self,
        workspace_root: &Path,
        test_ids: &[String],
        is_debug: bool,
        run: Option<&RunContext>,
        env: &dyn ExecutionEnvironment,
    ) -> Result<ExecutionPayload, SessionError> {
        let request = RunnerRequest::Execution {
            cwd: workspace_root.display().to_string(),
            test_ids: test_ids.to_vec(),
            debug: is_debug,
        };
        let body = self
            .issue(
                ResolverKind::Execution,
                workspace_root,
                &request,
                env,
                run.map(RunContext::token),
            )
            .await?;
        serde_json::from_value(body).map_err(|e| SessionError::MalformedResult {
            kind: ResolverKind::Execution,
            reason: e.to_string(),
        })
    }

    /// Abandon a pending request. Late frames for it are dropped.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        self.shared.router.cancel(correlation_id)
    }

    /// Close the connection and reject every pending request.
    pub async fn shutdown(&self) {
        self.shared.terminate().await;
    }

    async fn issue(
        &self,
        kind: ResolverKind,
        workspace_root: &Path,
        request: &RunnerRequest,
        env: &dyn ExecutionEnvironment,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, SessionError> {
        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.shared.router.register(
            correlation_id.clone(),
            kind,
            Box::new(move |resolution| {
                let _ = tx.send(resolution);
            }),
        )?;
        let _guard = PendingGuard {
            router: &self.shared.router,
            correlation_id: &correlation_id,
        };

        let launch = RunnerLaunch {
            session_id: self.shared.config.session_id.clone(),
            endpoint: self.shared.endpoint.clone(),
            workspace_root: workspace_root.to_path_buf(),
            correlation_id: correlation_id.clone(),
            kind,
        };
        let payload = serde_json::to_vec(request)?;

        let exchange = self.exchange(&launch, env, &payload, rx);
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = exchange => result,
            _ = cancelled => {
                info!(%correlation_id, %kind, "request cancelled by caller");
                Err(SessionError::Cancelled(correlation_id.clone()))
            }
        }
    }

    async fn exchange(
        &self,
        launch: &RunnerLaunch,
        env: &dyn ExecutionEnvironment,
        payload: &[u8],
        rx: oneshot::Receiver<Resolution>,
    ) -> Result<Value, SessionError> {
        let id = launch.correlation_id.as_str();
        let deliver = async {
            env.prepare(launch).await?;
            self.server_ready().await?;
            self.shared.write_frame(id, payload).await?;
            debug!(correlation_id = id, kind = %launch.kind, bytes = payload.len(), "request written");
            rx.await
                .map_err(|_| SessionError::Cancelled(id.to_string()))?
        };

        match self.shared.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, deliver)
                .await
                .map_err(|_| SessionError::Timeout {
                    id: id.to_string(),
                    millis: limit.as_millis() as u64,
                })?,
            None => deliver.await,
        }
    }
}

impl Drop for TestServerSession {
    fn drop(&mut self) {
        // Background tasks observe this and tear the connection down.
        self.shared.handshake.send_replace(Handshake::Closed);
    }
}

// ── Unit tests ──────────────────────────────────────────────────────
