//! AcpAgent - the bidirectional JSON-RPC connection to one agent.
//!
//! This module implements the AgentConnection trait over any duplex byte
//! stream (usually the agent's stdio). It handles:
//! - Reading and classifying inbound lines on a single reader task
//! - Correlating responses with host-initiated calls
//! - Dispatching agent-initiated requests to capability handlers
//! - Routing notifications to subscribers
//! - Deterministic shutdown of all of the above

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;

use super::correlator::{PendingResponse, RequestCorrelator};
use super::dispatcher::InboundDispatcher;
use super::framing::{FrameReader, FrameWriter};
use super::message::Message;
use super::router::NotificationRouter;
use crate::api::types::ApiError;
use crate::config::{AgentCommand, BridgeConfig};
use crate::protocols::agent_connection::AgentConnection;

pub struct AcpAgent {
    correlator: Arc<RequestCorrelator>,
    dispatcher: Arc<InboundDispatcher>,
    router: Arc<NotificationRouter>,
    writer: FrameWriter,
    /// Reader task; aborted on shutdown to detach the read side
    reader_task: Mutex<Option<JoinHandle<()>>>,
    /// The spawned child process, when the bridge launched the agent itself
    child: Mutex<Option<Child>>,
    /// Cleared by the reader task when the agent closes its output
    connected: Arc<AtomicBool>,
    shut_down: AtomicBool,
}

impl AcpAgent {
    /// Attach to an agent over an existing duplex stream.
    ///
    /// Must be called from within a tokio runtime: the reader task is spawned
    /// immediately.
    pub fn connect<R, W>(reader: R, writer: W, config: &BridgeConfig) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer = FrameWriter::new(writer);
        let correlator = Arc::new(RequestCorrelator::new(
            writer.clone(),
            config.request_timeout(),
        ));
        let dispatcher = Arc::new(InboundDispatcher::new());
        let router = Arc::new(NotificationRouter::new());
        let connected = Arc::new(AtomicBool::new(true));

        let reader_task = tokio::spawn(read_loop(
            FrameReader::new(reader),
            ReadLoopContext {
                correlator: correlator.clone(),
                dispatcher: dispatcher.clone(),
                router: router.clone(),
                writer: writer.clone(),
                semaphore: Arc::new(Semaphore::new(config.max_inflight_requests)),
                connected: connected.clone(),
            },
        ));

        log::info!(
            "ACP connection established: timeout={}ms, max_inflight={}",
            config.request_timeout_ms,
            config.max_inflight_requests
        );

        Arc::new(Self {
            correlator,
            dispatcher,
            router,
            writer,
            reader_task: Mutex::new(Some(reader_task)),
            child: Mutex::new(None),
            connected,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Spawn an agent process with piped stdio and attach to it.
    ///
    /// # Arguments
    /// * `cmd` - How to launch the agent (path, args, env)
    /// * `cwd` - Working directory for the agent (workspace root)
    /// * `config` - Bridge configuration
    pub async fn spawn(
        cmd: AgentCommand,
        cwd: &Path,
        config: &BridgeConfig,
    ) -> Result<Arc<Self>, ApiError> {
        log::info!("Spawning ACP agent: bin={:?}, cwd={:?}", cmd.path, cwd);

        let mut command = Command::new(&cmd.path);
        command
            .args(&cmd.args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ApiError::io("Failed to spawn agent process", e))?;

        log::debug!("Agent process spawned: pid={:?}", child.id());

        match child.try_wait() {
            Ok(Some(status)) => {
                log::error!("Agent process exited immediately: exit_status={status:?}");
                return Err(ApiError::ProtocolError {
                    message: format!(
                        "Agent process exited immediately with status: {:?}",
                        status.code()
                    ),
                });
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("Failed to check process status: {e}");
            }
        }

        let stdin = child.stdin.take().ok_or_else(|| ApiError::ProtocolError {
            message: "Failed to get stdin handle".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ApiError::ProtocolError {
            message: "Failed to get stdout handle".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ApiError::ProtocolError {
            message: "Failed to get stderr handle".to_string(),
        })?;

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("[agent stderr] {line}");
            }
            log::debug!("Agent stderr closed");
        });

        let agent = Self::connect(stdout, stdin, config);
        *agent.child.lock().await = Some(child);
        Ok(agent)
    }

    pub fn dispatcher(&self) -> &Arc<InboundDispatcher> {
        &self.dispatcher
    }

    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    /// Send a request without waiting; the returned future settles later.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<PendingResponse, ApiError> {
        self.ensure_open(method)?;
        self.register_and_send(method, params).await
    }

    /// Register and write a call that already passed `ensure_open`.
    ///
    /// Shutdown or EOF may land between that check and registration, so
    /// both are checked again once the entry exists.
    async fn register_and_send(
        &self,
        method: &str,
        params: Value,
    ) -> Result<PendingResponse, ApiError> {
        let params = (!params.is_null()).then_some(params);
        let pending = match self.correlator.send_request(method, params).await {
            Ok(pending) => pending,
            Err(_) if self.is_shut_down() => {
                return Err(ApiError::Shutdown {
                    method: method.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        if self.is_shut_down() {
            self.correlator
                .reject_all(|method| ApiError::Shutdown {
                    method: method.to_string(),
                })
                .await;
        } else if !self.connected.load(Ordering::SeqCst) {
            self.correlator
                .reject_all(|method| ApiError::ConnectionLost {
                    method: method.to_string(),
                })
                .await;
        }
        Ok(pending)
    }

    pub async fn pending_count(&self) -> usize {
        self.correlator.pending_count().await
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.is_shut_down()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_open(&self, method: &str) -> Result<(), ApiError> {
        if self.is_shut_down() {
            return Err(ApiError::Shutdown {
                method: method.to_string(),
            });
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ApiError::ConnectionLost {
                method: method.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AgentConnection for AcpAgent {
    async fn call(&self, method: &str, params: Value) -> Result<Value, ApiError> {
        self.send_request(method, params).await?.await
    }

    async fn shutdown(&self) -> Result<(), ApiError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            log::debug!("ACP connection already shut down");
            return Ok(());
        }

        log::info!("Shutting down ACP connection");

        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }

        self.writer.close().await;
        let rejected = self
            .correlator
            .reject_all(|method| ApiError::Shutdown {
                method: method.to_string(),
            })
            .await;
        self.dispatcher.clear().await;
        let detached = self.router.clear().await;

        // Take the child out of the mutex before awaiting the kill
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                log::warn!("Failed to kill agent process: {e}");
            }
        }

        log::info!(
            "ACP connection shut down: rejected_calls={rejected}, detached_subscribers={detached}"
        );
        Ok(())
    }
}

impl Drop for AcpAgent {
    fn drop(&mut self) {
        if let Ok(mut task) = self.reader_task.try_lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
        log::debug!("AcpAgent dropped");
    }
}

struct ReadLoopContext {
    correlator: Arc<RequestCorrelator>,
    dispatcher: Arc<InboundDispatcher>,
    router: Arc<NotificationRouter>,
    writer: FrameWriter,
    semaphore: Arc<Semaphore>,
    connected: Arc<AtomicBool>,
}

async fn read_loop<R>(mut reader: FrameReader<R>, ctx: ReadLoopContext)
where
    R: AsyncRead + Unpin,
{
    while let Some(message) = reader.next_message().await {
        match message {
            Message::Response(response) => {
                ctx.correlator.handle_response(response).await;
            }
            Message::Notification(notification) => {
                ctx.router.handle_notification(notification).await;
            }
            Message::Request(request) => {
                let dispatcher = ctx.dispatcher.clone();
                let writer = ctx.writer.clone();
                let semaphore = ctx.semaphore.clone();

                // Handlers may call back into the agent, so the permit is
                // taken inside the task and reading never stalls on it
                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return;
                    };
                    let response = dispatcher.handle_request(request).await;
                    if let Err(e) = writer.send(&Message::Response(response)).await {
                        log::warn!("Failed to send JSON-RPC response: {e}");
                    }
                });
            }
        }
    }

    log::info!("Agent output closed");
    ctx.connected.store(false, Ordering::SeqCst);

    let rejected = ctx
        .correlator
        .reject_all(|method| ApiError::ConnectionLost {
            method: method.to_string(),
        })
        .await;
    if rejected > 0 {
        log::warn!("Agent connection lost with {rejected} pending request(s)");
    }
}
