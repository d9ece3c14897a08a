//! AgentBridge - the host-facing surface of one agent connection.
//!
//! Composes the ACP connection with the session manager and exposes:
//! - Session lifecycle, prompting and settings (delegated to `SessionManager`)
//! - The remaining host → agent calls (initialize, cancel, confirmations, history)
//! - Capability registration for agent → host requests
//! - Subscriptions to streamed notifications

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use crate::api::types::{
    ApiError, DesiredSettings, PermissionDecision, PromptOutcome, ResumeOptions, Session,
    SessionCompleteEvent, SessionId, SessionOptions, SessionUpdateEvent,
};
use crate::config::{AgentCommand, BridgeConfig};
use crate::protocols::acp::capabilities;
use crate::protocols::acp::methods::*;
use crate::protocols::acp::{AcpAgent, RequestHandler, Subscription, SubscriptionId};
use crate::protocols::agent_connection::AgentConnection;
use crate::protocols::host::{
    FileSystemProvider, LanguageService, PermissionRuleStore, TerminalProvider,
};
use crate::runtime::sessions::SessionManager;

/// Capability areas the host has registered, advertised in `initialize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RegisteredCapabilities {
    fs: bool,
    terminal: bool,
    lsp: bool,
    permission_rules: bool,
}

pub struct AgentBridge {
    agent: Arc<AcpAgent>,
    sessions: SessionManager,
    config: BridgeConfig,
    capabilities: Mutex<RegisteredCapabilities>,
}

impl AgentBridge {
    /// Bridge to an agent over an existing duplex stream.
    pub fn connect<R, W>(reader: R, writer: W, config: BridgeConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let agent = AcpAgent::connect(reader, writer, &config);
        Self::with_agent(agent, config, SessionOptions::default())
    }

    /// Launch the agent process in `cwd` and bridge to its stdio.
    ///
    /// Sessions created lazily by a prompt use `cwd` as their working directory.
    pub async fn spawn(
        command: AgentCommand,
        cwd: &Path,
        config: BridgeConfig,
    ) -> Result<Self, ApiError> {
        let agent = AcpAgent::spawn(command, cwd, &config).await?;
        let defaults = SessionOptions {
            cwd: Some(cwd.to_string_lossy().to_string()),
            mcp_servers: Vec::new(),
        };
        Ok(Self::with_agent(agent, config, defaults))
    }

    fn with_agent(agent: Arc<AcpAgent>, config: BridgeConfig, defaults: SessionOptions) -> Self {
        let connection: Arc<dyn AgentConnection> = agent.clone();
        Self {
            sessions: SessionManager::new(connection, defaults),
            agent,
            config,
            capabilities: Mutex::new(RegisteredCapabilities::default()),
        }
    }

    pub fn agent(&self) -> &Arc<AcpAgent> {
        &self.agent
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    // ------------------------------------------------------------------
    // Capability registration
    // ------------------------------------------------------------------

    pub async fn register_file_system(&self, provider: Arc<dyn FileSystemProvider>) {
        capabilities::register_file_system(self.agent.dispatcher(), provider).await;
        self.capabilities.lock().await.fs = true;
    }

    pub async fn register_terminal(&self, provider: Arc<dyn TerminalProvider>) {
        capabilities::register_terminal(self.agent.dispatcher(), provider).await;
        self.capabilities.lock().await.terminal = true;
    }

    pub async fn register_language_service(&self, provider: Arc<dyn LanguageService>) {
        capabilities::register_language_service(self.agent.dispatcher(), provider).await;
        self.capabilities.lock().await.lsp = true;
    }

    pub async fn register_permission_rules(&self, provider: Arc<dyn PermissionRuleStore>) {
        capabilities::register_permission_rules(self.agent.dispatcher(), provider).await;
        self.capabilities.lock().await.permission_rules = true;
    }

    /// Register a handler for any other agent-initiated method.
    pub async fn register_handler(&self, method: &str, handler: Arc<dyn RequestHandler>) {
        self.agent.dispatcher().register_handler(method, handler).await;
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    pub async fn subscribe_session_updates(&self) -> Subscription<SessionUpdateEvent> {
        self.agent.router().subscribe_session_updates().await
    }

    pub async fn subscribe_session_complete(&self) -> Subscription<SessionCompleteEvent> {
        self.agent.router().subscribe_session_complete().await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.agent.router().unsubscribe(id).await
    }

    // ------------------------------------------------------------------
    // Host → agent calls
    // ------------------------------------------------------------------

    async fn call(&self, method: &str, params: Value) -> Result<Value, ApiError> {
        self.agent.call(method, params).await
    }

    async fn require_session_id(&self) -> Result<SessionId, ApiError> {
        self.sessions
            .current_session()
            .await
            .map(|session| session.id)
            .ok_or(ApiError::NoActiveSession)
    }

    /// `{ sessionId?, ...fields }` with the current session when there is one.
    async fn with_current_session(&self, fields: Value) -> Value {
        let mut params = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(session) = self.sessions.current_session().await {
            params.insert("sessionId".to_string(), json!(session.id));
        }
        Value::Object(params)
    }

    /// Handshake: protocol version, registered capabilities and client info.
    ///
    /// Returns the agent's initialize result as-is.
    pub async fn initialize(&self) -> Result<Value, ApiError> {
        let registered = *self.capabilities.lock().await;
        let params = json!({
            "protocolVersion": self.config.protocol_version,
            "clientCapabilities": {
                "fs": {
                    "readTextFile": registered.fs,
                    "writeTextFile": registered.fs,
                },
                "terminal": registered.terminal,
                "lsp": registered.lsp,
                "permissionRules": registered.permission_rules,
            },
            "clientInfo": {
                "name": self.config.client_name,
                "version": self.config.client_version,
            },
        });

        log::info!(
            "Initializing agent: protocol_version={}, capabilities={registered:?}",
            self.config.protocol_version
        );
        self.call(METHOD_INITIALIZE, params).await
    }

    pub async fn new_session(
        &self,
        title: Option<String>,
        options: SessionOptions,
    ) -> Result<Session, ApiError> {
        self.sessions.new_session(title, options).await
    }

    pub async fn resume_session(
        &self,
        session_id: &str,
        options: ResumeOptions,
    ) -> Result<Session, ApiError> {
        self.sessions.resume_session(session_id, options).await
    }

    pub async fn switch_session(&self, session_id: &str) -> Result<Session, ApiError> {
        self.sessions.switch_session(session_id).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        self.sessions.delete_session(session_id).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, ApiError> {
        self.sessions.list_sessions().await
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.sessions.current_session().await
    }

    pub async fn prompt(&self, text: &str) -> Result<PromptOutcome, ApiError> {
        self.sessions.prompt(text).await
    }

    pub async fn prompt_persistent(&self, text: &str) -> Result<PromptOutcome, ApiError> {
        self.sessions.prompt_persistent(text).await
    }

    pub async fn change_settings(&self, patch: DesiredSettings) -> Result<(), ApiError> {
        self.sessions.change_settings(patch).await
    }

    /// Current permission/plan mode of the current session.
    pub async fn mode_status(&self) -> Result<Value, ApiError> {
        let session_id = self.require_session_id().await?;
        self.call(METHOD_SESSION_MODE_STATUS, json!({ "sessionId": session_id }))
            .await
    }

    /// Cancel the running turn of the current session.
    pub async fn cancel(&self) -> Result<(), ApiError> {
        let session_id = self.require_session_id().await?;
        log::info!("Canceling turn: session_id={session_id}");
        self.call(METHOD_SESSION_CANCEL, json!({ "sessionId": session_id }))
            .await?;
        Ok(())
    }

    /// Answer a tool call the agent asked the user to confirm.
    pub async fn confirm_tool_call(
        &self,
        tool_call_id: &str,
        decision: PermissionDecision,
    ) -> Result<Value, ApiError> {
        let params = self
            .with_current_session(json!({ "toolCallId": tool_call_id, "decision": decision }))
            .await;
        self.call(METHOD_TOOL_CALL_CONFIRM, params).await
    }

    /// Keep a file change the agent proposed.
    pub async fn accept_file(&self, path: &str) -> Result<Value, ApiError> {
        let params = self.with_current_session(json!({ "path": path })).await;
        self.call(METHOD_FILE_ACCEPT, params).await
    }

    /// Revert a file change the agent proposed.
    pub async fn reject_file(&self, path: &str) -> Result<Value, ApiError> {
        let params = self.with_current_session(json!({ "path": path })).await;
        self.call(METHOD_FILE_REJECT, params).await
    }

    pub async fn list_history(&self) -> Result<Value, ApiError> {
        self.call(METHOD_HISTORY_LIST, json!({})).await
    }

    pub async fn load_history(&self, session_id: &str) -> Result<Value, ApiError> {
        self.call(METHOD_HISTORY_LOAD, json!({ "sessionId": session_id }))
            .await
    }

    pub async fn delete_history(&self, session_id: &str) -> Result<Value, ApiError> {
        self.call(METHOD_HISTORY_DELETE, json!({ "sessionId": session_id }))
            .await
    }

    /// Stop the bridge: reject pending calls, drop handlers and subscribers,
    /// close the agent's stdin and forget the current session.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) -> Result<(), ApiError> {
        self.agent.shutdown().await?;
        self.sessions.clear().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{ReadTextFileRequest, SessionUpdateKind, WriteTextFileRequest};
    use async_trait::async_trait;
    use tokio::io::{
        duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf,
        WriteHalf,
    };

    struct FakeAgent {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeAgent {
        async fn recv(&mut self) -> Value {
            let line = self
                .lines
                .next_line()
                .await
                .expect("read from host")
                .expect("host stream open");
            serde_json::from_str(&line).expect("host wrote JSON")
        }

        async fn send(&mut self, value: Value) {
            let mut line = value.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.flush().await.unwrap();
        }

        /// Receive the next request and answer it with `result`.
        async fn answer(&mut self, method: &str, result: Value) -> Value {
            let request = self.recv().await;
            assert_eq!(request["method"], method);
            self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
                .await;
            request
        }
    }

    fn bridge_pair() -> (Arc<AgentBridge>, FakeAgent) {
        let (host_stream, agent_stream) = duplex(64 * 1024);
        let (host_read, host_write) = split(host_stream);
        let (agent_read, agent_write) = split(agent_stream);

        let bridge = AgentBridge::connect(host_read, host_write, BridgeConfig::default());
        let agent = FakeAgent {
            lines: BufReader::new(agent_read).lines(),
            writer: agent_write,
        };
        (Arc::new(bridge), agent)
    }

    struct StaticFs;

    #[async_trait]
    impl FileSystemProvider for StaticFs {
        async fn read_text_file(&self, request: ReadTextFileRequest) -> Result<String, ApiError> {
            Ok(format!("// {}", request.path))
        }

        async fn write_text_file(&self, _request: WriteTextFileRequest) -> Result<(), ApiError> {
            Err(ApiError::invalid("read-only workspace"))
        }
    }

    #[tokio::test]
    async fn test_initialize_advertises_registered_capabilities() {
        let (bridge, mut agent) = bridge_pair();
        bridge.register_file_system(Arc::new(StaticFs)).await;

        let call = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.initialize().await })
        };
        let request = agent
            .answer(METHOD_INITIALIZE, json!({"protocolVersion": 1}))
            .await;

        assert_eq!(request["params"]["protocolVersion"], 1);
        assert_eq!(request["params"]["clientCapabilities"]["fs"]["readTextFile"], true);
        assert_eq!(request["params"]["clientCapabilities"]["terminal"], false);
        assert_eq!(request["params"]["clientInfo"]["name"], "acp-bridge");
        assert_eq!(call.await.unwrap().unwrap(), json!({"protocolVersion": 1}));
    }

    #[tokio::test]
    async fn test_prompt_end_to_end_with_callback_and_updates() {
        let (bridge, mut agent) = bridge_pair();
        bridge.register_file_system(Arc::new(StaticFs)).await;
        let mut updates = bridge.subscribe_session_updates().await;

        let prompt = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.prompt("explain lib.rs").await })
        };

        agent.answer(METHOD_SESSION_NEW, json!({"sessionId": "s1"})).await;
        let request = agent.recv().await;
        assert_eq!(request["method"], METHOD_SESSION_PROMPT);
        assert_eq!(request["params"]["sessionId"], "s1");

        // Mid-turn the agent reads a file and streams text
        agent
            .send(json!({
                "jsonrpc": "2.0",
                "id": "fs-1",
                "method": METHOD_FS_READ_TEXT_FILE,
                "params": {"sessionId": "s1", "path": "lib.rs"}
            }))
            .await;
        let fs_reply = agent.recv().await;
        assert_eq!(fs_reply["id"], "fs-1");
        assert_eq!(fs_reply["result"], json!({"content": "// lib.rs"}));

        agent
            .send(json!({
                "jsonrpc": "2.0",
                "method": METHOD_SESSION_UPDATE,
                "params": {"sessionId": "s1", "update": {"type": "text", "text": "It is..."}}
            }))
            .await;
        let update = updates.recv().await.unwrap();
        assert_eq!(update.kind, SessionUpdateKind::Text);

        agent
            .send(json!({"jsonrpc": "2.0", "id": request["id"], "result": {"stopReason": "end_turn"}}))
            .await;

        let outcome = prompt.await.unwrap().unwrap();
        assert_eq!(outcome.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(bridge.current_session().await.unwrap().id, "s1");
    }

    #[tokio::test]
    async fn test_handler_failure_reported_as_internal_error() {
        let (bridge, mut agent) = bridge_pair();
        bridge.register_file_system(Arc::new(StaticFs)).await;

        agent
            .send(json!({
                "jsonrpc": "2.0",
                "id": 5,
                "method": METHOD_FS_WRITE_TEXT_FILE,
                "params": {"path": "a.txt", "content": "x"}
            }))
            .await;

        let reply = agent.recv().await;
        assert_eq!(reply["id"], 5);
        assert_eq!(reply["error"]["code"], -32603);
        assert_eq!(reply["error"]["message"], "Invalid input: read-only workspace");
    }

    #[tokio::test]
    async fn test_session_scoped_calls_need_a_session() {
        let (bridge, _agent) = bridge_pair();
        assert!(matches!(bridge.cancel().await, Err(ApiError::NoActiveSession)));
        assert!(matches!(bridge.mode_status().await, Err(ApiError::NoActiveSession)));
    }

    #[tokio::test]
    async fn test_confirm_tool_call_carries_current_session() {
        let (bridge, mut agent) = bridge_pair();

        let switch = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.switch_session("s7").await })
        };
        agent.answer(METHOD_SESSION_SWITCH, Value::Null).await;
        switch.await.unwrap().unwrap();

        let confirm = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .confirm_tool_call("tool-1", PermissionDecision::AllowOnce)
                    .await
            })
        };
        let request = agent.answer(METHOD_TOOL_CALL_CONFIRM, json!({})).await;
        confirm.await.unwrap().unwrap();

        assert_eq!(
            request["params"],
            json!({"sessionId": "s7", "toolCallId": "tool-1", "decision": "allowOnce"})
        );
    }

    #[tokio::test]
    async fn test_shutdown_rejects_pending_and_clears_session() {
        let (bridge, mut agent) = bridge_pair();

        let switch = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.switch_session("s1").await })
        };
        agent.answer(METHOD_SESSION_SWITCH, Value::Null).await;
        switch.await.unwrap().unwrap();

        let history = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.list_history().await })
        };
        let _ = agent.recv().await;

        bridge.shutdown().await.unwrap();

        assert!(matches!(
            history.await.unwrap(),
            Err(ApiError::Shutdown { method }) if method == METHOD_HISTORY_LIST
        ));
        assert!(bridge.current_session().await.is_none());
        bridge.shutdown().await.unwrap();
    }
}
