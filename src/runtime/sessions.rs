//! SessionManager - tracks the one current session and wraps the session
//! lifecycle calls.
//!
//! # State
//!
//! At most one `Session` is current. Create and resume make the returned
//! session current and flush desired settings; switch makes a placeholder
//! current; deleting the current session clears it. Prompting without a
//! current session creates one first.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use super::settings::SettingsSynchronizer;
use crate::api::types::{
    ApiError, DesiredSettings, PromptOutcome, ResumeOptions, Session, SessionId, SessionOptions,
};
use crate::protocols::acp::methods::{
    METHOD_SESSION_DELETE, METHOD_SESSION_LIST, METHOD_SESSION_NEW, METHOD_SESSION_PROMPT,
    METHOD_SESSION_PROMPT_PERSISTENT, METHOD_SESSION_RESUME, METHOD_SESSION_SWITCH,
};
use crate::protocols::acp::params::extract_string;
use crate::protocols::acp::update_mapping::extract_stop_reason;
use crate::protocols::agent_connection::AgentConnection;

/// Turn a session call result into a `Session`.
///
/// Agents answer with a full session record, an object carrying only the
/// id, or the bare id string. Missing records get a placeholder.
pub fn parse_session_result(result: Value, title: Option<String>) -> Result<Session, ApiError> {
    if let Value::String(id) = result {
        return Ok(Session::placeholder(id, title));
    }

    if let Some(session) = result.get("session") {
        return parse_session_result(session.clone(), title);
    }

    if let Ok(session) = serde_json::from_value::<Session>(result.clone()) {
        return Ok(session);
    }

    extract_string(&result, &["id", "sessionId", "session_id"])
        .map(|id| {
            let title = extract_string(&result, &["title"]).or(title);
            Session::placeholder(id, title)
        })
        .ok_or_else(|| ApiError::ProtocolError {
            message: format!("Session result has no id: {result}"),
        })
}

fn session_list(result: Value) -> Vec<Session> {
    let items = match result {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("sessions") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| match parse_session_result(item, None) {
            Ok(session) => Some(session),
            Err(e) => {
                log::warn!("Skipping unreadable session list entry: {e}");
                None
            }
        })
        .collect()
}

fn insert_session_options(
    params: &mut Map<String, Value>,
    title: Option<&str>,
    cwd: Option<&str>,
    mcp_servers: &[Value],
) {
    if let Some(title) = title {
        params.insert("title".to_string(), json!(title));
    }
    if let Some(cwd) = cwd {
        params.insert("cwd".to_string(), json!(cwd));
    }
    params.insert("mcpServers".to_string(), Value::Array(mcp_servers.to_vec()));
}

pub struct SessionManager {
    connection: Arc<dyn AgentConnection>,
    settings: SettingsSynchronizer,
    current: Mutex<Option<Session>>,
    /// Options used when a prompt has to create the session itself
    default_options: SessionOptions,
    /// Serializes lazy creation so concurrent prompts share one session
    lazy_create: Mutex<()>,
}

impl SessionManager {
    pub fn new(connection: Arc<dyn AgentConnection>, default_options: SessionOptions) -> Self {
        Self {
            settings: SettingsSynchronizer::new(connection.clone()),
            connection,
            current: Mutex::new(None),
            default_options,
            lazy_create: Mutex::new(()),
        }
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.current.lock().await.clone()
    }

    async fn current_session_id(&self) -> Option<SessionId> {
        self.current.lock().await.as_ref().map(|session| session.id.clone())
    }

    async fn set_current(&self, session: Session) {
        log::info!("Current session: id={}, title={}", session.id, session.title);
        *self.current.lock().await = Some(session);
    }

    /// Forget the current session (used on shutdown).
    pub async fn clear(&self) {
        *self.current.lock().await = None;
    }

    /// Create a session, make it current and apply desired settings.
    pub async fn new_session(
        &self,
        title: Option<String>,
        options: SessionOptions,
    ) -> Result<Session, ApiError> {
        let mut params = Map::new();
        insert_session_options(
            &mut params,
            title.as_deref(),
            options.cwd.as_deref(),
            &options.mcp_servers,
        );

        let result = self
            .connection
            .call(METHOD_SESSION_NEW, Value::Object(params))
            .await?;
        let session = parse_session_result(result, title)?;

        self.set_current(session.clone()).await;
        self.settings.sync_desired_settings(&session.id).await?;
        Ok(session)
    }

    /// Resume an agent-side session by id, make it current and apply desired settings.
    pub async fn resume_session(
        &self,
        session_id: &str,
        options: ResumeOptions,
    ) -> Result<Session, ApiError> {
        let mut params = Map::new();
        params.insert("sessionId".to_string(), json!(session_id));
        insert_session_options(
            &mut params,
            options.title.as_deref(),
            options.cwd.as_deref(),
            &options.mcp_servers,
        );

        let result = self
            .connection
            .call(METHOD_SESSION_RESUME, Value::Object(params))
            .await?;

        // Some agents answer resume with an empty result
        let result = if result.is_null() {
            Value::String(session_id.to_string())
        } else {
            result
        };
        let session = parse_session_result(result, options.title)?;

        self.set_current(session.clone()).await;
        self.settings.sync_desired_settings(&session.id).await?;
        Ok(session)
    }

    /// Switch the agent to `session_id`.
    ///
    /// The current session becomes a placeholder carrying only the id; the
    /// full record is not re-fetched.
    pub async fn switch_session(&self, session_id: &str) -> Result<Session, ApiError> {
        self.connection
            .call(METHOD_SESSION_SWITCH, json!({ "sessionId": session_id }))
            .await?;

        let session = Session::placeholder(session_id.to_string(), None);
        self.set_current(session.clone()).await;
        Ok(session)
    }

    /// Delete a session; clears the current session if it was the one deleted.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        self.connection
            .call(METHOD_SESSION_DELETE, json!({ "sessionId": session_id }))
            .await?;

        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|session| session.id == session_id) {
            log::info!("Deleted current session: id={session_id}");
            *current = None;
        }
        Ok(())
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, ApiError> {
        let result = self.connection.call(METHOD_SESSION_LIST, json!({})).await?;
        Ok(session_list(result))
    }

    /// Merge a settings patch; applied now if a session is current, later otherwise.
    pub async fn change_settings(&self, patch: DesiredSettings) -> Result<(), ApiError> {
        let session_id = self.current_session_id().await;
        self.settings
            .change_settings(patch, session_id.as_deref())
            .await
    }

    /// Resend desired settings to the current session, if any.
    pub async fn sync_desired_settings(&self) -> Result<bool, ApiError> {
        match self.current_session_id().await {
            Some(session_id) => self.settings.sync_desired_settings(&session_id).await,
            None => Ok(false),
        }
    }

    pub async fn desired_settings(&self) -> DesiredSettings {
        self.settings.desired().await
    }

    /// Id of the session a prompt should go to, creating one if needed.
    async fn prepare_prompt(&self) -> Result<SessionId, ApiError> {
        let _guard = self.lazy_create.lock().await;

        match self.current_session_id().await {
            Some(session_id) => {
                self.settings.sync_desired_settings(&session_id).await?;
                Ok(session_id)
            }
            None => {
                log::info!("No current session, creating one for prompt");
                let session = self
                    .new_session(None, self.default_options.clone())
                    .await?;
                Ok(session.id)
            }
        }
    }

    async fn send_prompt(&self, method: &str, text: &str) -> Result<PromptOutcome, ApiError> {
        let session_id = self.prepare_prompt().await?;
        let params = json!({
            "sessionId": session_id,
            "prompt": [{ "type": "text", "text": text }],
        });

        log::debug!("Sending prompt: method={method}, session_id={session_id}, len={}", text.len());
        let result = self.connection.call(method, params).await?;

        Ok(PromptOutcome {
            session_id,
            stop_reason: extract_stop_reason(&result),
            result,
        })
    }

    /// One-shot prompt against the current session.
    pub async fn prompt(&self, text: &str) -> Result<PromptOutcome, ApiError> {
        self.send_prompt(METHOD_SESSION_PROMPT, text).await
    }

    /// Prompt into the agent's long-lived conversation for the current session.
    pub async fn prompt_persistent(&self, text: &str) -> Result<PromptOutcome, ApiError> {
        self.send_prompt(METHOD_SESSION_PROMPT_PERSISTENT, text).await
    }
}
