//! SettingsSynchronizer - keeps the agent's session settings in step with
//! what the host asked for.
//!
//! The host may change settings at any time, including before any session
//! exists. Changes accumulate in one `DesiredSettings` patch that lives as
//! long as the bridge and is resent whenever a session becomes current.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::api::types::{ApiError, DesiredSettings};
use crate::protocols::acp::methods::METHOD_SESSION_SET_SETTINGS;
use crate::protocols::agent_connection::AgentConnection;

/// Build `session/set_settings` params: `{ sessionId, ...settings }`.
pub fn settings_params(session_id: &str, settings: &DesiredSettings) -> Result<Value, ApiError> {
    let mut params = serde_json::to_value(settings).map_err(|e| ApiError::ProtocolError {
        message: format!("Failed to serialize settings: {e}"),
    })?;
    if let Value::Object(map) = &mut params {
        map.insert("sessionId".to_string(), Value::String(session_id.to_string()));
    }
    Ok(params)
}

pub struct SettingsSynchronizer {
    connection: Arc<dyn AgentConnection>,
    desired: Mutex<DesiredSettings>,
}

impl SettingsSynchronizer {
    pub fn new(connection: Arc<dyn AgentConnection>) -> Self {
        Self {
            connection,
            desired: Mutex::new(DesiredSettings::default()),
        }
    }

    pub async fn desired(&self) -> DesiredSettings {
        self.desired.lock().await.clone()
    }

    /// Merge `patch` into the desired settings.
    ///
    /// With a current session the merged settings are sent right away;
    /// without one nothing is sent until a session becomes current.
    pub async fn change_settings(
        &self,
        patch: DesiredSettings,
        current_session_id: Option<&str>,
    ) -> Result<(), ApiError> {
        let merged = {
            let mut desired = self.desired.lock().await;
            desired.merge(patch);
            desired.clone()
        };

        match current_session_id {
            Some(session_id) => self.send(session_id, &merged).await,
            None => {
                log::debug!("No current session, deferring settings: {merged:?}");
                Ok(())
            }
        }
    }

    /// Send the full desired settings to `session_id`, unless nothing was ever set.
    ///
    /// Returns whether a call was made. The desired settings are kept after
    /// the flush so the next session gets them too.
    pub async fn sync_desired_settings(&self, session_id: &str) -> Result<bool, ApiError> {
        let desired = self.desired().await;
        if desired.is_empty() {
            return Ok(false);
        }
        self.send(session_id, &desired).await?;
        Ok(true)
    }

    async fn send(&self, session_id: &str, settings: &DesiredSettings) -> Result<(), ApiError> {
        log::debug!("Applying settings: session_id={session_id}, settings={settings:?}");
        let params = settings_params(session_id, settings)?;
        self.connection
            .call(METHOD_SESSION_SET_SETTINGS, params)
            .await?;
        Ok(())
    }
}
