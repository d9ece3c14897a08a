use agent_client_protocol as acp;
use serde_json::Value;

use super::params::extract_session_id;
use crate::api::types::{SessionCompleteEvent, SessionUpdateEvent, SessionUpdateKind, UsageTotals};

/// Parse `session/update` params.
///
/// Accepts the bridge's own `type`-tagged updates and standard ACP
/// `sessionUpdate`-tagged ones. Either may be wrapped as
/// `{ sessionId, update }` or sent bare. The update object is kept as payload.
pub fn parse_session_update_params(params: Value) -> SessionUpdateEvent {
    let session_id = extract_session_id(&params);
    let update = params.get("update").cloned().unwrap_or_else(|| params.clone());

    if update.get("sessionUpdate").is_some() {
        return match serde_json::from_value::<acp::SessionNotification>(params.clone()) {
            Ok(notification) => SessionUpdateEvent {
                session_id: Some(notification.session_id.to_string()),
                kind: map_acp_update_kind(&notification.update),
                payload: update,
            },
            Err(_) => {
                let kind = match serde_json::from_value::<acp::SessionUpdate>(update.clone()) {
                    Ok(acp_update) => map_acp_update_kind(&acp_update),
                    Err(e) => {
                        log::debug!("Failed to parse ACP session update: {e}");
                        SessionUpdateKind::Unknown
                    }
                };
                SessionUpdateEvent {
                    session_id,
                    kind,
                    payload: update,
                }
            }
        };
    }

    let kind = update
        .get("type")
        .cloned()
        .and_then(|tag| serde_json::from_value::<SessionUpdateKind>(tag).ok())
        .unwrap_or(SessionUpdateKind::Unknown);

    SessionUpdateEvent {
        session_id,
        kind,
        payload: update,
    }
}

pub fn map_acp_update_kind(update: &acp::SessionUpdate) -> SessionUpdateKind {
    match update {
        acp::SessionUpdate::UserMessageChunk(_) => SessionUpdateKind::Message,
        acp::SessionUpdate::AgentMessageChunk(_) => SessionUpdateKind::Text,
        acp::SessionUpdate::AgentThoughtChunk(_) => SessionUpdateKind::Thought,
        acp::SessionUpdate::ToolCall(_) => SessionUpdateKind::ToolUse,
        acp::SessionUpdate::ToolCallUpdate(_) => SessionUpdateKind::ToolResult,
        acp::SessionUpdate::Plan(_) => SessionUpdateKind::TaskList,
        _ => SessionUpdateKind::Unknown,
    }
}

/// Parse `session/complete` params. Usage totals are optional.
pub fn parse_session_complete_params(params: Value) -> SessionCompleteEvent {
    let session_id = extract_session_id(&params);
    let usage = params
        .get("usage")
        .cloned()
        .and_then(|usage| match serde_json::from_value::<UsageTotals>(usage) {
            Ok(usage) => Some(usage),
            Err(e) => {
                log::debug!("Failed to parse session usage totals: {e}");
                None
            }
        });

    SessionCompleteEvent {
        session_id,
        usage,
        payload: params,
    }
}

/// Pull the stop reason out of a prompt result.
pub fn extract_stop_reason(result: &Value) -> Option<String> {
    let raw = result
        .get("stopReason")
        .or_else(|| result.get("stop_reason"))
        .cloned()?;

    let value = match serde_json::from_value::<acp::PromptResponse>(result.clone()) {
        Ok(prompt_response) => {
            serde_json::to_value(prompt_response.stop_reason).unwrap_or(raw)
        }
        Err(e) => {
            log::debug!("Failed to parse prompt response stopReason: {e}");
            raw
        }
    };

    value.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_native_update() {
        let params = json!({
            "sessionId": "session-1",
            "update": {"type": "tool_use", "toolName": "Bash", "input": {"command": "ls"}}
        });

        let event = parse_session_update_params(params);

        assert_eq!(event.session_id.as_deref(), Some("session-1"));
        assert_eq!(event.kind, SessionUpdateKind::ToolUse);
        assert_eq!(event.payload["toolName"], "Bash");
    }

    #[test]
    fn test_parse_bare_update_with_unknown_type() {
        let event = parse_session_update_params(json!({"type": "hologram", "data": 1}));

        assert!(event.session_id.is_none());
        assert_eq!(event.kind, SessionUpdateKind::Unknown);
        assert_eq!(event.payload, json!({"type": "hologram", "data": 1}));
    }

    #[test]
    fn test_parse_deprecated_kind() {
        let event = parse_session_update_params(json!({"update": {"type": "message", "text": "hi"}}));
        assert_eq!(event.kind, SessionUpdateKind::Message);
    }

    #[test]
    fn test_parse_acp_session_notification() {
        let update = acp::SessionUpdate::AgentMessageChunk(acp::ContentChunk::new(
            acp::ContentBlock::from("Hello"),
        ));
        let notification = acp::SessionNotification::new("session-1", update);
        let params = serde_json::to_value(notification).expect("serialize notification");

        let event = parse_session_update_params(params);

        assert_eq!(event.session_id.as_deref(), Some("session-1"));
        assert_eq!(event.kind, SessionUpdateKind::Text);
        assert_eq!(event.payload["content"], json!({"type": "text", "text": "Hello"}));
    }

    #[test]
    fn test_parse_acp_thought_chunk() {
        let update = acp::SessionUpdate::AgentThoughtChunk(acp::ContentChunk::new(
            acp::ContentBlock::from("Thinking"),
        ));
        let notification = acp::SessionNotification::new("session-2", update);
        let params = serde_json::to_value(notification).expect("serialize notification");

        assert_eq!(parse_session_update_params(params).kind, SessionUpdateKind::Thought);
    }

    #[test]
    fn test_parse_session_complete_with_usage() {
        let event = parse_session_complete_params(json!({
            "sessionId": "s",
            "usage": {"inputTokens": 120, "outputTokens": 45, "totalCostUsd": 0.01}
        }));

        let usage = event.usage.unwrap();
        assert_eq!(event.session_id.as_deref(), Some("s"));
        assert_eq!(usage.input_tokens, 120);
        assert_eq!(usage.output_tokens, 45);
        assert_eq!(usage.total_cost_usd, Some(0.01));
    }

    #[test]
    fn test_parse_session_complete_without_usage() {
        let event = parse_session_complete_params(json!({"sessionId": "s"}));
        assert!(event.usage.is_none());
    }

    #[test]
    fn test_extract_stop_reason() {
        assert_eq!(
            extract_stop_reason(&json!({"stopReason": "end_turn"})).as_deref(),
            Some("end_turn")
        );
        assert!(extract_stop_reason(&json!({"done": true})).is_none());
    }
}
