//! Capability registration: installs host providers as inbound handlers.
//!
//! Each `register_*` function parses the agent's params (camelCase with
//! snake_case aliases), calls the provider and shapes the JSON result.

use std::sync::Arc;

use serde_json::{json, Value};

use super::dispatcher::{handler_fn, InboundDispatcher};
use super::methods::*;
use super::params::{
    extract_command, extract_content, extract_path, extract_session_id, extract_string,
    extract_terminal_id, extract_u64,
};
use crate::api::types::{
    ApiError, CreateTerminalRequest, NewPermissionRule, PermissionRulePatch, ReadTextFileRequest,
    SymbolQuery, WriteTextFileRequest,
};
use crate::protocols::host::{
    FileSystemProvider, LanguageService, PermissionRuleStore, TerminalProvider,
};

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::ProtocolError {
        message: format!("Failed to serialize result: {e}"),
    })
}

fn require_path(params: &Value) -> Result<String, ApiError> {
    extract_path(params).ok_or_else(|| ApiError::invalid("Missing path"))
}

fn require_terminal_id(params: &Value) -> Result<String, ApiError> {
    extract_terminal_id(params).ok_or_else(|| ApiError::invalid("Missing terminalId"))
}

fn optional_u32(params: &Value, keys: &[&str]) -> Result<Option<u32>, ApiError> {
    extract_u64(params, keys)
        .map(|value| {
            u32::try_from(value)
                .map_err(|_| ApiError::invalid(format!("{} is out of range: {value}", keys[0])))
        })
        .transpose()
}

// ============================================================================
// fs/*
// ============================================================================

pub(crate) fn parse_read_text_file(params: &Value) -> Result<ReadTextFileRequest, ApiError> {
    Ok(ReadTextFileRequest {
        session_id: extract_session_id(params),
        path: require_path(params)?,
        line: optional_u32(params, &["line"])?,
        limit: optional_u32(params, &["limit"])?,
    })
}

pub(crate) fn parse_write_text_file(params: &Value) -> Result<WriteTextFileRequest, ApiError> {
    Ok(WriteTextFileRequest {
        session_id: extract_session_id(params),
        path: require_path(params)?,
        content: extract_content(params).ok_or_else(|| ApiError::invalid("Missing content"))?,
    })
}

pub async fn register_file_system(
    dispatcher: &InboundDispatcher,
    provider: Arc<dyn FileSystemProvider>,
) {
    let fs = provider.clone();
    dispatcher
        .register_handler(
            METHOD_FS_READ_TEXT_FILE,
            handler_fn(move |params| {
                let fs = fs.clone();
                async move {
                    let request = parse_read_text_file(&params)?;
                    let content = fs.read_text_file(request).await?;
                    Ok(json!({ "content": content }))
                }
            }),
        )
        .await;

    let fs = provider;
    dispatcher
        .register_handler(
            METHOD_FS_WRITE_TEXT_FILE,
            handler_fn(move |params| {
                let fs = fs.clone();
                async move {
                    let request = parse_write_text_file(&params)?;
                    fs.write_text_file(request).await?;
                    Ok(json!({}))
                }
            }),
        )
        .await;
}

// ============================================================================
// terminal/*
// ============================================================================

/// Env may arrive as ACP's `[{name, value}]` list or as a plain object.
fn parse_env(params: &Value) -> Vec<(String, String)> {
    match params.get("env") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?;
                let value = item.get("value")?.as_str()?;
                Some((name.to_string(), value.to_string()))
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(name, value)| Some((name.clone(), value.as_str()?.to_string())))
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn parse_create_terminal(params: &Value) -> Result<CreateTerminalRequest, ApiError> {
    let command = extract_command(params)
        .filter(|command| !command.trim().is_empty())
        .ok_or_else(|| ApiError::invalid("Missing command"))?;

    let args = params
        .get("args")
        .and_then(|args| args.as_array())
        .map(|args| {
            args.iter()
                .filter_map(|arg| arg.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let output_byte_limit = extract_u64(params, &["outputByteLimit", "output_byte_limit"])
        .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX));

    Ok(CreateTerminalRequest {
        session_id: extract_session_id(params),
        command,
        args,
        env: parse_env(params),
        cwd: extract_string(params, &["cwd"]),
        output_byte_limit,
    })
}

pub async fn register_terminal(dispatcher: &InboundDispatcher, provider: Arc<dyn TerminalProvider>) {
    let terminals = provider.clone();
    dispatcher
        .register_handler(
            METHOD_TERMINAL_CREATE,
            handler_fn(move |params| {
                let terminals = terminals.clone();
                async move {
                    let request = parse_create_terminal(&params)?;
                    let terminal_id = terminals.create(request).await?;
                    Ok(json!({ "terminalId": terminal_id }))
                }
            }),
        )
        .await;

    let terminals = provider.clone();
    dispatcher
        .register_handler(
            METHOD_TERMINAL_OUTPUT,
            handler_fn(move |params| {
                let terminals = terminals.clone();
                async move {
                    let terminal_id = require_terminal_id(&params)?;
                    to_json(terminals.output(&terminal_id).await?)
                }
            }),
        )
        .await;

    let terminals = provider.clone();
    dispatcher
        .register_handler(
            METHOD_TERMINAL_WAIT_FOR_EXIT,
            handler_fn(move |params| {
                let terminals = terminals.clone();
                async move {
                    let terminal_id = require_terminal_id(&params)?;
                    to_json(terminals.wait_for_exit(&terminal_id).await?)
                }
            }),
        )
        .await;

    let terminals = provider.clone();
    dispatcher
        .register_handler(
            METHOD_TERMINAL_KILL,
            handler_fn(move |params| {
                let terminals = terminals.clone();
                async move {
                    let terminal_id = require_terminal_id(&params)?;
                    terminals.kill(&terminal_id).await?;
                    Ok(json!({}))
                }
            }),
        )
        .await;

    let terminals = provider;
    dispatcher
        .register_handler(
            METHOD_TERMINAL_RELEASE,
            handler_fn(move |params| {
                let terminals = terminals.clone();
                async move {
                    let terminal_id = require_terminal_id(&params)?;
                    terminals.release(&terminal_id).await?;
                    Ok(json!({}))
                }
            }),
        )
        .await;
}

// ============================================================================
// lsp/*
// ============================================================================

pub(crate) fn parse_symbol_query(params: &Value) -> Result<SymbolQuery, ApiError> {
    let position = params.get("position").unwrap_or(params);
    Ok(SymbolQuery {
        path: require_path(params)?,
        line: optional_u32(position, &["line"])?
            .ok_or_else(|| ApiError::invalid("Missing line"))?,
        character: optional_u32(position, &["character", "column"])?
            .ok_or_else(|| ApiError::invalid("Missing character"))?,
    })
}

pub async fn register_language_service(
    dispatcher: &InboundDispatcher,
    provider: Arc<dyn LanguageService>,
) {
    let lsp = provider.clone();
    dispatcher
        .register_handler(
            METHOD_LSP_DEFINITION,
            handler_fn(move |params| {
                let lsp = lsp.clone();
                async move { lsp.definition(parse_symbol_query(&params)?).await }
            }),
        )
        .await;

    let lsp = provider.clone();
    dispatcher
        .register_handler(
            METHOD_LSP_REFERENCES,
            handler_fn(move |params| {
                let lsp = lsp.clone();
                async move { lsp.references(parse_symbol_query(&params)?).await }
            }),
        )
        .await;

    let lsp = provider.clone();
    dispatcher
        .register_handler(
            METHOD_LSP_HOVER,
            handler_fn(move |params| {
                let lsp = lsp.clone();
                async move { lsp.hover(parse_symbol_query(&params)?).await }
            }),
        )
        .await;

    let lsp = provider;
    dispatcher
        .register_handler(
            METHOD_LSP_DIAGNOSTICS,
            handler_fn(move |params| {
                let lsp = lsp.clone();
                async move { lsp.diagnostics(&require_path(&params)?).await }
            }),
        )
        .await;
}

// ============================================================================
// permission_rules/*
// ============================================================================

fn require_rule_id(params: &Value) -> Result<String, ApiError> {
    extract_string(params, &["ruleId", "rule_id", "id"])
        .ok_or_else(|| ApiError::invalid("Missing ruleId"))
}

/// The rule body may be nested under `rule` or sent flat.
fn rule_body(params: &Value) -> Value {
    params.get("rule").cloned().unwrap_or_else(|| params.clone())
}

pub async fn register_permission_rules(
    dispatcher: &InboundDispatcher,
    provider: Arc<dyn PermissionRuleStore>,
) {
    let rules = provider.clone();
    dispatcher
        .register_handler(
            METHOD_PERMISSION_RULES_LIST,
            handler_fn(move |_params| {
                let rules = rules.clone();
                async move { Ok(json!({ "rules": to_json(rules.list().await?)? })) }
            }),
        )
        .await;

    let rules = provider.clone();
    dispatcher
        .register_handler(
            METHOD_PERMISSION_RULES_ADD,
            handler_fn(move |params| {
                let rules = rules.clone();
                async move {
                    let rule: NewPermissionRule = serde_json::from_value(rule_body(&params))
                        .map_err(|e| ApiError::invalid(format!("Invalid permission rule: {e}")))?;
                    Ok(json!({ "rule": to_json(rules.add(rule).await?)? }))
                }
            }),
        )
        .await;

    let rules = provider.clone();
    dispatcher
        .register_handler(
            METHOD_PERMISSION_RULES_UPDATE,
            handler_fn(move |params| {
                let rules = rules.clone();
                async move {
                    let rule_id = require_rule_id(&params)?;
                    let body = params
                        .get("patch")
                        .or_else(|| params.get("rule"))
                        .cloned()
                        .unwrap_or_else(|| params.clone());
                    let patch: PermissionRulePatch = serde_json::from_value(body)
                        .map_err(|e| ApiError::invalid(format!("Invalid permission rule patch: {e}")))?;
                    Ok(json!({ "rule": to_json(rules.update(&rule_id, patch).await?)? }))
                }
            }),
        )
        .await;

    let rules = provider;
    dispatcher
        .register_handler(
            METHOD_PERMISSION_RULES_DELETE,
            handler_fn(move |params| {
                let rules = rules.clone();
                async move {
                    let rule_id = require_rule_id(&params)?;
                    let deleted = rules.delete(&rule_id).await?;
                    Ok(json!({ "ruleId": deleted }))
                }
            }),
        )
        .await;
}
