//! JSON-RPC method names spoken over the bridge.

// Host → agent

/// Handshake with protocol version and client info
pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_SESSION_NEW: &str = "session/new";
pub const METHOD_SESSION_RESUME: &str = "session/resume";
pub const METHOD_SESSION_LIST: &str = "session/list";
pub const METHOD_SESSION_SWITCH: &str = "session/switch";
pub const METHOD_SESSION_DELETE: &str = "session/delete";
/// One-shot prompt; the call settles when the turn ends
pub const METHOD_SESSION_PROMPT: &str = "session/prompt";
/// Prompt into a long-lived agent conversation
pub const METHOD_SESSION_PROMPT_PERSISTENT: &str = "session/prompt_persistent";
pub const METHOD_SESSION_SET_SETTINGS: &str = "session/set_settings";
pub const METHOD_SESSION_MODE_STATUS: &str = "session/mode_status";
pub const METHOD_SESSION_CANCEL: &str = "session/cancel";
pub const METHOD_TOOL_CALL_CONFIRM: &str = "tool_call/confirm";
pub const METHOD_FILE_ACCEPT: &str = "file/accept";
pub const METHOD_FILE_REJECT: &str = "file/reject";
pub const METHOD_HISTORY_LIST: &str = "history/list";
pub const METHOD_HISTORY_LOAD: &str = "history/load";
pub const METHOD_HISTORY_DELETE: &str = "history/delete";

// Agent → host

pub const METHOD_FS_READ_TEXT_FILE: &str = "fs/read_text_file";
pub const METHOD_FS_WRITE_TEXT_FILE: &str = "fs/write_text_file";
pub const METHOD_TERMINAL_CREATE: &str = "terminal/create";
pub const METHOD_TERMINAL_OUTPUT: &str = "terminal/output";
pub const METHOD_TERMINAL_WAIT_FOR_EXIT: &str = "terminal/wait_for_exit";
pub const METHOD_TERMINAL_KILL: &str = "terminal/kill";
pub const METHOD_TERMINAL_RELEASE: &str = "terminal/release";
pub const METHOD_LSP_DEFINITION: &str = "lsp/definition";
pub const METHOD_LSP_REFERENCES: &str = "lsp/references";
pub const METHOD_LSP_HOVER: &str = "lsp/hover";
pub const METHOD_LSP_DIAGNOSTICS: &str = "lsp/diagnostics";
pub const METHOD_PERMISSION_RULES_LIST: &str = "permission_rules/list";
pub const METHOD_PERMISSION_RULES_ADD: &str = "permission_rules/add";
pub const METHOD_PERMISSION_RULES_UPDATE: &str = "permission_rules/update";
pub const METHOD_PERMISSION_RULES_DELETE: &str = "permission_rules/delete";

// Agent → host notifications

/// Streaming session updates (thoughts, text, tool activity, diffs)
pub const METHOD_SESSION_UPDATE: &str = "session/update";
/// Turn completion with usage totals
pub const METHOD_SESSION_COMPLETE: &str = "session/complete";
