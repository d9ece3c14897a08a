//! Lenient field extraction for JSON-RPC params.
//!
//! Agents disagree on casing, so lookups take a list of alias keys and return
//! the first string found.

use serde_json::Value;

pub fn extract_string(params: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        params
            .get(*key)
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
    })
}

pub fn extract_u64(params: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter()
        .find_map(|key| params.get(*key).and_then(|value| value.as_u64()))
}

pub fn extract_session_id(params: &Value) -> Option<String> {
    extract_string(params, &["sessionId", "session_id"])
}

pub fn extract_path(params: &Value) -> Option<String> {
    extract_string(params, &["path", "filePath", "file_path"]).or_else(|| {
        params
            .get("details")
            .and_then(|details| extract_string(details, &["path", "filePath", "file_path"]))
    })
}

pub fn extract_content(params: &Value) -> Option<String> {
    extract_string(params, &["content", "text"]).or_else(|| {
        params
            .get("details")
            .and_then(|details| extract_string(details, &["content", "text"]))
    })
}

pub fn extract_command(params: &Value) -> Option<String> {
    extract_string(params, &["command", "commandString", "cmd"]).or_else(|| {
        params
            .get("details")
            .and_then(|details| extract_string(details, &["command", "commandString", "cmd"]))
    })
}

pub fn extract_terminal_id(params: &Value) -> Option<String> {
    extract_string(params, &["terminalId", "terminal_id"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_string_uses_first_alias_found() {
        let params = json!({"session_id": "s-1", "filePath": "a.rs"});

        assert_eq!(extract_session_id(&params).as_deref(), Some("s-1"));
        assert_eq!(extract_path(&params).as_deref(), Some("a.rs"));
        assert!(extract_content(&params).is_none());
    }

    #[test]
    fn test_extract_falls_back_to_details() {
        let params = json!({"details": {"cmd": "ls -la"}});
        assert_eq!(extract_command(&params).as_deref(), Some("ls -la"));
    }

    #[test]
    fn test_extract_u64_ignores_non_numbers() {
        let params = json!({"line": "3", "limit": 10});
        assert_eq!(extract_u64(&params, &["line"]), None);
        assert_eq!(extract_u64(&params, &["limit"]), Some(10));
    }
}
