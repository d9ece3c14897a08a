//! PermissionRuleBook - stored allow/deny/ask rules for agent tool use.
//!
//! Backs the `permission_rules/*` capabilities. Rules are kept in memory and,
//! when the book was opened from a file, written back after every change.
//!
//! # Evaluation
//!
//! `evaluate(tool, subject)` looks at the rules for `tool` whose pattern
//! matches `subject` (a rule without a pattern matches everything). `Deny`
//! beats `Ask`, which beats `Allow`. No matching rule means `Ask`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::types::{
    ApiError, NewPermissionRule, PermissionRule, PermissionRulePatch, RuleDecision, RuleId,
};
use crate::protocols::host::PermissionRuleStore;

/// A rule with its pattern compiled.
struct CompiledRule {
    rule: PermissionRule,
    pattern: Option<Regex>,
}

impl CompiledRule {
    fn new(rule: PermissionRule) -> Result<Self, ApiError> {
        let pattern = rule.pattern.as_deref().map(compile_pattern).transpose()?;
        Ok(Self { rule, pattern })
    }

    fn matches(&self, tool: &str, subject: &str) -> bool {
        self.rule.tool == tool
            && self
                .pattern
                .as_ref()
                .is_none_or(|pattern| pattern.is_match(subject))
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, ApiError> {
    Regex::new(pattern).map_err(|e| ApiError::invalid(format!("Invalid rule pattern '{pattern}': {e}")))
}

fn validate_tool(tool: &str) -> Result<(), ApiError> {
    if tool.trim().is_empty() {
        return Err(ApiError::invalid("Rule tool cannot be empty"));
    }
    Ok(())
}

fn severity(decision: RuleDecision) -> u8 {
    match decision {
        RuleDecision::Allow => 0,
        RuleDecision::Ask => 1,
        RuleDecision::Deny => 2,
    }
}

pub struct PermissionRuleBook {
    rules: Mutex<Vec<CompiledRule>>,
    /// JSON file the rules are persisted to, if any
    store_path: Option<PathBuf>,
}

impl Default for PermissionRuleBook {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionRuleBook {
    /// An in-memory rule book.
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            store_path: None,
        }
    }

    /// Open a rule book persisted at `path`. A missing file starts empty.
    pub async fn open(path: &Path) -> Result<Self, ApiError> {
        let rules = match fs::read_to_string(path).await {
            Ok(text) => serde_json::from_str::<Vec<PermissionRule>>(&text).map_err(|e| {
                ApiError::invalid(format!(
                    "Invalid permission rules file '{}': {e}",
                    path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(ApiError::io(
                    &format!("Failed to read permission rules '{}'", path.display()),
                    e,
                ))
            }
        };

        let compiled = rules
            .into_iter()
            .map(CompiledRule::new)
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "Loaded permission rules: path={}, count={}",
            path.display(),
            compiled.len()
        );

        Ok(Self {
            rules: Mutex::new(compiled),
            store_path: Some(path.to_path_buf()),
        })
    }

    /// Decide what to do about `tool` acting on `subject`.
    pub async fn evaluate(&self, tool: &str, subject: &str) -> RuleDecision {
        self.rules
            .lock()
            .await
            .iter()
            .filter(|compiled| compiled.matches(tool, subject))
            .map(|compiled| compiled.rule.decision)
            .max_by_key(|decision| severity(*decision))
            .unwrap_or(RuleDecision::Ask)
    }

    async fn persist(&self, rules: &[CompiledRule]) -> Result<(), ApiError> {
        let Some(path) = &self.store_path else {
            return Ok(());
        };

        let snapshot: Vec<&PermissionRule> = rules.iter().map(|compiled| &compiled.rule).collect();
        let text = serde_json::to_string_pretty(&snapshot).map_err(|e| ApiError::ProtocolError {
            message: format!("Failed to serialize permission rules: {e}"),
        })?;

        fs::write(path, text).await.map_err(|e| {
            ApiError::io(
                &format!("Failed to write permission rules '{}'", path.display()),
                e,
            )
        })
    }
}

#[async_trait]
impl PermissionRuleStore for PermissionRuleBook {
    async fn list(&self) -> Result<Vec<PermissionRule>, ApiError> {
        Ok(self
            .rules
            .lock()
            .await
            .iter()
            .map(|compiled| compiled.rule.clone())
            .collect())
    }

    async fn add(&self, rule: NewPermissionRule) -> Result<PermissionRule, ApiError> {
        validate_tool(&rule.tool)?;
        let compiled = CompiledRule::new(PermissionRule {
            id: Uuid::new_v4().to_string(),
            tool: rule.tool,
            pattern: rule.pattern,
            decision: rule.decision,
        })?;
        let added = compiled.rule.clone();

        let mut rules = self.rules.lock().await;
        rules.push(compiled);
        if let Err(e) = self.persist(&rules).await {
            rules.pop();
            return Err(e);
        }

        log::info!(
            "Permission rule added: id={}, tool={}, decision={:?}",
            added.id,
            added.tool,
            added.decision
        );
        Ok(added)
    }

    async fn update(
        &self,
        rule_id: &str,
        patch: PermissionRulePatch,
    ) -> Result<PermissionRule, ApiError> {
        let mut rules = self.rules.lock().await;
        let index = rules
            .iter()
            .position(|compiled| compiled.rule.id == rule_id)
            .ok_or_else(|| ApiError::RuleNotFound {
                rule_id: rule_id.to_string(),
            })?;

        let mut updated = rules[index].rule.clone();
        if let Some(tool) = patch.tool {
            validate_tool(&tool)?;
            updated.tool = tool;
        }
        if let Some(pattern) = patch.pattern {
            updated.pattern = pattern;
        }
        if let Some(decision) = patch.decision {
            updated.decision = decision;
        }

        let previous = std::mem::replace(&mut rules[index], CompiledRule::new(updated.clone())?);
        if let Err(e) = self.persist(&rules).await {
            rules[index] = previous;
            return Err(e);
        }

        log::info!("Permission rule updated: id={rule_id}");
        Ok(updated)
    }

    async fn delete(&self, rule_id: &str) -> Result<RuleId, ApiError> {
        let mut rules = self.rules.lock().await;
        let index = rules
            .iter()
            .position(|compiled| compiled.rule.id == rule_id)
            .ok_or_else(|| ApiError::RuleNotFound {
                rule_id: rule_id.to_string(),
            })?;

        let removed = rules.remove(index);
        if let Err(e) = self.persist(&rules).await {
            rules.insert(index, removed);
            return Err(e);
        }

        log::info!("Permission rule deleted: id={rule_id}");
        Ok(removed.rule.id)
    }
}
