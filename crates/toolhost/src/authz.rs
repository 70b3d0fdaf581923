//! Tool authorization and redaction.
//!
//! Decision order: denylist, allowlist, always-approval, conditional
//! approval patterns, dangerous-token heuristic. Denylist wins over
//! allowlist; an empty allowlist and denylist allow everything.

use serde_json::Value;

use arb_domain::config::ToolRuleConfig;

/// Literal substituted for redacted values and outputs.
pub const REDACTED: &str = "[REDACTED]";

/// Tokens that force a consent checkpoint when found in a tool name or in
/// a scalar argument value (case-insensitive substring).
const DANGEROUS_TOKENS: &[&str] = &[
    "delete", "remove", "rm -rf", "sudo", "format", "drop", "truncate",
];

/// The outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Allowed,
    Denied { reason: String },
    NeedsConsent { reason: String },
}

fn pattern_matches<'a>(patterns: &'a [String], name: &str) -> Option<&'a str> {
    for pattern in patterns {
        match regex::Regex::new(pattern) {
            Ok(re) => {
                if re.is_match(name) {
                    return Some(pattern);
                }
            }
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "skipping invalid tool pattern");
            }
        }
    }
    None
}

/// Allow/deny filtering only — used to build the catalog sent to the model.
pub fn list_allows(tool_name: &str, rule: &ToolRuleConfig) -> bool {
    if pattern_matches(&rule.denylist, tool_name).is_some() {
        return false;
    }
    if !rule.allowlist.is_empty() && pattern_matches(&rule.allowlist, tool_name).is_none() {
        return false;
    }
    true
}

/// Full authorization check for an invocation.
pub fn authorize(tool_name: &str, arguments: &Value, rule: &ToolRuleConfig) -> Authorization {
    // 1. Denylist wins over everything.
    if let Some(pattern) = pattern_matches(&rule.denylist, tool_name) {
        return Authorization::Denied {
            reason: format!("denied by pattern '{pattern}'"),
        };
    }

    // 2. Non-empty allowlist with no match.
    if !rule.allowlist.is_empty() && pattern_matches(&rule.allowlist, tool_name).is_none() {
        return Authorization::Denied {
            reason: "not in allowlist".into(),
        };
    }

    // 3. Unconditional approval.
    if rule.requires_approval.always {
        return Authorization::NeedsConsent {
            reason: "always requires user consent".into(),
        };
    }

    // 4. Conditional approval patterns.
    if let Some(pattern) = pattern_matches(&rule.requires_approval.conditional, tool_name) {
        return Authorization::NeedsConsent {
            reason: format!("requires approval due to pattern '{pattern}'"),
        };
    }

    // 5. Dangerous-token heuristic over the name and argument leaves.
    if let Some(token) = dangerous_token(tool_name, arguments) {
        return Authorization::NeedsConsent {
            reason: format!("dangerous operations detected ('{token}')"),
        };
    }

    Authorization::Allowed
}

fn contains_token(text: &str) -> Option<&'static str> {
    let lower = text.to_ascii_lowercase();
    DANGEROUS_TOKENS.iter().find(|t| lower.contains(**t)).copied()
}

fn scalar_token(value: &Value) -> Option<&'static str> {
    match value {
        Value::String(s) => contains_token(s),
        Value::Number(n) => contains_token(&n.to_string()),
        Value::Bool(_) | Value::Null => None,
        _ => None,
    }
}

/// Scan the tool name and the argument tree one level deep over scalar
/// leaves for dangerous tokens.
fn dangerous_token(tool_name: &str, arguments: &Value) -> Option<&'static str> {
    if let Some(token) = contains_token(tool_name) {
        return Some(token);
    }

    let top: Vec<&Value> = match arguments {
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    for value in top {
        if let Some(token) = scalar_token(value) {
            return Some(token);
        }
        // One level into nested containers.
        let children: Vec<&Value> = match value {
            Value::Object(map) => map.values().collect(),
            Value::Array(items) => items.iter().collect(),
            _ => continue,
        };
        for child in children {
            if let Some(token) = scalar_token(child) {
                return Some(token);
            }
        }
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Redaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mask the values of named argument keys for event/log payloads. The
/// subprocess still receives the originals; only observability copies go
/// through this.
pub fn redact_arguments(arguments: &Value, names: &[String]) -> Value {
    if names.is_empty() {
        return arguments.clone();
    }
    redact_value(arguments, names)
}

fn redact_value(value: &Value, names: &[String]) -> Value {
    match value {
        Value::Object(map) => {
            let redacted = map
                .iter()
                .map(|(k, v)| {
                    if names.iter().any(|n| n.eq_ignore_ascii_case(k)) {
                        (k.clone(), Value::String(REDACTED.into()))
                    } else {
                        (k.clone(), redact_value(v, names))
                    }
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| redact_value(v, names)).collect())
        }
        other => other.clone(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
