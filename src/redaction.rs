//! Secret scrubbing for command output
//!
//! Output from the OS tooling is scrubbed before it is stored in an
//! `OperationResult`, displayed, or logged.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static SECRET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(
            r#"(?i)\b(password|passwd|pwd|psk|pre-?shared ?key|secret|token|api[_-]?key)\b\s*[:=]\s*["']?([^\s"',;]+)["']?"#,
        )
        .expect("valid regex"),
        Regex::new(r#"(?i)(-(?:password|l2tppsk|sharedsecret)\s+)('[^']*'|"[^"]*"|\S+)"#).expect("valid regex"),
        Regex::new(r"\b([A-Fa-f0-9]{32,})\b").expect("valid regex"),
    ]
});

/// Outcome of scrubbing one piece of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionResult {
    pub content: String,
    pub redaction_count: usize,
}

/// Scrub anything resembling a credential from `input`
pub fn redact(input: &str) -> RedactionResult {
    if input.is_empty() {
        return RedactionResult {
            content: String::new(),
            redaction_count: 0,
        };
    }

    let mut result = input.to_string();
    let mut redaction_count = 0usize;

    for (index, pattern) in SECRET_PATTERNS.iter().enumerate() {
        let matches = pattern.find_iter(&result).count();
        if matches == 0 {
            continue;
        }

        redaction_count += matches;
        result = pattern
            .replace_all(&result, |caps: &Captures<'_>| match index {
                0 => format!(
                    "{}=[REDACTED]",
                    caps.get(1).map(|m| m.as_str()).unwrap_or("secret").to_ascii_lowercase()
                ),
                1 => format!("{}[REDACTED]", caps.get(1).map(|m| m.as_str()).unwrap_or_default()),
                _ => "[REDACTED]".to_string(),
            })
            .to_string();
    }

    RedactionResult {
        content: result,
        redaction_count,
    }
}

/// Convenience wrapper returning only the scrubbed text
pub fn scrub(input: &str) -> String {
    redact(input).content
}
