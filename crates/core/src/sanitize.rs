//! Redaction of failure reasons before they are stored on a job.
//!
//! Engine errors routinely embed local paths, URLs with credentials and
//! `key=value` secrets. Anything stored in a job's `error` field is served
//! to remote clients, so it passes through [`sanitize_reason`] first.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum length (in characters) of a stored failure reason.
pub const MAX_REASON_LEN: usize = 240;

/// Reason used when the input is empty after redaction.
pub const FALLBACK_REASON: &str = "Generation failed";

const PATH_PLACEHOLDER: &str = "<path>";

static URL_CREDENTIALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z][a-z0-9+.\-]*://)[^/\s:@]+:[^/\s@]+@").expect("valid regex")
});

static KEY_VALUE_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(api[_-]?key|access[_-]?token|auth[_-]?token|token|secret|password|passwd)(\s*[:=]\s*)[^\s,;&"']+"#,
    )
    .expect("valid regex")
});

static WINDOWS_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\b[A-Za-z]:\\[^\s'",;:)]+"#).expect("valid regex"));

static UNIX_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(^|[\s'"(=])/[^\s'",;:)]+"#).expect("valid regex"));

/// Redact secrets and local paths, collapse whitespace, and truncate.
///
/// Never returns an empty string.
pub fn sanitize_reason(raw: &str) -> String {
    let text = URL_CREDENTIALS.replace_all(raw, "${1}<redacted>@");
    let text = KEY_VALUE_SECRET.replace_all(&text, "${1}${2}<redacted>");
    let text = WINDOWS_PATH.replace_all(&text, PATH_PLACEHOLDER);
    let text = UNIX_PATH.replace_all(&text, format!("${{1}}{PATH_PLACEHOLDER}").as_str());

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return FALLBACK_REASON.to_string();
    }

    truncate_chars(&collapsed, MAX_REASON_LEN)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
