//! Small helpers for actor, source and notification text

/// Longest reason kept in a conflict, a run's notification status or a
/// failure subject line.
const REASON_LIMIT: usize = 180;

/// Trimmed text, or `None` for a missing or blank value (actor, source label,
/// profile settings).
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Webhook endpoints must name an http(s) scheme.
pub fn is_http_url(value: &str) -> bool {
    let value = value.trim_start();
    ["http://", "https://"].iter().any(|scheme| {
        value.len() > scheme.len()
            && value
                .get(..scheme.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

/// One-line reason text capped at [`REASON_LIMIT`] characters.
pub fn compact_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(REASON_LIMIT)
        .collect()
}

/// Run and record timestamps are Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
