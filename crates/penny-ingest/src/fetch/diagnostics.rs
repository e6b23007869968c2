//! Per-partition diagnostics and aggregate failure classification
//!
//! Every fetch attempt yields a [`PartitionResult`], success or not. When a
//! whole run produced nothing, a [`FailureClassifier`] turns those results
//! into a single [`FailureHint`] for operators.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Maximum characters of response body kept for diagnosis.
pub const SNIPPET_LIMIT: usize = 220;

/// Lowercase phrases that identify a bot-protection interstitial.
pub const CHALLENGE_PHRASES: &[&str] = &["just a moment", "cloudflare", "cf-chl", "attention required"];

/// Terminal failure class of one partition request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Non-200 response
    Http(u16),
    /// 200 response whose body was not JSON
    JsonDecode,
    /// Bot-protection challenge page, whatever the status code
    BotChallenge,
    /// Timeout, connection failure, or other transport error
    Network(String),
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Http(status) => write!(f, "http_{}", status),
            FetchErrorKind::JsonDecode => f.write_str("json_decode_error"),
            FetchErrorKind::BotChallenge => f.write_str("bot_challenge"),
            FetchErrorKind::Network(kind) => write!(f, "request_exception:{}", kind),
        }
    }
}

/// Classified outcome of one partition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionOutcome {
    SuccessWithItems,
    SuccessEmpty,
    HttpError(u16),
    JsonDecodeError,
    BotChallenge,
    NetworkError,
}

/// Diagnostics for one fetch attempt. Never discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionResult {
    pub partition_id: String,
    pub item_count: usize,
    pub http_status: Option<u16>,
    pub content_type: Option<String>,
    pub looks_like_html: bool,
    pub redirected: bool,
    pub error: Option<FetchErrorKind>,
    pub elapsed_ms: u64,
    pub response_snippet: Option<String>,
}

impl PartitionResult {
    pub fn new(partition_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            item_count: 0,
            http_status: None,
            content_type: None,
            looks_like_html: false,
            redirected: false,
            error: None,
            elapsed_ms: 0,
            response_snippet: None,
        }
    }

    pub fn outcome(&self) -> PartitionOutcome {
        match &self.error {
            None if self.item_count > 0 => PartitionOutcome::SuccessWithItems,
            None => PartitionOutcome::SuccessEmpty,
            Some(FetchErrorKind::Http(status)) => PartitionOutcome::HttpError(*status),
            Some(FetchErrorKind::JsonDecode) => PartitionOutcome::JsonDecodeError,
            Some(FetchErrorKind::BotChallenge) => PartitionOutcome::BotChallenge,
            Some(FetchErrorKind::Network(_)) => PartitionOutcome::NetworkError,
        }
    }

    /// True if the snippet carries a known challenge phrase.
    pub fn has_challenge_phrase(&self) -> bool {
        self.response_snippet
            .as_deref()
            .map(contains_challenge_phrase)
            .unwrap_or(false)
    }

    /// Emit this result as a structured warning.
    pub fn log(&self) {
        warn!(
            partition = %self.partition_id,
            status = ?self.http_status,
            count = self.item_count,
            content_type = ?self.content_type,
            looks_like_html = self.looks_like_html,
            redirected = self.redirected,
            error = ?self.error.as_ref().map(|e| e.to_string()),
            elapsed_ms = self.elapsed_ms,
            snippet = ?self.response_snippet,
            "FETCH_DIAGNOSTICS"
        );
    }
}

pub fn contains_challenge_phrase(text: &str) -> bool {
    let lower = text.to_lowercase();
    CHALLENGE_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// HTML detection from the content type or the start of the body.
pub fn looks_like_html(content_type: Option<&str>, snippet: &str) -> bool {
    let is_html_type = content_type
        .map(|ct| ct.to_lowercase().contains("text/html"))
        .unwrap_or(false);
    let head = snippet.trim_start().to_lowercase();
    is_html_type || head.starts_with("<!doctype") || head.starts_with("<html")
}

/// Build a log-safe snippet: newlines flattened, at most [`SNIPPET_LIMIT`]
/// characters, and every occurrence of `secret` replaced.
pub fn safe_snippet(body: &[u8], secret: &str) -> String {
    let text = String::from_utf8_lossy(body);
    let mut flattened: String = text.replace(['\n', '\r'], " ");
    if !secret.is_empty() {
        flattened = flattened.replace(secret, "[redacted]");
    }
    flattened.trim().chars().take(SNIPPET_LIMIT).collect()
}

/// Aggregate hint for a run in which every partition produced zero items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureHint {
    BotBlock,
    AuthFailure,
    NoData,
    NetworkFailure,
}

impl FailureHint {
    pub fn message(&self) -> &'static str {
        match self {
            FailureHint::BotBlock => {
                "Blocked by Cloudflare/bot protection (HTML challenge). CI runner IPs may be blocked; a cookie refresh alone may not fix it."
            },
            FailureHint::AuthFailure => {
                "Likely auth failure (cookie expired/invalid). Refresh PENNY_RAW_COOKIE and retry."
            },
            FailureHint::NoData => {
                "API returned no usable data. Check upstream availability and response format."
            },
            FailureHint::NetworkFailure => {
                "All requests failed (timeouts/network). Check upstream availability."
            },
        }
    }
}

impl fmt::Display for FailureHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            FailureHint::BotBlock => "bot-block",
            FailureHint::AuthFailure => "auth-failure",
            FailureHint::NoData => "no-data",
            FailureHint::NetworkFailure => "network-failure",
        };
        f.write_str(tag)
    }
}

/// Turns per-partition diagnostics into one failure hint
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, results: &[PartitionResult]) -> FailureHint;
}

/// String-sniffing classifier.
///
/// Precedence: bot-block > auth-failure > no-data > network-failure. A single
/// partition showing challenge evidence is enough for bot-block; any 401/403
/// or HTML body means auth-failure; any received status means no-data.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl FailureClassifier for HeuristicClassifier {
    fn classify(&self, results: &[PartitionResult]) -> FailureHint {
        let bot_block = results.iter().any(|r| {
            r.has_challenge_phrase() || matches!(r.error, Some(FetchErrorKind::BotChallenge))
        });
        if bot_block {
            return FailureHint::BotBlock;
        }

        let auth = results
            .iter()
            .any(|r| matches!(r.http_status, Some(401) | Some(403)) || r.looks_like_html);
        if auth {
            return FailureHint::AuthFailure;
        }

        if results.iter().any(|r| r.http_status.is_some()) {
            return FailureHint::NoData;
        }

        FailureHint::NetworkFailure
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn result(status: Option<u16>, error: Option<FetchErrorKind>) -> PartitionResult {
        PartitionResult {
            http_status: status,
            error,
            ..PartitionResult::new("30301")
        }
    }

    #[test]
    fn test_snippet_is_truncated_and_flattened() {
        let body = format!("line one\nline two\r\n{}", "x".repeat(500));
        let snippet = safe_snippet(body.as_bytes(), "");
        assert_eq!(snippet.chars().count(), SNIPPET_LIMIT);
        assert!(snippet.starts_with("line one line two"));
    }

    #[test]
    fn test_snippet_redacts_secret() {
        let snippet = safe_snippet(b"echo: session=abc123; ok", "session=abc123");
        assert!(!snippet.contains("abc123"));
        assert!(snippet.contains("[redacted]"));
    }

    #[test]
    fn test_looks_like_html() {
        assert!(looks_like_html(Some("text/html; charset=utf-8"), "{}"));
        assert!(looks_like_html(None, "  <!DOCTYPE html><html>"));
        assert!(looks_like_html(Some("application/json"), "<html>"));
        assert!(!looks_like_html(Some("application/json"), "[]"));
    }

    #[test]
    fn test_outcome_classes() {
        let mut ok = result(Some(200), None);
        assert_eq!(ok.outcome(), PartitionOutcome::SuccessEmpty);
        ok.item_count = 3;
        assert_eq!(ok.outcome(), PartitionOutcome::SuccessWithItems);
        assert_eq!(
            result(Some(500), Some(FetchErrorKind::Http(500))).outcome(),
            PartitionOutcome::HttpError(500)
        );
        assert_eq!(
            result(None, Some(FetchErrorKind::Network("timeout".into()))).outcome(),
            PartitionOutcome::NetworkError
        );
    }

    #[test]
    fn test_bot_block_wins_over_other_errors() {
        let mut challenged = result(Some(403), Some(FetchErrorKind::Http(403)));
        challenged.response_snippet = Some("<html>Just a moment...</html>".to_string());
        let results = vec![
            result(Some(500), Some(FetchErrorKind::Http(500))),
            result(None, Some(FetchErrorKind::Network("connect".into()))),
            challenged,
        ];
        assert_eq!(HeuristicClassifier.classify(&results), FailureHint::BotBlock);
    }

    #[test]
    fn test_auth_failure_from_status_or_html() {
        let results = vec![result(Some(401), Some(FetchErrorKind::Http(401)))];
        assert_eq!(HeuristicClassifier.classify(&results), FailureHint::AuthFailure);

        let mut html = result(Some(200), Some(FetchErrorKind::JsonDecode));
        html.looks_like_html = true;
        assert_eq!(HeuristicClassifier.classify(&[html]), FailureHint::AuthFailure);
    }

    #[test]
    fn test_no_data_and_network() {
        let empty = vec![result(Some(200), None), result(Some(200), None)];
        assert_eq!(HeuristicClassifier.classify(&empty), FailureHint::NoData);

        let down = vec![result(None, Some(FetchErrorKind::Network("timeout".into())))];
        assert_eq!(HeuristicClassifier.classify(&down), FailureHint::NetworkFailure);
    }

    #[test]
    fn test_hint_tags() {
        assert_eq!(FailureHint::BotBlock.to_string(), "bot-block");
        assert_eq!(FailureHint::NoData.to_string(), "no-data");
        assert_eq!(
            serde_json::to_string(&FailureHint::AuthFailure).unwrap(),
            "\"auth-failure\""
        );
    }
}
