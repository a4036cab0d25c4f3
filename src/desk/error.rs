//! Upstream failure classification.
//!
//! Every failure coming out of the helpdesk client is a [`DeskError`]; callers that
//! report to the dashboard flatten it into an [`ErrorSummary`].

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const MAX_TEXT_DETAIL: usize = 500;

static HTML_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));

#[derive(Debug, Error)]
pub enum DeskError {
    /// The upstream answered with a non-success status.
    #[error("upstream error {status}: {message}")]
    Api {
        status: StatusCode,
        message: String,
        detail: Value,
    },
    /// No response was received.
    #[error("no response from upstream: {0}")]
    Network(String),
    #[error("invalid upstream response: {0}")]
    Decode(String),
    #[error("access token refresh failed: {0}")]
    Token(Box<DeskError>),
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Display-ready shape of an upstream failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub message: String,
    pub raw_detail: Option<Value>,
}

impl DeskError {
    /// Classify a non-success response body: JSON error payloads, HTML error
    /// pages and plain text each get their own summary.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let trimmed = body.trim();
        if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
            let message = json_error_message(&json)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return DeskError::Api {
                status,
                message,
                detail: json,
            };
        }

        if looks_like_html(trimmed) {
            let title = HTML_TITLE
                .captures(trimmed)
                .and_then(|c| c.get(1))
                .map(|m| collapse_whitespace(m.as_str()))
                .filter(|t| !t.is_empty());
            let message = match title {
                Some(t) => format!("HTTP {}: {}", status.as_u16(), t),
                None => format!("HTTP {}: upstream returned an HTML error page", status.as_u16()),
            };
            return DeskError::Api {
                status,
                message,
                detail: Value::String(truncate(trimmed, MAX_TEXT_DETAIL)),
            };
        }

        let message = if trimmed.is_empty() {
            format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("error")
            )
        } else {
            format!("HTTP {}: {}", status.as_u16(), truncate(trimmed, 200))
        };
        DeskError::Api {
            status,
            message,
            detail: Value::String(truncate(trimmed, MAX_TEXT_DETAIL)),
        }
    }

    pub fn message(&self) -> String {
        match self {
            DeskError::Api { message, .. } => message.clone(),
            DeskError::Token(inner) => format!("access token refresh failed: {}", inner.message()),
            other => other.to_string(),
        }
    }

    pub fn raw_detail(&self) -> Option<Value> {
        match self {
            DeskError::Api { detail, .. } => Some(detail.clone()),
            DeskError::Token(inner) => inner.raw_detail(),
            _ => None,
        }
    }

    pub fn summary(&self) -> ErrorSummary {
        ErrorSummary {
            message: self.message(),
            raw_detail: self.raw_detail(),
        }
    }
}

impl From<reqwest::Error> for DeskError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeskError::Network("request timed out".to_string())
        } else if err.is_connect() {
            DeskError::Network(format!("could not connect to upstream: {err}"))
        } else if err.is_decode() {
            DeskError::Decode(err.to_string())
        } else {
            DeskError::Network(err.to_string())
        }
    }
}

/// Helpdesk error bodies carry `message` and optionally a list of field errors.
fn json_error_message(json: &Value) -> Option<String> {
    let base = json
        .get("message")
        .or_else(|| json.get("error_description"))
        .or_else(|| json.get("error"))
        .or_else(|| json.get("errorCode"))
        .and_then(Value::as_str)?
        .to_string();

    let field = json
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|errs| errs.first())
        .and_then(|e| {
            let name = e.get("fieldName").and_then(Value::as_str)?;
            let kind = e.get("errorType").and_then(Value::as_str).unwrap_or("invalid");
            Some(format!("{name}: {kind}"))
        });

    Some(match field {
        Some(f) => format!("{base} ({f})"),
        None => base,
    })
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body.chars().take(64).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<head")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_body_with_field_error() {
        let body = r#"{"errorCode":"INVALID_DATA","message":"An invalid value was provided","errors":[{"fieldName":"/contact/email","errorType":"invalid"}]}"#;
        let err = DeskError::from_response(StatusCode::UNPROCESSABLE_ENTITY, body);
        let summary = err.summary();
        assert_eq!(
            summary.message,
            "An invalid value was provided (/contact/email: invalid)"
        );
        assert_eq!(summary.raw_detail.unwrap()["errorCode"], "INVALID_DATA");
    }

    #[test]
    fn json_body_without_message_falls_back_to_status() {
        let err = DeskError::from_response(StatusCode::BAD_REQUEST, r#"{"foo":1}"#);
        assert_eq!(err.message(), "HTTP 400");
        assert_eq!(err.raw_detail(), Some(json!({ "foo": 1 })));
    }

    #[test]
    fn html_page_uses_title() {
        let body = "<!DOCTYPE html><html><head><title>\n 502 Bad Gateway\n</title></head><body>oops</body></html>";
        let err = DeskError::from_response(StatusCode::BAD_GATEWAY, body);
        assert_eq!(err.message(), "HTTP 502: 502 Bad Gateway");
        assert!(matches!(err.raw_detail(), Some(Value::String(_))));
    }

    #[test]
    fn html_page_without_title() {
        let err = DeskError::from_response(StatusCode::SERVICE_UNAVAILABLE, "<html><body>down</body></html>");
        assert!(err.message().contains("HTML error page"));
    }

    #[test]
    fn plain_text_and_empty_bodies() {
        let err = DeskError::from_response(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert_eq!(err.message(), "HTTP 500: boom");

        let err = DeskError::from_response(StatusCode::NOT_FOUND, "");
        assert_eq!(err.message(), "HTTP 404 Not Found");
    }

    #[test]
    fn token_error_wraps_cause() {
        let inner = DeskError::from_response(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_code"}"#,
        );
        let err = DeskError::Token(Box::new(inner));
        let summary = err.summary();
        assert_eq!(summary.message, "access token refresh failed: invalid_code");
        assert_eq!(summary.raw_detail.unwrap()["error"], "invalid_code");
    }

    #[test]
    fn network_error_has_no_detail() {
        let err = DeskError::Network("request timed out".into());
        let summary = err.summary();
        assert_eq!(summary.message, "no response from upstream: request timed out");
        assert!(summary.raw_detail.is_none());
    }

    #[test]
    fn long_text_is_truncated() {
        let body = "x".repeat(1000);
        let err = DeskError::from_response(StatusCode::BAD_GATEWAY, &body);
        match err.raw_detail() {
            Some(Value::String(s)) => assert_eq!(s.chars().count(), MAX_TEXT_DETAIL + 1),
            other => panic!("unexpected detail {other:?}"),
        }
    }
}
