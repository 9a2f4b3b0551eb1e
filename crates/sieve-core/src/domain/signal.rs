//! Failure signals.
//!
//! A `Signal` is built once at the I/O boundary (fetcher, LLM client, store)
//! and carries a normalized `SignalCode` plus the raw message. Everything
//! downstream (classifier, backoff, retry coordinator) matches on the code and
//! never re-parses free text.
//!
//! # Message precedence
//! `Signal::from_message` checks the transient rules before the permanent ones,
//! in table order. A message mentioning both ("invalid response: timeout") is
//! therefore `Timeout`. Within the transient table, rate limiting is checked
//! first so a 429 always gets the rate-limit backoff.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "code", content = "status")]
pub enum SignalCode {
    /// HTTP 429 or explicit rate-limit text.
    RateLimited,
    /// HTTP 503 / "service unavailable".
    ServiceUnavailable,
    /// HTTP 504 / "gateway timeout".
    GatewayTimeout,
    Timeout,
    ConnectionReset,
    Dns,
    /// Any other 5xx.
    ServerError(u16),
    BadRequest,
    Unauthorized,
    Forbidden,
    /// Any other 4xx.
    ClientError(u16),
    /// "invalid", "validation", malformed input, parse errors.
    Validation,
    /// Certificate / TLS failures.
    Tls,
    /// A collaborator explicitly reported a non-retryable error.
    Fatal,
    /// Nothing matched.
    Unknown,
}

struct Rule {
    code: SignalCode,
    status: Option<u16>,
    keywords: &'static [&'static str],
}

const TRANSIENT_RULES: &[Rule] = &[
    Rule {
        code: SignalCode::RateLimited,
        status: Some(429),
        keywords: &["rate limit", "too many requests"],
    },
    Rule {
        code: SignalCode::ServiceUnavailable,
        status: Some(503),
        keywords: &["service unavailable"],
    },
    Rule {
        code: SignalCode::GatewayTimeout,
        status: Some(504),
        keywords: &["gateway timeout"],
    },
    Rule {
        code: SignalCode::Timeout,
        status: None,
        keywords: &["timeout", "timed out", "etimedout", "esockettimedout"],
    },
    Rule {
        code: SignalCode::ConnectionReset,
        status: None,
        keywords: &[
            "econnreset",
            "connection reset",
            "econnaborted",
            "connection aborted",
            "econnrefused",
            "connection refused",
            "enetunreach",
            "ehostunreach",
            "network error",
        ],
    },
    Rule {
        code: SignalCode::Dns,
        status: None,
        keywords: &["enotfound", "eai_again", "getaddrinfo", "dns"],
    },
];

const PERMANENT_RULES: &[Rule] = &[
    Rule {
        code: SignalCode::BadRequest,
        status: Some(400),
        keywords: &["bad request"],
    },
    Rule {
        code: SignalCode::Unauthorized,
        status: Some(401),
        keywords: &["unauthorized"],
    },
    Rule {
        code: SignalCode::Forbidden,
        status: Some(403),
        keywords: &["forbidden"],
    },
    Rule {
        code: SignalCode::ClientError(405),
        status: Some(405),
        keywords: &["method not allowed"],
    },
    Rule {
        code: SignalCode::ClientError(406),
        status: Some(406),
        keywords: &["not acceptable"],
    },
    Rule {
        code: SignalCode::Validation,
        status: None,
        keywords: &[
            "invalid",
            "validation",
            "malformed",
            "parse error",
            "parsing failed",
            "syntax error",
        ],
    },
    Rule {
        code: SignalCode::Tls,
        status: None,
        keywords: &["certificate", "ssl", "tls handshake"],
    },
];

/// A typed failure signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub code: SignalCode,
    pub message: String,
}

impl Signal {
    pub fn new(code: SignalCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Normalize a free-text error message (case-insensitive).
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let code = TRANSIENT_RULES
            .iter()
            .chain(PERMANENT_RULES)
            .find(|rule| rule.matches(&lower))
            .map(|rule| rule.code)
            .unwrap_or(SignalCode::Unknown);
        Self { code, message }
    }

    /// Build from an HTTP status. The status wins over the message text.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        let code = match status {
            429 => SignalCode::RateLimited,
            503 => SignalCode::ServiceUnavailable,
            504 => SignalCode::GatewayTimeout,
            400 => SignalCode::BadRequest,
            401 => SignalCode::Unauthorized,
            403 => SignalCode::Forbidden,
            400..=499 => SignalCode::ClientError(status),
            500..=599 => SignalCode::ServerError(status),
            _ => return Self::from_message(message),
        };
        Self::new(code, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SignalCode::Timeout, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(SignalCode::Fatal, message)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.code == SignalCode::RateLimited
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Rule {
    fn matches(&self, lower: &str) -> bool {
        self.status.is_some_and(|s| mentions_status(lower, s))
            || self.keywords.iter().any(|k| lower.contains(k))
    }
}

/// True if `status` appears as a standalone number (not part of a longer
/// digit run such as a port or an id).
fn mentions_status(haystack: &str, status: u16) -> bool {
    let needle = status.to_string();
    let bytes = haystack.as_bytes();
    haystack.match_indices(&needle).any(|(i, _)| {
        let before = i.checked_sub(1).map(|j| bytes[j]);
        let after = bytes.get(i + needle.len()).copied();
        !before.is_some_and(|b| b.is_ascii_digit()) && !after.is_some_and(|b| b.is_ascii_digit())
    })
}
