//! Maps raw external-call failures to an [`ErrorKind`].
//!
//! Rules are applied in order: an explicit kind hint from the connector,
//! then the transport status code, then message patterns. Anything left
//! over is `ErrorKind::Unknown` (non-retryable, severity High).

use steward_types::failure::ErrorKind;

// ---------------------------------------------------------------------------
// ConnectorError
// ---------------------------------------------------------------------------

/// A raw failure returned by a connector, before classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ConnectorError {
    pub message: String,
    /// Transport status code (HTTP or equivalent), when known.
    pub status: Option<u16>,
    /// Connector-asserted kind; overrides every other rule.
    pub kind: Option<ErrorKind>,
}

impl ConnectorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            kind: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// The call did not finish within its per-call timeout.
    pub fn timed_out(after: std::time::Duration) -> Self {
        Self::new(format!("call timed out after {}s", after.as_secs_f64())).with_kind(ErrorKind::Timeout)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Message fragments per kind, checked in table order. Permission comes
/// before Authentication so "access denied" is not read as a login failure.
const MESSAGE_PATTERNS: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::Timeout,
        &["timed out", "timeout", "deadline exceeded"],
    ),
    (
        ErrorKind::Permission,
        &["permission denied", "forbidden", "access denied", "not permitted"],
    ),
    (
        ErrorKind::Authentication,
        &[
            "unauthorized",
            "unauthenticated",
            "authentication",
            "invalid token",
            "token expired",
            "invalid credentials",
        ],
    ),
    (
        ErrorKind::ResourceExhaustion,
        &[
            "rate limit",
            "too many requests",
            "quota",
            "out of memory",
            "no space left",
            "disk full",
            "resource exhausted",
        ],
    ),
    (
        ErrorKind::DataIntegrity,
        &[
            "integrity",
            "checksum",
            "corrupt",
            "constraint",
            "invalid data",
            "malformed",
            "validation failed",
        ],
    ),
    (
        ErrorKind::Connection,
        &[
            "connection refused",
            "connection reset",
            "connection closed",
            "broken pipe",
            "network",
            "dns",
            "unreachable",
            "could not connect",
        ],
    ),
];

/// Classify a raw connector failure.
pub fn classify(error: &ConnectorError) -> ErrorKind {
    if let Some(kind) = error.kind {
        return kind;
    }
    if let Some(kind) = error.status.and_then(classify_status) {
        return kind;
    }
    classify_message(&error.message)
}

fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        401 => Some(ErrorKind::Authentication),
        403 => Some(ErrorKind::Permission),
        408 | 504 => Some(ErrorKind::Timeout),
        409 | 400 | 422 => Some(ErrorKind::DataIntegrity),
        429 | 507 => Some(ErrorKind::ResourceExhaustion),
        500..=599 => Some(ErrorKind::Connection),
        _ => None,
    }
}

fn classify_message(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    MESSAGE_PATTERNS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| lowered.contains(p)))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}
