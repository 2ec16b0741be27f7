use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::Mode;

/// The outcome of one request/response exchange, as handed to the audit log.
///
/// Built once when the exchange ends and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    /// Model identifier used for attribution.
    pub model: String,

    /// Request mode.
    pub mode: Mode,

    /// The original raw input.
    pub request: String,

    /// Everything delivered to the user, including any abort marker.
    pub response: Option<String>,

    /// Rendered error, if the exchange failed.
    pub error: Option<String>,

    /// Whether the user cancelled the exchange.
    #[serde(default)]
    pub interrupted: bool,
}

impl SessionResult {
    /// Whether the exchange completed without error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A session result stamped with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// The recorded session.
    #[serde(flatten)]
    pub result: SessionResult,

    /// When the record was written.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,
}

impl AuditRecord {
    /// Stamp `result` with `created_at`.
    pub fn new(result: SessionResult, created_at: OffsetDateTime) -> Self {
        Self { result, created_at }
    }
}
