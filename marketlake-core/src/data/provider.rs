//! Provider adapter trait, raw frame, and structured failure types.
//!
//! The ProviderAdapter trait abstracts over data sources (Yahoo Finance, Alpha
//! Vantage, CSV import) so the resolver can walk them in priority order and
//! tests can inject mocks. Failure is an ordinary return value: an adapter
//! never panics and never retries.

use crate::domain::Field;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A single provider-native cell, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Short type tag for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            RawValue::Null => "null",
            RawValue::Int(_) => "int",
            RawValue::Float(_) => "float",
            RawValue::Text(_) => "text",
        }
    }
}

impl From<Option<f64>> for RawValue {
    fn from(v: Option<f64>) -> Self {
        v.map(RawValue::Float).unwrap_or(RawValue::Null)
    }
}

impl From<Option<i64>> for RawValue {
    fn from(v: Option<i64>) -> Self {
        v.map(RawValue::Int).unwrap_or(RawValue::Null)
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Null => f.write_str("null"),
            RawValue::Int(v) => write!(f, "{v}"),
            RawValue::Float(v) => write!(f, "{v}"),
            RawValue::Text(v) => write!(f, "{v:?}"),
        }
    }
}

/// A named column of raw cells.
#[derive(Debug, Clone, PartialEq)]
pub struct RawColumn {
    pub name: String,
    pub values: Vec<RawValue>,
}

/// Provider-native tabular payload.
///
/// Column names are whatever the provider calls them; extra columns are
/// allowed and dropped during normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFrame {
    columns: Vec<RawColumn>,
}

impl RawFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append.
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<RawValue>) -> Self {
        self.push_column(name, values);
        self
    }

    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<RawValue>) {
        self.columns.push(RawColumn {
            name: name.into(),
            values,
        });
    }

    pub fn columns(&self) -> &[RawColumn] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<RawColumn> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of rows (length of the longest column).
    pub fn height(&self) -> usize {
        self.columns.iter().map(|c| c.values.len()).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0
    }
}

/// Why a single adapter call did not produce data.
///
/// These are designed to be displayable in logs and in the run manifest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderFailure {
    #[error("network error: {0}")]
    Transport(String),

    #[error("HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("rate limited by provider{}", .retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("empty payload")]
    EmptyPayload,

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("circuit breaker open: provider is blocking requests")]
    CircuitOpen,
}

/// Coarse classification of a failure, used to explain an exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The provider could not be reached or refused to answer.
    Unreachable,
    /// The provider answered and has nothing for this symbol.
    NoData,
    /// The provider answered with something unusable.
    Malformed,
    /// The adapter is not usable as configured.
    Unconfigured,
}

impl ProviderFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProviderFailure::Transport(_)
            | ProviderFailure::HttpStatus { .. }
            | ProviderFailure::RateLimited { .. }
            | ProviderFailure::CircuitOpen => FailureKind::Unreachable,
            ProviderFailure::EmptyPayload | ProviderFailure::SymbolNotFound { .. } => {
                FailureKind::NoData
            }
            ProviderFailure::Malformed(_) | ProviderFailure::MissingColumns(_) => {
                FailureKind::Malformed
            }
            ProviderFailure::MissingCredential(_) => FailureKind::Unconfigured,
        }
    }

    /// Whether a bounded retry could plausibly change the outcome.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderFailure::Transport(_) | ProviderFailure::RateLimited { .. } => true,
            ProviderFailure::HttpStatus { status } => *status >= 500,
            _ => false,
        }
    }
}

/// Outcome of one adapter call: a raw frame or a failure, never both.
pub type ProviderResult = Result<RawFrame, ProviderFailure>;

/// How much history an adapter can be trusted to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    /// Full history over the configured window.
    Primary,
    /// Usable but limited (short window, strict quotas, stale local files).
    Fallback,
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reliability::Primary => f.write_str("primary/full-history"),
            Reliability::Fallback => f.write_str("fallback/limited-window"),
        }
    }
}

/// A data source that can fetch raw daily history for a symbol.
///
/// Implementations handle the specifics of one provider. Ordering and fallback
/// live in the resolver; adapters don't know about each other.
pub trait ProviderAdapter: Send + Sync {
    /// Stable identifier, recorded as the source of resolved data.
    fn name(&self) -> &str;

    /// Priority weight; lower is tried first when ordering by weight.
    fn priority(&self) -> u32;

    fn reliability(&self) -> Reliability;

    /// Provider-specific column names mapped onto canonical fields.
    ///
    /// Columns whose names already match a canonical field (case-insensitively)
    /// need no alias.
    fn column_aliases(&self) -> &[(&'static str, Field)] {
        &[]
    }

    /// Fetch raw daily history for `symbol`. Exactly one external call.
    fn fetch(&self, symbol: &str) -> ProviderResult;

    /// Check if the provider is currently accepting requests (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_height_uses_longest_column() {
        let frame = RawFrame::new()
            .with_column("a", vec![RawValue::Int(1), RawValue::Int(2)])
            .with_column("b", vec![RawValue::Null]);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.column_names(), ["a", "b"]);
        assert!(RawFrame::new().is_empty());
    }

    #[test]
    fn failure_classification() {
        assert_eq!(
            ProviderFailure::Transport("refused".into()).kind(),
            FailureKind::Unreachable
        );
        assert_eq!(ProviderFailure::EmptyPayload.kind(), FailureKind::NoData);
        assert_eq!(
            ProviderFailure::MissingColumns(vec!["close".into()]).kind(),
            FailureKind::Malformed
        );
        assert_eq!(
            ProviderFailure::MissingCredential("key".into()).kind(),
            FailureKind::Unconfigured
        );
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(ProviderFailure::Transport("timeout".into()).is_retryable());
        assert!(ProviderFailure::RateLimited { retry_after_secs: None }.is_retryable());
        assert!(ProviderFailure::HttpStatus { status: 503 }.is_retryable());
        assert!(!ProviderFailure::HttpStatus { status: 404 }.is_retryable());
        assert!(!ProviderFailure::EmptyPayload.is_retryable());
        assert!(!ProviderFailure::CircuitOpen.is_retryable());
    }

    #[test]
    fn rate_limit_message_includes_retry_after() {
        let f = ProviderFailure::RateLimited {
            retry_after_secs: Some(60),
        };
        assert_eq!(f.to_string(), "rate limited by provider (retry after 60s)");
        let f = ProviderFailure::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(f.to_string(), "rate limited by provider");
    }
}
