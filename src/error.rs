//! Error types for the enrichment engine.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why a single target ended without data.
///
/// Rate limiting is deliberately absent: it is a scheduling deferral, not a
/// terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Input could not be accepted as a target. Reserved; classification
    /// currently always falls back to a hostname.
    Validation,
    /// Transport error or timeout while talking to a provider.
    Network,
    /// The provider answered but refused the target (reserved range, bogon...).
    Declined,
    /// The provider answered with something the adapter could not interpret.
    UnexpectedResponse,
    /// The lookup task itself died.
    Internal,
}

/// Terminal failure recorded on a canonical record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl LookupFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for LookupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Validation => write!(f, "Invalid target: {}", self.message),
            FailureKind::Network => write!(f, "Error: Network/Timeout ({})", self.message),
            FailureKind::Declined => write!(f, "API Fail: {}", self.message),
            FailureKind::UnexpectedResponse => write!(f, "API Error: {}", self.message),
            FailureKind::Internal => write!(f, "Error: {}", self.message),
        }
    }
}

/// Errors raised while building an engine from configuration.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider '{name}' could not be initialized: {source}")]
    Provider {
        name: String,
        #[source]
        source: crate::providers::ProviderError,
    },
}
