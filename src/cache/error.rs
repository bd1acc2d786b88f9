//! Error taxonomy for the cache core.
//!
//! Errors are `Clone` so a single upstream outcome can be broadcast verbatim
//! to every caller waiting on the same coalesced fetch.

use crate::types::Domain;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Upstream did not answer within the domain timeout
    #[error("{domain} upstream timed out after {timeout_ms}ms")]
    UpstreamTimeout { domain: Domain, timeout_ms: u64 },

    /// Network, auth or rate-limit failure talking to the upstream
    #[error("{domain} upstream unavailable: {reason}")]
    UpstreamUnavailable { domain: Domain, reason: String },

    /// Upstream answered but the payload could not be used
    #[error("{domain} upstream returned an invalid response: {reason}")]
    UpstreamInvalidResponse { domain: Domain, reason: String },

    /// The upstream has no data at all for this key
    #[error("no {domain} data is known for key '{key}'")]
    KeyNotFound { domain: Domain, key: String },

    /// The caller's input cannot be turned into a cache key
    #[error("invalid {domain} request: {reason}")]
    InvalidRequest { domain: Domain, reason: String },

    /// The leader task ended without publishing an outcome
    #[error("{domain} fetch for '{key}' was abandoned before completing")]
    FetchAbandoned { domain: Domain, key: String },

    /// No refresh scheduler is running for the domain
    #[error("no refresh scheduler is running for {domain}")]
    SchedulerUnavailable { domain: Domain },

    #[error("configuration error: {0}")]
    Config(String),
}

impl CacheError {
    pub fn unavailable(domain: Domain, reason: impl Into<String>) -> Self {
        CacheError::UpstreamUnavailable {
            domain,
            reason: reason.into(),
        }
    }

    pub fn invalid_response(domain: Domain, reason: impl Into<String>) -> Self {
        CacheError::UpstreamInvalidResponse {
            domain,
            reason: reason.into(),
        }
    }

    pub fn invalid_request(domain: Domain, reason: impl Into<String>) -> Self {
        CacheError::InvalidRequest {
            domain,
            reason: reason.into(),
        }
    }

    pub fn key_not_found(domain: Domain, key: impl Into<String>) -> Self {
        CacheError::KeyNotFound {
            domain,
            key: key.into(),
        }
    }

    /// Whether the coalescer may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::UpstreamTimeout { .. } | CacheError::UpstreamUnavailable { .. }
        )
    }

    /// Domain the error originated from, if any.
    pub fn domain(&self) -> Option<Domain> {
        match self {
            CacheError::UpstreamTimeout { domain, .. }
            | CacheError::UpstreamUnavailable { domain, .. }
            | CacheError::UpstreamInvalidResponse { domain, .. }
            | CacheError::KeyNotFound { domain, .. }
            | CacheError::InvalidRequest { domain, .. }
            | CacheError::FetchAbandoned { domain, .. }
            | CacheError::SchedulerUnavailable { domain } => Some(*domain),
            CacheError::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(CacheError::UpstreamTimeout {
            domain: Domain::Analysis,
            timeout_ms: 30_000
        }
        .is_retryable());
        assert!(CacheError::unavailable(Domain::Markets, "connection refused").is_retryable());
        assert!(!CacheError::invalid_response(Domain::Markets, "bad json").is_retryable());
        assert!(!CacheError::key_not_found(Domain::Comments, "nope_market").is_retryable());
    }

    #[test]
    fn test_error_messages_name_domain() {
        let err = CacheError::UpstreamTimeout {
            domain: Domain::Analysis,
            timeout_ms: 30_000,
        };
        assert_eq!(err.to_string(), "analysis upstream timed out after 30000ms");
        assert_eq!(err.domain(), Some(Domain::Analysis));
        assert_eq!(CacheError::Config("x".into()).domain(), None);
    }
}
