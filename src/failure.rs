//! Failure taxonomy shared by the cache, the network client and the fetcher
//!
//! Every fallible operation in this crate returns [`Result<T>`], whose error side is a
//! [`Failure`] value. Failures are never panicked or thrown across the cache/network
//! boundary; callers decide at their own edge whether to unwrap.

use serde_json::Value;
use thiserror::Error;

/// Convenience result type used throughout the crate
pub type Result<T> = std::result::Result<T, Failure>;

/// Transport and HTTP-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkFailure {
    /// Could not reach the proxy at all
    #[error("no connection")]
    NoConnection,
    /// Connect, send or receive timed out
    #[error("request timed out")]
    Timeout,
    /// HTTP 5xx
    #[error("server error ({0})")]
    ServerError(u16),
    /// HTTP 4xx other than 401, 403 and 429
    #[error("client error ({0})")]
    ClientError(u16),
    /// HTTP 429
    #[error("rate limited")]
    RateLimited,
    /// TLS handshake or certificate problem
    #[error("ssl error")]
    SslError,
}

/// Failures raised by the cache store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheFailure {
    #[error("cache miss for '{0}'")]
    NotFound(String),
    #[error("cache entry '{0}' expired")]
    Expired(String),
    #[error("corrupted cache data")]
    CorruptedData,
    #[error("cache size limit exceeded")]
    SizeLimitExceeded,
}

/// Authentication and authorization failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// HTTP 401
    #[error("invalid token")]
    InvalidToken,
    /// HTTP 403
    #[error("insufficient permissions")]
    InsufficientPermissions,
}

/// Everything that does not fit the other categories
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneralFailure {
    #[error("unknown error")]
    Unknown,
    #[error("configuration error")]
    Configuration,
}

/// The closed set of failure kinds
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureKind {
    #[error("network: {0}")]
    Network(NetworkFailure),
    #[error("cache: {0}")]
    Cache(CacheFailure),
    #[error("auth: {0}")]
    Auth(AuthFailure),
    #[error("general: {0}")]
    General(GeneralFailure),
}

impl FailureKind {
    /// Stable, upper-snake identifier for the kind (e.g. `NETWORK_TIMEOUT`)
    pub fn code(&self) -> String {
        match self {
            FailureKind::Network(n) => match n {
                NetworkFailure::NoConnection => "NETWORK_NO_CONNECTION".to_string(),
                NetworkFailure::Timeout => "NETWORK_TIMEOUT".to_string(),
                NetworkFailure::ServerError(status) => format!("NETWORK_SERVER_ERROR_{}", status),
                NetworkFailure::ClientError(status) => format!("NETWORK_CLIENT_ERROR_{}", status),
                NetworkFailure::RateLimited => "NETWORK_RATE_LIMITED".to_string(),
                NetworkFailure::SslError => "NETWORK_SSL_ERROR".to_string(),
            },
            FailureKind::Cache(c) => match c {
                CacheFailure::NotFound(_) => "CACHE_NOT_FOUND".to_string(),
                CacheFailure::Expired(_) => "CACHE_EXPIRED".to_string(),
                CacheFailure::CorruptedData => "CACHE_CORRUPTED_DATA".to_string(),
                CacheFailure::SizeLimitExceeded => "CACHE_SIZE_LIMIT_EXCEEDED".to_string(),
            },
            FailureKind::Auth(a) => match a {
                AuthFailure::InvalidToken => "AUTH_INVALID_TOKEN".to_string(),
                AuthFailure::InsufficientPermissions => "AUTH_INSUFFICIENT_PERMISSIONS".to_string(),
            },
            FailureKind::General(g) => match g {
                GeneralFailure::Unknown => "GENERAL_UNKNOWN".to_string(),
                GeneralFailure::Configuration => "GENERAL_CONFIGURATION".to_string(),
            },
        }
    }
}

/// A failed outcome, carried as a value
///
/// `message` is human-readable, `code` defaults to the kind's stable identifier and
/// `details` holds structured extras such as the `Retry-After` header on a 429.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub code: Option<String>,
    pub details: Option<Value>,
}

impl Failure {
    /// Creates a failure of the given kind with the kind's default code
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        let code = Some(kind.code());
        Self {
            kind,
            message: message.into(),
            code,
            details: None,
        }
    }

    pub fn network(failure: NetworkFailure, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network(failure), message)
    }

    pub fn cache(failure: CacheFailure, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Cache(failure), message)
    }

    pub fn auth(failure: AuthFailure, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Auth(failure), message)
    }

    /// `General.unknown` with the given message
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FailureKind::General(GeneralFailure::Unknown), message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(FailureKind::General(GeneralFailure::Configuration), message)
    }

    /// `Cache.notFound(key)`
    pub fn not_found(key: &str) -> Self {
        Self::cache(
            CacheFailure::NotFound(key.to_string()),
            format!("no cached value for '{}'", key),
        )
    }

    /// `Cache.expired(key)`
    pub fn expired(key: &str) -> Self {
        Self::cache(
            CacheFailure::Expired(key.to_string()),
            format!("cached value for '{}' has expired", key),
        )
    }

    /// Replaces the code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attaches structured details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether showing a "Retry" action makes sense for this failure
    ///
    /// Connectivity problems, timeouts, 5xx and rate limiting are transient. TLS,
    /// 4xx, auth, cache and general failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::Network(
                NetworkFailure::NoConnection
                    | NetworkFailure::Timeout
                    | NetworkFailure::ServerError(_)
                    | NetworkFailure::RateLimited
            )
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.kind, FailureKind::Cache(CacheFailure::Expired(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_assigns_default_code() {
        let failure = Failure::network(NetworkFailure::Timeout, "slow");
        assert_eq!(failure.code.as_deref(), Some("NETWORK_TIMEOUT"));
        assert_eq!(failure.message, "slow");
        assert!(failure.details.is_none());
    }

    #[test]
    fn test_status_codes_are_part_of_code() {
        let failure = Failure::network(NetworkFailure::ServerError(503), "down");
        assert_eq!(failure.code.as_deref(), Some("NETWORK_SERVER_ERROR_503"));
    }

    #[test]
    fn test_display_includes_kind_and_message() {
        let failure = Failure::not_found("courses");
        let text = failure.to_string();
        assert!(text.contains("cache miss for 'courses'"), "{}", text);
        assert!(text.contains("no cached value"), "{}", text);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Failure::network(NetworkFailure::NoConnection, "").is_retryable());
        assert!(Failure::network(NetworkFailure::Timeout, "").is_retryable());
        assert!(Failure::network(NetworkFailure::ServerError(500), "").is_retryable());
        assert!(Failure::network(NetworkFailure::RateLimited, "").is_retryable());

        assert!(Failure::network(NetworkFailure::ClientError(404), "").is_terminal());
        assert!(Failure::network(NetworkFailure::SslError, "").is_terminal());
        assert!(Failure::auth(AuthFailure::InvalidToken, "").is_terminal());
        assert!(Failure::cache(CacheFailure::CorruptedData, "").is_terminal());
        assert!(Failure::unknown("boom").is_terminal());
    }

    #[test]
    fn test_with_details_and_code() {
        let failure = Failure::network(NetworkFailure::RateLimited, "slow down")
            .with_details(json!({ "retryAfter": "30" }))
            .with_code("CUSTOM");
        assert_eq!(failure.code.as_deref(), Some("CUSTOM"));
        assert_eq!(failure.details, Some(json!({ "retryAfter": "30" })));
    }

    #[test]
    fn test_std_result_combinators_short_circuit() {
        let ok: Result<i32> = Ok(2);
        let err: Result<i32> = Err(Failure::unknown("nope"));

        assert_eq!(ok.clone().map(|v| v * 2), Ok(4));
        assert_eq!(
            ok.clone().and_then(|_| Err::<i32, _>(Failure::unknown("second"))).unwrap_err().message,
            "second"
        );
        assert_eq!(err.clone().and_then(|v| Ok(v + 1)).unwrap_err().message, "nope");
        assert_eq!(err.clone().unwrap_or(7), 7);
        assert_eq!(err.map_or_else(|f| f.message.len(), |v| v as usize), 4);
    }

    #[test]
    fn test_is_expired() {
        assert!(Failure::expired("k").is_expired());
        assert!(!Failure::not_found("k").is_expired());
    }
}
