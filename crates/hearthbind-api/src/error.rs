use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `hearthbind-api` crate.
///
/// A closed taxonomy: every transport outcome the executor can observe maps
/// to exactly one variant. `hearthbind-core` translates these into device
/// status transitions -- consumers never see raw `reqwest` errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login failed outright (wrong credentials, account locked).
    /// Fatal: never retried automatically.
    #[error("invalid credentials: {message}")]
    InvalidCredentials { message: String },

    /// The refresh token was rejected by the vendor. A full
    /// re-authentication from stored credentials is required.
    #[error("token revoked -- re-authentication required")]
    TokenRevoked,

    /// A request was rejected with 401 / `invalid_grant`. One session
    /// refresh-and-retry is allowed before this surfaces.
    #[error("auth rejected (HTTP {status})")]
    AuthRejected { status: u16 },

    // ── Transport ───────────────────────────────────────────────────
    /// Request exceeded the configured timeout.
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TCP/TLS-level failure (connection refused, DNS, handshake).
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// HTTP 429. Carries the server's `Retry-After` hint when present.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 5xx from the vendor.
    #[error("server error (HTTP {status})")]
    ServerError { status: u16 },

    /// The vendor rejected the request with a non-auth 4xx. Not retried --
    /// the request itself is wrong (bad parameter, unknown resource).
    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Response body did not match the expected shape. Never retried:
    /// this indicates a contract bug, not a communication problem.
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    /// URL construction failed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS configuration error while building the HTTP client.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// Returns `true` if this is a transient failure worth retrying
    /// with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::ConnectionFailed { .. }
                | Self::ServerError { .. }
                | Self::RateLimited { .. }
        )
    }

    /// Returns `true` if this indicates an expired or rejected token
    /// that a session refresh might resolve.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthRejected { .. })
    }

    /// Returns `true` if this is an auth failure no refresh can fix.
    pub fn is_fatal_auth(&self) -> bool {
        matches!(self, Self::InvalidCredentials { .. } | Self::TokenRevoked)
    }

    /// Classify a `reqwest` failure into the closed taxonomy.
    pub(crate) fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                timeout_secs: timeout.as_secs(),
            }
        } else if err.is_connect() {
            Self::ConnectionFailed {
                reason: err.to_string(),
            }
        } else if err.is_decode() {
            Self::MalformedResponse {
                message: err.to_string(),
            }
        } else {
            // Request construction / redirect / body errors -- none of these
            // will resolve on retry, but they are connection-shaped from the
            // caller's perspective.
            Self::ConnectionFailed {
                reason: err.to_string(),
            }
        }
    }
}
