// ── Core error types ──
//
// Device-facing errors from hearthbind-core. These are NOT transport
// errors -- the poll loop is the sole place that translates them into
// status transitions, and the sink only ever sees the final
// classification. The `From<hearthbind_api::Error>` impl maps the
// transport taxonomy into these classes.

use std::time::Duration;

use thiserror::Error;

use crate::device::DeviceId;

/// Classified failure taxonomy for the device runtime.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// User must fix configuration input. Never retried.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Authentication failed beyond what a token refresh could fix.
    /// Fatal until the operator intervenes.
    #[error("authentication error: {message}")]
    Authentication { message: String },

    /// Transient network/vendor failure. Retried with backoff; surfaces
    /// as device OFFLINE once the threshold is crossed.
    #[error("communication error: {message}")]
    Communication { message: String },

    /// Vendor asked us to slow down. Transient; honors the server hint.
    #[error("rate limited by vendor")]
    RateLimited { retry_after: Option<Duration> },

    /// Response did not match the vendor contract. Non-retryable; the
    /// tick is treated as failed WITHOUT advancing the offline counter,
    /// since the network is evidently fine.
    #[error("data format error: {message}")]
    DataFormat { message: String },

    /// Operation addressed to a device this service does not manage.
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),
}

impl DeviceError {
    /// Transient failures that advance the consecutive-failure counter
    /// used for the OFFLINE transition.
    pub fn counts_toward_offline(&self) -> bool {
        matches!(self, Self::Communication { .. } | Self::RateLimited { .. })
    }

    /// Fatal failures: polling cannot recover without operator action.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Authentication { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<hearthbind_api::Error> for DeviceError {
    fn from(err: hearthbind_api::Error) -> Self {
        use hearthbind_api::Error as Api;

        match err {
            Api::InvalidCredentials { message } => DeviceError::Configuration {
                message: if message.is_empty() {
                    "invalid credentials".into()
                } else {
                    format!("invalid credentials: {message}")
                },
            },
            Api::TokenRevoked => DeviceError::Authentication {
                message: "token revoked -- re-authentication required".into(),
            },
            Api::AuthRejected { status } => DeviceError::Authentication {
                message: format!("vendor rejected token (HTTP {status})"),
            },
            Api::Timeout { timeout_secs } => DeviceError::Communication {
                message: format!("timeout after {timeout_secs}s"),
            },
            Api::ConnectionFailed { reason } => DeviceError::Communication { message: reason },
            Api::ServerError { status } => DeviceError::Communication {
                message: format!("server error (HTTP {status})"),
            },
            Api::RateLimited { retry_after } => DeviceError::RateLimited { retry_after },
            Api::MalformedResponse { message } => DeviceError::DataFormat { message },
            Api::Rejected { status, message } => DeviceError::DataFormat {
                message: format!("request rejected (HTTP {status}): {message}"),
            },
            Api::InvalidUrl(e) => DeviceError::Configuration {
                message: format!("invalid URL: {e}"),
            },
            Api::Tls(message) => DeviceError::Configuration {
                message: format!("TLS: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_counter_classification() {
        assert!(DeviceError::Communication { message: "timeout".into() }.counts_toward_offline());
        assert!(DeviceError::RateLimited { retry_after: None }.counts_toward_offline());

        // A contract mismatch is not a communication problem.
        assert!(!DeviceError::DataFormat { message: "bad json".into() }.counts_toward_offline());
        assert!(!DeviceError::Configuration { message: "bad url".into() }.counts_toward_offline());
    }

    #[test]
    fn fatal_classification() {
        assert!(DeviceError::Configuration { message: "x".into() }.is_fatal());
        assert!(DeviceError::Authentication { message: "x".into() }.is_fatal());
        assert!(!DeviceError::Communication { message: "x".into() }.is_fatal());
        assert!(!DeviceError::DataFormat { message: "x".into() }.is_fatal());
    }

    #[test]
    fn transport_errors_translate() {
        let err: DeviceError = hearthbind_api::Error::Timeout { timeout_secs: 30 }.into();
        assert!(matches!(err, DeviceError::Communication { .. }));
        assert_eq!(err.to_string(), "communication error: timeout after 30s");

        let err: DeviceError =
            hearthbind_api::Error::InvalidCredentials { message: String::new() }.into();
        assert_eq!(err.to_string(), "configuration error: invalid credentials");

        let err: DeviceError =
            hearthbind_api::Error::MalformedResponse { message: "eof".into() }.into();
        assert!(matches!(err, DeviceError::DataFormat { .. }));
    }
}
