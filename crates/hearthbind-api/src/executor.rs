// Remote call executor
//
// Issues one logical vendor call, classifying every transport outcome into
// the closed error taxonomy and retrying what is safe to retry:
//
//   Timeout / ConnectionFailed / ServerError  -> bounded exponential backoff
//   RateLimited                               -> server hint, else backoff
//   AuthRejected                              -> session refresh, retry once
//   Rejected / MalformedResponse              -> never retried
//
// Anything still failing after the retry budget bubbles to the poll loop,
// which owns status transitions.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::request::{Method, VendorRequest, VendorResponse};
use crate::session::{retry_after_hint, SessionHandle};
use crate::transport::TransportConfig;

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry. Default: 1s.
    pub initial_delay: Duration,
    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
    /// Total send attempts per call, including the first. Default: 3.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// `delay = min(initial * 2^attempt, max)`, spread by a deterministic
    /// jitter so a fleet of devices retrying together fans out.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let capped = base.min(self.max_delay.as_secs_f64());

        // Seeded from the attempt number -- repeatable in tests, spread
        // enough in practice.
        let jitter = 0.8 + 0.4 * f64::from((attempt.wrapping_mul(2_654_435_761)) % 1000) / 1000.0;
        Duration::from_secs_f64(capped * jitter)
    }
}

/// Executes vendor calls with authentication, classification, and retry.
///
/// One executor per account; devices share it the same way they share the
/// session. All methods take `&self` -- the executor holds no per-call state.
pub struct CallExecutor {
    http: reqwest::Client,
    base_url: Url,
    session: Arc<SessionHandle>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl CallExecutor {
    pub fn new(
        base_url: Url,
        session: Arc<SessionHandle>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            session,
            policy: RetryPolicy::default(),
            timeout: transport.timeout,
        })
    }

    /// Replace the retry policy (builder style).
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The session this executor authenticates with.
    pub fn session(&self) -> &Arc<SessionHandle> {
        &self.session
    }

    /// Issue one logical call, retrying per the policy.
    pub async fn call(&self, req: &VendorRequest) -> Result<VendorResponse, Error> {
        let mut attempt: u32 = 0;
        let mut auth_retried = false;

        loop {
            // Fatal auth errors (bad credentials, revoked token that cannot
            // be replaced) surface here and are never retried.
            let session = self.session.ensure_valid().await?;

            match self.send_once(req, &session.bearer()).await {
                Ok(resp) => return Ok(resp),

                Err(e) if e.is_auth_expired() && !auth_retried => {
                    // The vendor rejected a token our clock considered valid.
                    // Refresh and retry exactly once; does not consume a
                    // transient retry attempt.
                    auth_retried = true;
                    debug!(path = %req.path, "auth rejected, refreshing session");
                    self.session.refresh_after_reject(&session).await?;
                }

                Err(Error::RateLimited { retry_after }) if attempt + 1 < self.policy.max_attempts => {
                    let delay = retry_after.unwrap_or_else(|| self.policy.delay(attempt));
                    warn!(
                        path = %req.path,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }

                Err(e) if e.is_transient() && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        path = %req.path,
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }

                Err(e) => return Err(e),
            }
        }
    }

    // ── Single attempt ───────────────────────────────────────────────

    async fn send_once(&self, req: &VendorRequest, bearer: &str) -> Result<VendorResponse, Error> {
        let url = self.build_url(req)?;
        debug!(method = ?req.method, %url, category = req.category.as_deref().unwrap_or(""), "vendor call");

        let mut builder = match req.method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
            Method::Put => self.http.put(url),
            Method::Delete => self.http.delete(url),
        };

        builder = builder.header(reqwest::header::AUTHORIZATION, bearer);
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let hint = retry_after_hint(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), hint, body));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.timeout))?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| Error::MalformedResponse {
                message: format!("{e} (body: {})", truncate(&text, 200)),
            })?
        };

        Ok(VendorResponse {
            status: status.as_u16(),
            body,
        })
    }

    fn build_url(&self, req: &VendorRequest) -> Result<Url, Error> {
        let mut url = self.base_url.join(&req.path).map_err(Error::InvalidUrl)?;
        if !req.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &req.query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }
}

/// Map a non-success HTTP status to the closed taxonomy.
fn classify_status(status: u16, retry_after: Option<Duration>, body: String) -> Error {
    match status {
        401 => Error::AuthRejected { status },
        429 => Error::RateLimited { retry_after },
        500..=599 => Error::ServerError { status },
        _ => Error::Rejected {
            status,
            message: truncate(&body, 200).to_owned(),
        },
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();

        let d0 = policy.delay(0);
        let d1 = policy.delay(1);
        let d2 = policy.delay(2);

        assert!(d1 > d0, "d1 ({d1:?}) should exceed d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should exceed d1 ({d1:?})");

        // Far past the cap, jitter bounds the delay to max_delay * 1.2.
        let d10 = policy.delay(10);
        assert!(d10 <= Duration::from_secs(36), "capped delay was {d10:?}");
    }

    #[test]
    fn backoff_is_deterministic() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(3), policy.delay(3));
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(401, None, String::new()),
            Error::AuthRejected { status: 401 }
        ));
        assert!(matches!(
            classify_status(429, Some(Duration::from_secs(5)), String::new()),
            Error::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(5)
        ));
        assert!(matches!(
            classify_status(503, None, String::new()),
            Error::ServerError { status: 503 }
        ));
        assert!(matches!(
            classify_status(404, None, "no such device".into()),
            Error::Rejected { status: 404, .. }
        ));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 5), "héllo");
        assert_eq!(truncate("short", 200), "short");
    }
}
