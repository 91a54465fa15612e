// Authenticated vendor session
//
// Bearer/refresh token lifecycle for one vendor account. A single
// `SessionHandle` is shared by every device on the account; the refresh
// path is single-writer so concurrent callers observe exactly one refresh
// request and the same new token afterwards.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Account credentials used for the initial token grant and for
/// re-authentication after a revoked refresh token.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// An authenticated session: the token pair plus its expiry.
///
/// Immutable once issued -- a refresh produces a new `Session` which is
/// swapped in atomically. Readers hold an `Arc` to whichever generation
/// they observed.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
    /// Vendor-assigned account/user id, used in per-account API paths.
    pub owner_id: String,
}

impl Session {
    /// `true` once the access token is inside the skew window of expiry.
    pub fn needs_refresh(&self, skew: Duration, now: DateTime<Utc>) -> bool {
        let skew = chrono::Duration::from_std(skew).unwrap_or(chrono::Duration::zero());
        now >= self.expires_at - skew
    }

    /// The `Authorization` header value for this session.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

/// Wire shape of the vendor token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    /// Lifetime of the access token in seconds.
    expires_in: i64,
    user_id: String,
}

/// Shared handle to an account session.
///
/// `ensure_valid` is the only entry point the executor uses: it returns the
/// current session, refreshing (or fully re-authenticating) first when the
/// token is expired or about to be. Cheap to clone via internal `Arc`s when
/// wrapped in one by the caller.
pub struct SessionHandle {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
    /// Refresh this long before actual expiry.
    skew: Duration,
    timeout: Duration,
    current: ArcSwapOption<Session>,
    /// Guards the refresh/re-auth path. Readers never take this lock.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SessionHandle {
    /// Create a handle. No network traffic happens until
    /// [`authenticate`](Self::authenticate) or [`ensure_valid`](Self::ensure_valid).
    pub fn new(
        base_url: Url,
        credentials: Credentials,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            credentials,
            skew: Duration::from_secs(30),
            timeout: transport.timeout,
            current: ArcSwapOption::empty(),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Override the expiry skew window (default 30s).
    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    /// The session as last observed, without any validity check.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.current.load_full()
    }

    /// Drop the current session. The next `ensure_valid` call performs a
    /// full authentication from stored credentials.
    pub fn invalidate(&self) {
        self.current.store(None);
        debug!("session invalidated");
    }

    /// Authenticate from stored credentials, replacing any current session.
    pub async fn authenticate(&self) -> Result<Arc<Session>, Error> {
        let _guard = self.refresh_lock.lock().await;
        self.login_locked().await
    }

    /// Return a session that is valid for at least the skew window,
    /// refreshing or re-authenticating as needed.
    ///
    /// Concurrent callers during expiry are serialized on the refresh lock;
    /// whoever arrives second finds the fresh session under the lock and
    /// returns it without issuing a second request.
    pub async fn ensure_valid(&self) -> Result<Arc<Session>, Error> {
        // Fast path: unexpired session, no lock.
        if let Some(session) = self.current.load_full() {
            if !session.needs_refresh(self.skew, Utc::now()) {
                return Ok(session);
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Double-check: another caller may have refreshed while we waited.
        if let Some(session) = self.current.load_full() {
            if !session.needs_refresh(self.skew, Utc::now()) {
                return Ok(session);
            }
        }

        match self.current.load_full() {
            Some(expired) => match self.refresh_locked(&expired).await {
                Ok(session) => Ok(session),
                Err(Error::TokenRevoked) => {
                    // Refresh token no longer honored: start over from
                    // credentials. InvalidCredentials from here is final.
                    warn!("refresh token revoked, re-authenticating from credentials");
                    self.current.store(None);
                    self.login_locked().await
                }
                Err(e) => Err(e),
            },
            None => self.login_locked().await,
        }
    }

    /// Force a refresh after the vendor rejected the current token.
    ///
    /// `stale` is the session the rejected request used. If another caller
    /// already replaced it, the replacement is returned without a second
    /// refresh request. A revoked refresh token falls back to a full
    /// re-authentication, same as [`ensure_valid`](Self::ensure_valid).
    pub async fn refresh_after_reject(&self, stale: &Arc<Session>) -> Result<Arc<Session>, Error> {
        let _guard = self.refresh_lock.lock().await;

        match self.current.load_full() {
            Some(current) if !Arc::ptr_eq(&current, stale) => Ok(current),
            Some(_) => match self.refresh_locked(stale).await {
                Ok(session) => Ok(session),
                Err(Error::TokenRevoked) => {
                    warn!("refresh token revoked, re-authenticating from credentials");
                    self.current.store(None);
                    self.login_locked().await
                }
                Err(e) => Err(e),
            },
            None => self.login_locked().await,
        }
    }

    // ── Token endpoint calls (refresh lock held) ─────────────────────

    async fn login_locked(&self) -> Result<Arc<Session>, Error> {
        let url = self.token_url()?;
        debug!(%url, "authenticating");

        let body = json!({
            "grant_type": "password",
            "username": self.credentials.username,
            "password": self.credentials.password.expose_secret(),
        });

        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.timeout))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited {
                retry_after: retry_after_hint(resp.headers()),
            });
        }
        if status.is_server_error() {
            return Err(Error::ServerError {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::InvalidCredentials { message });
        }

        let session = self.store_token_response(resp).await?;
        debug!(owner = %session.owner_id, "authentication successful");
        Ok(session)
    }

    async fn refresh_locked(&self, expired: &Session) -> Result<Arc<Session>, Error> {
        let url = self.token_url()?;
        debug!(%url, "refreshing session");

        let body = json!({
            "grant_type": "refresh_token",
            "refresh_token": expired.refresh_token.expose_secret(),
        });

        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.timeout))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited {
                retry_after: retry_after_hint(resp.headers()),
            });
        }
        if status.is_server_error() {
            return Err(Error::ServerError {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            // 400/401 on the refresh grant means the token is gone.
            return Err(Error::TokenRevoked);
        }

        let session = self.store_token_response(resp).await?;
        debug!(expires_at = %session.expires_at, "session refreshed");
        Ok(session)
    }

    /// Parse a token response and swap the new session in atomically.
    async fn store_token_response(&self, resp: reqwest::Response) -> Result<Arc<Session>, Error> {
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::MalformedResponse {
                message: e.to_string(),
            })?;

        let session = Arc::new(Session {
            access_token: SecretString::from(token.access_token),
            refresh_token: SecretString::from(token.refresh_token),
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
            owner_id: token.user_id,
        });

        self.current.store(Some(Arc::clone(&session)));
        Ok(session)
    }

    fn token_url(&self) -> Result<Url, Error> {
        self.base_url.join("oauth/token").map_err(Error::InvalidUrl)
    }
}

/// Extract a `Retry-After` hint in seconds form. HTTP-date form is rare in
/// the vendor APIs this crate targets and is treated as no hint.
pub(crate) fn retry_after_hint(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
