// ── Device client seam ──
//
// The poll loop and service talk to the vendor through `DeviceClient`, a
// narrow async trait. The production implementation (`VendorClient`)
// combines the remote call executor with a vendor adapter and the
// expiring cache; tests substitute a scripted client.
//
// Vendor-specific knowledge lives entirely in `VendorAdapter`: which
// request serves a category, and how its JSON maps to channel updates.
// This keeps per-vendor code a thin translation layer instead of a god
// handler mixing auth, polling, caching, and mapping.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use hearthbind_api::{CallExecutor, VendorRequest, VendorResponse};

use crate::cache::{ExpiringCache, Freshness};
use crate::device::{ChannelUpdate, DeviceId};
use crate::error::DeviceError;

/// Async access to one vendor account on behalf of its devices.
///
/// All methods are `&self`; implementations are shared across devices via
/// `Arc`.
pub trait DeviceClient: Send + Sync + 'static {
    /// Force-fetch one category from the vendor, updating the cache.
    /// Returns the ordered channel updates the category produced.
    fn refresh_category(
        &self,
        device: &DeviceId,
        category: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<Arc<Vec<ChannelUpdate>>, DeviceError>> + Send;

    /// Serve from cache while fresh, fetching only when the entry expired.
    fn category_snapshot(
        &self,
        device: &DeviceId,
        category: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<Arc<Vec<ChannelUpdate>>, DeviceError>> + Send;

    /// Push a user command to the vendor as a write request.
    fn send_command(
        &self,
        device: &DeviceId,
        channel: &str,
        command: Value,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;
}

/// Vendor-specific translation layer.
///
/// Implementations describe requests and map responses; they perform no
/// I/O themselves. The update order returned by `map_response` is the
/// order published to the sink, so adapters emit dependent channels in a
/// fixed sequence (e.g. cumulative usage before instantaneous rate).
pub trait VendorAdapter: Send + Sync {
    /// The fetch request serving one data category of one device.
    fn fetch_request(&self, device: &DeviceId, category: &str)
        -> Result<VendorRequest, DeviceError>;

    /// Translate a category response into ordered channel updates.
    ///
    /// Shape mismatches must surface as [`DeviceError::DataFormat`] --
    /// [`VendorResponse::parse`] already does this for typed bodies.
    fn map_response(
        &self,
        device: &DeviceId,
        category: &str,
        response: &VendorResponse,
    ) -> Result<Vec<ChannelUpdate>, DeviceError>;

    /// The write request for a user command on one channel.
    fn command_request(
        &self,
        device: &DeviceId,
        channel: &str,
        command: &Value,
    ) -> Result<VendorRequest, DeviceError>;
}

type CacheKey = (DeviceId, String);

/// Production [`DeviceClient`]: executor + adapter + expiring cache.
pub struct VendorClient {
    executor: Arc<CallExecutor>,
    adapter: Arc<dyn VendorAdapter>,
    cache: ExpiringCache<CacheKey, Vec<ChannelUpdate>>,
}

impl VendorClient {
    pub fn new(executor: Arc<CallExecutor>, adapter: Arc<dyn VendorAdapter>) -> Self {
        Self {
            executor,
            adapter,
            cache: ExpiringCache::new(),
        }
    }

    async fn fetch_once(
        &self,
        device: &DeviceId,
        category: &str,
    ) -> Result<Vec<ChannelUpdate>, DeviceError> {
        let request = self.adapter.fetch_request(device, category)?;
        let response = self.executor.call(&request).await?;
        self.adapter.map_response(device, category, &response)
    }
}

impl DeviceClient for VendorClient {
    async fn refresh_category(
        &self,
        device: &DeviceId,
        category: &str,
        ttl: Duration,
    ) -> Result<Arc<Vec<ChannelUpdate>>, DeviceError> {
        self.cache
            .refresh((device.clone(), category.to_owned()), ttl, || {
                self.fetch_once(device, category)
            })
            .await
    }

    async fn category_snapshot(
        &self,
        device: &DeviceId,
        category: &str,
        ttl: Duration,
    ) -> Result<Arc<Vec<ChannelUpdate>>, DeviceError> {
        self.cache
            .get_or_fetch(
                (device.clone(), category.to_owned()),
                ttl,
                Freshness::BestEffort,
                || self.fetch_once(device, category),
            )
            .await
    }

    async fn send_command(
        &self,
        device: &DeviceId,
        channel: &str,
        command: Value,
    ) -> Result<(), DeviceError> {
        let request = self.adapter.command_request(device, channel, &command)?;
        self.executor.call(&request).await?;

        // The write changed vendor-side state; drop this device's cached
        // categories so the next read refetches.
        debug!(%device, channel, "command accepted, invalidating device cache");
        self.cache.invalidate_matching(|(id, _)| id == device);
        Ok(())
    }
}
