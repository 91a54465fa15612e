// ── Binding service ──
//
// The host-facing surface: configure/dispose devices, route user
// commands, shut everything down. Owns the device registry and the task
// handle for every poll loop. One service per vendor account -- devices
// under it share the account's client, session, and cache.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::DeviceClient;
use crate::config::DeviceConfig;
use crate::device::{DeviceId, DeviceRecord, DeviceStatus, StatusDetail};
use crate::error::DeviceError;
use crate::poll::PollLoop;
use crate::registry::DeviceRegistry;
use crate::sink::StatusSink;
use crate::subscription::SubscriptionProvider;

/// A user command addressed to one channel of one device.
#[derive(Debug, Clone)]
pub enum Command {
    /// Re-publish current values for the device's subscribed categories,
    /// served from cache while fresh and fetched otherwise.
    Refresh,
    /// Write a value to the vendor.
    Write(Value),
}

struct ManagedDevice {
    config: Arc<DeviceConfig>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Lifecycle manager for all devices of one vendor account.
pub struct BindingService<C: DeviceClient> {
    client: Arc<C>,
    sink: Arc<dyn StatusSink>,
    subscriptions: Arc<dyn SubscriptionProvider>,
    registry: Arc<DeviceRegistry>,
    devices: DashMap<DeviceId, ManagedDevice>,
}

impl<C: DeviceClient> BindingService<C> {
    pub fn new(
        client: Arc<C>,
        sink: Arc<dyn StatusSink>,
        subscriptions: Arc<dyn SubscriptionProvider>,
    ) -> Self {
        Self {
            client,
            sink,
            subscriptions,
            registry: Arc::new(DeviceRegistry::new()),
            devices: DashMap::new(),
        }
    }

    /// The registry of managed devices, for observation.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Start managing a device: validate its configuration and spawn its
    /// poll loop.
    ///
    /// Invalid configuration reports the device OFFLINE with a
    /// configuration error and schedules nothing. Configuring an already
    /// managed id replaces its loop.
    pub async fn configure(&self, config: DeviceConfig) -> Result<(), DeviceError> {
        let id = config.id.clone();

        if let Err(e) = config.validate() {
            let mut record = DeviceRecord::new(id.clone());
            record.status = DeviceStatus::Offline;
            record.detail = StatusDetail::ConfigurationError;
            self.registry.insert(record);
            self.sink.on_status_changed(
                &id,
                DeviceStatus::Offline,
                StatusDetail::ConfigurationError,
                &e.to_string(),
            );
            return Err(e);
        }

        if self.devices.contains_key(&id) {
            debug!(device = %id, "reconfiguring, replacing existing poll loop");
            self.dispose(&id).await;
        }

        self.registry.insert(DeviceRecord::new(id.clone()));

        let config = Arc::new(config);
        let cancel = CancellationToken::new();
        let poll_loop = PollLoop::new(
            Arc::clone(&config),
            Arc::clone(&self.client),
            Arc::clone(&self.subscriptions),
            Arc::clone(&self.sink),
            Arc::clone(&self.registry),
            cancel.clone(),
        );
        let handle = tokio::spawn(poll_loop.run());

        self.devices.insert(
            id.clone(),
            ManagedDevice {
                config,
                cancel,
                handle,
            },
        );
        info!(device = %id, "device configured");
        Ok(())
    }

    /// Stop managing a device: cancel its poll loop, await the task, and
    /// drop its record.
    ///
    /// Idempotent -- disposing an unmanaged id is a logged no-op. An
    /// in-flight request at disposal time completes but its result is
    /// discarded by the loop's cancellation check.
    pub async fn dispose(&self, id: &DeviceId) {
        let Some((_, managed)) = self.devices.remove(id) else {
            // Covers devices that failed validation (record, no task) and
            // repeated dispose calls.
            if self.registry.remove(id).is_some() {
                debug!(device = %id, "removed record for unscheduled device");
            } else {
                debug!(device = %id, "dispose for unmanaged device ignored");
            }
            return;
        };

        managed.cancel.cancel();
        if let Err(e) = managed.handle.await {
            warn!(device = %id, error = %e, "poll task terminated abnormally");
        }

        self.registry.remove(id);
        info!(device = %id, "device disposed");
    }

    /// Route a user command.
    ///
    /// Writes pass straight through to the vendor; `Refresh` re-publishes
    /// the subscribed categories from cache, fetching only entries whose
    /// TTL expired.
    pub async fn handle_command(
        &self,
        id: &DeviceId,
        channel: &str,
        command: Command,
    ) -> Result<(), DeviceError> {
        let config = self
            .devices
            .get(id)
            .map(|m| Arc::clone(&m.config))
            .ok_or_else(|| DeviceError::UnknownDevice(id.clone()))?;

        match command {
            Command::Refresh => {
                let subscribed = self.subscriptions.subscribed_categories(id);
                for cat in &config.categories {
                    if !subscribed.contains(&cat.id) {
                        continue;
                    }
                    let updates = self
                        .client
                        .category_snapshot(id, &cat.id, cat.refresh_interval)
                        .await?;
                    for update in updates.iter() {
                        self.sink.on_channel_update(id, &update.channel, &update.value);
                    }
                }
                Ok(())
            }
            Command::Write(value) => self.client.send_command(id, channel, value).await,
        }
    }

    /// Dispose every managed device. Used on host shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<DeviceId> = self.devices.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.dispose(&id).await;
        }
        debug!("binding service shut down");
    }
}
