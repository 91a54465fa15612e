// ── Device poll loop ──
//
// One lightweight task per managed device on the shared runtime. Each
// pass fetches the currently-subscribed data categories that are due,
// publishes their channel updates in configured order, and drives the
// status state machine:
//
//   INITIALIZING -> ONLINE -> {ONLINE, DEGRADED, OFFLINE} -> disposed
//
// DEGRADED is internal: the host keeps seeing ONLINE until the failure
// threshold is crossed. Ticks run sequentially inside the task, so at
// most one tick's requests are in flight per device; a tick that overruns
// the interval causes later ticks to be skipped, never queued.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::DeviceClient;
use crate::config::DeviceConfig;
use crate::device::{DeviceStatus, StatusDetail};
use crate::error::DeviceError;
use crate::registry::DeviceRegistry;
use crate::sink::StatusSink;
use crate::subscription::SubscriptionProvider;

/// Outcome of one poll pass over the due categories.
enum TickOutcome {
    /// At least one category fetched successfully; none failed.
    Success,
    /// Nothing subscribed or due, or the pass was cancelled mid-flight.
    Idle,
    /// Transient failure: advances the offline counter.
    Transient(DeviceError),
    /// Contract mismatch: tick failed, counter untouched.
    Faulted(DeviceError),
    /// Unrecoverable without operator action: polling stops.
    Fatal(DeviceError),
}

pub(crate) struct PollLoop<C: DeviceClient> {
    config: Arc<DeviceConfig>,
    client: Arc<C>,
    subscriptions: Arc<dyn SubscriptionProvider>,
    sink: Arc<dyn StatusSink>,
    registry: Arc<DeviceRegistry>,
    cancel: CancellationToken,
    interval: Duration,
    status: DeviceStatus,
    failures: u32,
    /// Per-category due times. Categories with intervals longer than the
    /// device's poll interval skip ticks until due.
    next_due: std::collections::HashMap<String, Instant>,
}

impl<C: DeviceClient> PollLoop<C> {
    pub(crate) fn new(
        config: Arc<DeviceConfig>,
        client: Arc<C>,
        subscriptions: Arc<dyn SubscriptionProvider>,
        sink: Arc<dyn StatusSink>,
        registry: Arc<DeviceRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        let interval = config.poll_interval();
        Self {
            config,
            client,
            subscriptions,
            sink,
            registry,
            cancel,
            interval,
            status: DeviceStatus::Unknown,
            failures: 0,
            next_due: std::collections::HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        let device = self.config.id.clone();
        debug!(%device, interval_secs = self.interval.as_secs(), "poll loop starting");

        // INITIALIZING: one immediate authenticate+fetch across all
        // configured categories. A fatal error here is terminal -- no
        // polling is ever scheduled for this device.
        let outcome = self.tick(true).await;
        if !self.apply(outcome) {
            return;
        }

        if self.config.initial_jitter {
            let jitter = initial_jitter(self.config.id.as_str(), self.interval);
            if !jitter.is_zero() {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return,
                    () = tokio::time::sleep(jitter) => {}
                }
            }
        }

        loop {
            let delay = self.next_delay();
            self.registry.update(&device, |r| {
                r.next_poll_deadline = Some(
                    Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::zero()),
                );
            });

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            let outcome = self.tick(false).await;
            if !self.apply(outcome) {
                break;
            }
        }

        debug!(%device, "poll loop exiting");
    }

    // ── One pass ─────────────────────────────────────────────────────

    async fn tick(&mut self, initial: bool) -> TickOutcome {
        let device = self.config.id.clone();
        if self.cancel.is_cancelled() {
            return TickOutcome::Idle;
        }

        // The initial pass fetches every configured category: it doubles
        // as credential validation and seeds the cache. Steady-state
        // passes consult the host's subscription snapshot.
        let subscribed: HashSet<String> = if initial {
            self.config.categories.iter().map(|c| c.id.clone()).collect()
        } else {
            self.subscriptions.subscribed_categories(&device)
        };

        if subscribed.is_empty() {
            debug!(%device, "nothing subscribed, skipping tick");
            return TickOutcome::Idle;
        }

        let started = Instant::now();
        let mut fetched_any = false;

        for cat in &self.config.categories {
            if !subscribed.contains(&cat.id) {
                continue;
            }
            if !initial {
                if let Some(due) = self.next_due.get(&cat.id) {
                    if started < *due {
                        continue;
                    }
                }
            }
            if self.cancel.is_cancelled() {
                return TickOutcome::Idle;
            }

            match self
                .client
                .refresh_category(&device, &cat.id, cat.refresh_interval)
                .await
            {
                Ok(updates) => {
                    self.next_due
                        .insert(cat.id.clone(), started + cat.refresh_interval);

                    // Disposed while the request was in flight: the result
                    // is discarded before any side effect.
                    if self.cancel.is_cancelled() {
                        return TickOutcome::Idle;
                    }

                    for update in updates.iter() {
                        self.sink
                            .on_channel_update(&device, &update.channel, &update.value);
                    }
                    fetched_any = true;
                }
                // First failure ends the pass; remaining categories keep
                // their last-known values for this tick.
                Err(e) if e.is_fatal() => return TickOutcome::Fatal(e),
                Err(e) if e.counts_toward_offline() => return TickOutcome::Transient(e),
                Err(e) => return TickOutcome::Faulted(e),
            }
        }

        let elapsed = started.elapsed();
        if elapsed > self.interval {
            warn!(
                %device,
                elapsed_ms = elapsed.as_millis() as u64,
                "tick overran the poll interval; missed ticks are skipped, not queued"
            );
        }

        if fetched_any {
            TickOutcome::Success
        } else {
            TickOutcome::Idle
        }
    }

    // ── State machine ────────────────────────────────────────────────

    /// Fold a tick outcome into the state machine. Returns `false` when
    /// polling must stop.
    fn apply(&mut self, outcome: TickOutcome) -> bool {
        let device = self.config.id.clone();

        match outcome {
            TickOutcome::Success => {
                let was = self.status;
                self.status = DeviceStatus::Online;
                self.failures = 0;
                self.registry.update(&device, |r| {
                    r.status = DeviceStatus::Online;
                    r.detail = StatusDetail::None;
                    r.consecutive_failures = 0;
                    r.last_seen = Some(Utc::now());
                });
                if was != DeviceStatus::Online {
                    self.report(DeviceStatus::Online, StatusDetail::None, "");
                }
                true
            }

            TickOutcome::Idle => true,

            TickOutcome::Transient(err) => {
                self.failures += 1;
                let crossed = self.failures >= self.config.offline_threshold;
                warn!(
                    %device,
                    error = %err,
                    failures = self.failures,
                    "poll tick failed"
                );
                self.registry.update(&device, |r| {
                    r.consecutive_failures = self.failures;
                    if crossed {
                        r.status = DeviceStatus::Offline;
                        r.detail = StatusDetail::CommunicationError;
                    }
                });
                // Below the threshold the device is only degraded: the
                // host keeps seeing ONLINE with last-known values.
                if crossed && self.status != DeviceStatus::Offline {
                    self.status = DeviceStatus::Offline;
                    self.report(
                        DeviceStatus::Offline,
                        StatusDetail::CommunicationError,
                        &err.to_string(),
                    );
                }
                true
            }

            TickOutcome::Faulted(err) => {
                warn!(%device, error = %err, "tick failed with non-communication error");
                true
            }

            TickOutcome::Fatal(err) => {
                info!(%device, error = %err, "fatal error, stopping poll loop");
                self.status = DeviceStatus::Offline;
                self.registry.update(&device, |r| {
                    r.status = DeviceStatus::Offline;
                    r.detail = StatusDetail::ConfigurationError;
                });
                self.report(
                    DeviceStatus::Offline,
                    StatusDetail::ConfigurationError,
                    &err.to_string(),
                );
                false
            }
        }
    }

    fn report(&self, status: DeviceStatus, detail: StatusDetail, message: &str) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!(device = %self.config.id, ?status, ?detail, message, "device status changed");
        self.sink
            .on_status_changed(&self.config.id, status, detail, message);
    }

    /// Normal interval while healthy or merely degraded; once OFFLINE,
    /// doubled per further failure up to the configured cap so a dead
    /// endpoint is not hammered while the device self-heals.
    fn next_delay(&self) -> Duration {
        if self.failures < self.config.offline_threshold {
            return self.interval;
        }
        let exponent = (self.failures - self.config.offline_threshold + 1).min(5);
        let backed_off = self
            .interval
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.config.max_backoff);
        if backed_off < self.interval {
            self.interval
        } else {
            backed_off
        }
    }
}

/// Deterministic start offset in `[0, interval/4)`, derived from the
/// device id so a batch of devices configured together fans out.
fn initial_jitter(device_id: &str, interval: Duration) -> Duration {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    device_id.hash(&mut hasher);
    let fraction = (hasher.finish() % 1000) as f64 / 1000.0;
    interval.mul_f64(fraction * 0.25)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_bounded_and_stable() {
        let interval = Duration::from_secs(60);
        let a = initial_jitter("den-thermostat", interval);
        let b = initial_jitter("den-thermostat", interval);
        assert_eq!(a, b);
        assert!(a < interval / 4);
    }

    #[test]
    fn jitter_differs_across_devices() {
        let interval = Duration::from_secs(60);
        let a = initial_jitter("device-a", interval);
        let b = initial_jitter("device-b", interval);
        assert_ne!(a, b);
    }
}
