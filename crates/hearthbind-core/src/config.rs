// ── Per-device runtime configuration ──
//
// These types describe *what* to poll and how aggressively. They carry no
// connection material -- the account-level transport (session, executor)
// is constructed separately and shared across devices. The host or the
// config crate builds a `DeviceConfig` and hands it to `BindingService`.

use std::time::Duration;

use crate::device::DeviceId;
use crate::error::DeviceError;

/// One data category the device exposes (e.g. `"climate"`, `"energy"`).
#[derive(Debug, Clone)]
pub struct CategoryConfig {
    pub id: String,
    /// How often this category's data should be refetched.
    pub refresh_interval: Duration,
}

/// Configuration for one managed device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub id: DeviceId,
    /// Categories in publish order: within a tick, updates are applied in
    /// this order so dependent-channel consumers see consistent snapshots.
    pub categories: Vec<CategoryConfig>,
    /// Consecutive transient failures before the device is reported
    /// OFFLINE. The first failure only degrades it internally.
    pub offline_threshold: u32,
    /// Cap on total requests per minute across this device's categories.
    /// The poll interval is inflated to stay under it.
    pub rate_budget_per_minute: Option<u32>,
    /// Upper bound on the backed-off poll delay while failing.
    pub max_backoff: Duration,
    /// Stagger the first scheduled tick by a bounded, id-derived fraction
    /// of the interval so many devices configured at once do not align.
    pub initial_jitter: bool,
}

impl DeviceConfig {
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            categories: Vec::new(),
            offline_threshold: 2,
            rate_budget_per_minute: None,
            max_backoff: Duration::from_secs(300),
            initial_jitter: true,
        }
    }

    /// Append a category (builder style).
    pub fn category(mut self, id: impl Into<String>, refresh_interval: Duration) -> Self {
        self.categories.push(CategoryConfig {
            id: id.into(),
            refresh_interval,
        });
        self
    }

    pub fn offline_threshold(mut self, threshold: u32) -> Self {
        self.offline_threshold = threshold;
        self
    }

    pub fn rate_budget_per_minute(mut self, budget: u32) -> Self {
        self.rate_budget_per_minute = Some(budget);
        self
    }

    pub fn initial_jitter(mut self, enabled: bool) -> Self {
        self.initial_jitter = enabled;
        self
    }

    /// Validate before scheduling. Violations are configuration errors the
    /// user must fix; nothing is polled for an invalid device.
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.categories.is_empty() {
            return Err(DeviceError::Configuration {
                message: "at least one data category is required".into(),
            });
        }
        if let Some(cat) = self.categories.iter().find(|c| c.refresh_interval.is_zero()) {
            return Err(DeviceError::Configuration {
                message: format!("category '{}' has a zero refresh interval", cat.id),
            });
        }
        if self.offline_threshold == 0 {
            return Err(DeviceError::Configuration {
                message: "offline threshold must be at least 1".into(),
            });
        }
        if self.rate_budget_per_minute == Some(0) {
            return Err(DeviceError::Configuration {
                message: "rate budget must be at least 1 request per minute".into(),
            });
        }
        Ok(())
    }

    /// Derive the device's poll interval.
    ///
    /// Base is the minimum of all category refresh intervals. When a rate
    /// budget is set, the interval is inflated so that even a worst-case
    /// tick (every category due at once) keeps the request rate under
    /// budget.
    pub fn poll_interval(&self) -> Duration {
        let base = self
            .categories
            .iter()
            .map(|c| c.refresh_interval)
            .min()
            .unwrap_or(Duration::from_secs(60));

        let Some(budget) = self.rate_budget_per_minute else {
            return base;
        };

        let worst_case_per_minute =
            60.0 / base.as_secs_f64() * self.categories.len() as f64;
        if worst_case_per_minute <= f64::from(budget) {
            base
        } else {
            Duration::from_secs_f64(
                base.as_secs_f64() * worst_case_per_minute / f64::from(budget),
            )
        }
    }
}
