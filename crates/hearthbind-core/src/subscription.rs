// Subscription snapshot interface.
//
// The host owns the set of channels currently linked/requested; the poll
// loop only reads a snapshot per tick so it never fetches categories
// nobody is listening to.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::device::DeviceId;

/// Read access to the host's current subscriptions.
///
/// Implementations must be cheap and non-blocking -- the poll loop calls
/// this once at the top of every tick.
pub trait SubscriptionProvider: Send + Sync {
    /// Snapshot of the category ids with at least one subscriber for
    /// `device`. An empty set makes the tick a no-op.
    fn subscribed_categories(&self, device: &DeviceId) -> HashSet<String>;
}

/// A simple owned subscription table.
///
/// Suitable for hosts without dynamic channel linking, and for tests.
/// Hosts with their own link lifecycle implement [`SubscriptionProvider`]
/// directly instead.
#[derive(Default)]
pub struct StaticSubscriptions {
    by_device: DashMap<DeviceId, HashSet<String>>,
}

impl StaticSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the subscribed categories for a device.
    pub fn set(&self, device: DeviceId, categories: impl IntoIterator<Item = String>) {
        self.by_device.insert(device, categories.into_iter().collect());
    }

    /// Add one category subscription.
    pub fn subscribe(&self, device: DeviceId, category: impl Into<String>) {
        self.by_device.entry(device).or_default().insert(category.into());
    }

    /// Remove one category subscription.
    pub fn unsubscribe(&self, device: &DeviceId, category: &str) {
        if let Some(mut set) = self.by_device.get_mut(device) {
            set.remove(category);
        }
    }

    /// Drop all subscriptions for a device.
    pub fn clear(&self, device: &DeviceId) {
        self.by_device.remove(device);
    }
}

impl SubscriptionProvider for StaticSubscriptions {
    fn subscribed_categories(&self, device: &DeviceId) -> HashSet<String> {
        self.by_device
            .get(device)
            .map(|set| set.value().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_and_unsubscribe() {
        let subs = StaticSubscriptions::new();
        let dev = DeviceId::from("meter");

        subs.subscribe(dev.clone(), "energy");
        subs.subscribe(dev.clone(), "water");
        assert_eq!(subs.subscribed_categories(&dev).len(), 2);

        subs.unsubscribe(&dev, "water");
        let snapshot = subs.subscribed_categories(&dev);
        assert!(snapshot.contains("energy"));
        assert!(!snapshot.contains("water"));
    }

    #[test]
    fn unknown_device_has_empty_snapshot() {
        let subs = StaticSubscriptions::new();
        assert!(subs.subscribed_categories(&DeviceId::from("ghost")).is_empty());
    }
}
