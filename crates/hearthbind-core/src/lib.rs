// hearthbind-core: the generic device runtime between a vendor transport
// and the host automation framework.
//
// A host configures devices through `BindingService`; each device gets a
// poll loop that fetches subscribed data categories through a shared
// `DeviceClient`, publishes channel updates to the `StatusSink`, and drives
// ONLINE/OFFLINE transitions from the classified error taxonomy.

pub mod cache;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
mod poll;
pub mod registry;
pub mod service;
pub mod sink;
pub mod subscription;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cache::{ExpiringCache, Freshness};
pub use client::{DeviceClient, VendorAdapter, VendorClient};
pub use config::{CategoryConfig, DeviceConfig};
pub use device::{ChannelUpdate, DeviceId, DeviceRecord, DeviceStatus, StatusDetail};
pub use error::DeviceError;
pub use registry::DeviceRegistry;
pub use service::{BindingService, Command};
pub use sink::{BroadcastSink, SinkEvent, StatusSink};
pub use subscription::{StaticSubscriptions, SubscriptionProvider};
