// Device model shared by the registry, poll loop, and sink.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque device identifier, assigned by the host when configuring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Device status as reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// Not yet determined (before the first successful or fatal tick).
    Unknown,
    Online,
    Offline,
}

/// Why a device is in its current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusDetail {
    None,
    /// First authenticate+fetch has not completed yet.
    Initializing,
    /// Operator action required (bad credentials, invalid config).
    ConfigurationError,
    /// Transient failures crossed the offline threshold; will self-heal.
    CommunicationError,
}

/// One typed channel value produced by a category fetch.
///
/// Values travel as JSON -- the host's channel model decides final typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub channel: String,
    pub value: Value,
}

impl ChannelUpdate {
    pub fn new(channel: impl Into<String>, value: Value) -> Self {
        Self {
            channel: channel.into(),
            value,
        }
    }
}

/// Registry view of one managed device.
///
/// Created on configure, mutated only by the device's poll loop, removed on
/// dispose. Hosts observe it through the registry's watch channel.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub status: DeviceStatus,
    pub detail: StatusDetail,
    pub consecutive_failures: u32,
    /// Wall-clock time of the last successful fetch.
    pub last_seen: Option<DateTime<Utc>>,
    /// When the next poll tick is scheduled.
    pub next_poll_deadline: Option<DateTime<Utc>>,
}

impl DeviceRecord {
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            status: DeviceStatus::Unknown,
            detail: StatusDetail::Initializing,
            consecutive_failures: 0,
            last_seen: None,
            next_poll_deadline: None,
        }
    }
}
