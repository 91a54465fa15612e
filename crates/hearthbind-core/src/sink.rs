// Status/notification sink -- the outbound edge toward the host framework.
//
// The core calls these methods and moves on; it never awaits the host.
// Implementations are expected to queue internally if delivery is slow.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::device::{DeviceId, DeviceStatus, StatusDetail};

/// Receives channel updates and status transitions from the device runtime.
///
/// Both methods are fire-and-forget: they must not block and their return
/// is ignored. The poll loop only ever hands over final classifications,
/// never raw errors.
pub trait StatusSink: Send + Sync {
    fn on_channel_update(&self, device: &DeviceId, channel: &str, value: &Value);

    fn on_status_changed(
        &self,
        device: &DeviceId,
        status: DeviceStatus,
        detail: StatusDetail,
        message: &str,
    );
}

/// One sink event, as forwarded by [`BroadcastSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    ChannelUpdate {
        device: DeviceId,
        channel: String,
        value: Value,
    },
    StatusChanged {
        device: DeviceId,
        status: DeviceStatus,
        detail: StatusDetail,
        message: String,
    },
}

/// A sink that forwards events into a `tokio::sync::broadcast` channel.
///
/// Useful for hosts that consume the runtime reactively, and for tests.
/// Send errors (no active subscribers) are ignored.
pub struct BroadcastSink {
    tx: broadcast::Sender<Arc<SinkEvent>>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SinkEvent>> {
        self.tx.subscribe()
    }
}

impl StatusSink for BroadcastSink {
    fn on_channel_update(&self, device: &DeviceId, channel: &str, value: &Value) {
        let _ = self.tx.send(Arc::new(SinkEvent::ChannelUpdate {
            device: device.clone(),
            channel: channel.to_owned(),
            value: value.clone(),
        }));
    }

    fn on_status_changed(
        &self,
        device: &DeviceId,
        status: DeviceStatus,
        detail: StatusDetail,
        message: &str,
    ) {
        let _ = self.tx.send(Arc::new(SinkEvent::StatusChanged {
            device: device.clone(),
            status,
            detail,
            message: message.to_owned(),
        }));
    }
}
