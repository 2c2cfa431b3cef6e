//! Event dispatcher
//!
//! Fans attach/detach/status/data/scan/device-found notifications out to at
//! most one listener per kind. Listeners run synchronously on whichever thread
//! raised the event; nothing is queued or coalesced.

use crate::midi::device::{MidiDevice, MidiInputDevice};
use crate::transport::ble::platform::PeerIdentity;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Connection progress reported to the status listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceStatus {
    Idle,
    ServiceDiscovering,
    ServiceDiscoveredOk,
    ServiceDiscoveredFailed,
    CharDiscovering,
    CharDiscoveredOk,
    CharDiscoveredFailed,
    CharRecvData,
    CharEnableWrite,
    Connecting,
    Connected,
    ConnectFailed,
    Disconnected,
    Offline,
    Error,
}

impl DeviceStatus {
    /// Stable numeric code, shared with existing mobile front ends
    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::ServiceDiscovering => 1,
            Self::ServiceDiscoveredOk => 2,
            Self::ServiceDiscoveredFailed => 3,
            Self::CharDiscovering => 4,
            Self::CharDiscoveredOk => 5,
            Self::CharDiscoveredFailed => 6,
            Self::CharRecvData => 7,
            Self::CharEnableWrite => 8,
            Self::Connecting => 9,
            Self::Connected => 10,
            Self::ConnectFailed => 11,
            Self::Disconnected => 12,
            Self::Offline => 13,
            Self::Error => 14,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let status = match code {
            0 => Self::Idle,
            1 => Self::ServiceDiscovering,
            2 => Self::ServiceDiscoveredOk,
            3 => Self::ServiceDiscoveredFailed,
            4 => Self::CharDiscovering,
            5 => Self::CharDiscoveredOk,
            6 => Self::CharDiscoveredFailed,
            7 => Self::CharRecvData,
            8 => Self::CharEnableWrite,
            9 => Self::Connecting,
            10 => Self::Connected,
            11 => Self::ConnectFailed,
            12 => Self::Disconnected,
            13 => Self::Offline,
            14 => Self::Error,
            _ => return None,
        };
        Some(status)
    }

    /// Whether this status ends a connection lifetime
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Offline | Self::Error)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::ServiceDiscovering => "service-discovering",
            Self::ServiceDiscoveredOk => "service-discovered-ok",
            Self::ServiceDiscoveredFailed => "service-discovered-failed",
            Self::CharDiscovering => "char-discovering",
            Self::CharDiscoveredOk => "char-discovered-ok",
            Self::CharDiscoveredFailed => "char-discovered-failed",
            Self::CharRecvData => "char-recv-data",
            Self::CharEnableWrite => "char-enable-write",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ConnectFailed => "connect-failed",
            Self::Disconnected => "disconnected",
            Self::Offline => "offline",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

pub type AttachListener = dyn Fn(&MidiDevice) + Send + Sync;
pub type DetachListener = dyn Fn(&MidiDevice) + Send + Sync;
pub type StatusListener = dyn Fn(&PeerIdentity, DeviceStatus) + Send + Sync;
pub type DataListener = dyn Fn(&MidiInputDevice, &[u8]) + Send + Sync;
/// Receives undecoded notification payloads
pub type RawEventListener = dyn Fn(&MidiInputDevice, &[u8]) + Send + Sync;
pub type ScanStatusListener = dyn Fn(bool) + Send + Sync;
pub type DeviceFoundListener = dyn Fn(&PeerIdentity) + Send + Sync;

/// Single-listener registration slot: last set wins, `None` clears.
pub struct ListenerSlot<L: ?Sized> {
    listener: RwLock<Option<Arc<L>>>,
}

impl<L: ?Sized> ListenerSlot<L> {
    pub fn new() -> Self {
        Self {
            listener: RwLock::new(None),
        }
    }

    pub fn set(&self, listener: Option<Arc<L>>) {
        *self.listener.write() = listener;
    }

    /// Current listener, cloned out so it can be invoked without holding the slot
    pub fn current(&self) -> Option<Arc<L>> {
        self.listener.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.listener.read().is_some()
    }
}

impl<L: ?Sized> Default for ListenerSlot<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes core events to the registered listeners
#[derive(Default)]
pub struct EventDispatcher {
    attached: ListenerSlot<AttachListener>,
    detached: ListenerSlot<DetachListener>,
    status: ListenerSlot<StatusListener>,
    data: ListenerSlot<DataListener>,
    scan_status: ListenerSlot<ScanStatusListener>,
    device_found: ListenerSlot<DeviceFoundListener>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_attached(&self, listener: Option<Arc<AttachListener>>) {
        self.attached.set(listener);
    }

    pub fn set_on_detached(&self, listener: Option<Arc<DetachListener>>) {
        self.detached.set(listener);
    }

    pub fn set_on_status(&self, listener: Option<Arc<StatusListener>>) {
        self.status.set(listener);
    }

    pub fn set_on_data(&self, listener: Option<Arc<DataListener>>) {
        self.data.set(listener);
    }

    pub fn set_on_scan_status(&self, listener: Option<Arc<ScanStatusListener>>) {
        self.scan_status.set(listener);
    }

    pub fn set_on_device_found(&self, listener: Option<Arc<DeviceFoundListener>>) {
        self.device_found.set(listener);
    }

    pub fn attached(&self, device: &MidiDevice) {
        if let Some(listener) = self.attached.current() {
            listener(device);
        }
    }

    pub fn detached(&self, device: &MidiDevice) {
        if let Some(listener) = self.detached.current() {
            listener(device);
        }
    }

    pub fn status(&self, peer: &PeerIdentity, status: DeviceStatus) {
        trace!("{} -> {}", peer.address(), status);
        if let Some(listener) = self.status.current() {
            listener(peer, status);
        }
    }

    pub fn data(&self, device: &MidiInputDevice, data: &[u8]) {
        if let Some(listener) = self.data.current() {
            listener(device, data);
        }
    }

    pub fn scan_status(&self, scanning: bool) {
        if let Some(listener) = self.scan_status.current() {
            listener(scanning);
        }
    }

    pub fn device_found(&self, peer: &PeerIdentity) {
        if let Some(listener) = self.device_found.current() {
            listener(peer);
        }
    }
}
