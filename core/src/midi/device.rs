//! MIDI input/output device handles
//!
//! Each handle is bound to one characteristic on one peer and holds only a
//! weak reference to the session that owns the link. Handles outlive their
//! session safely: once the session is torn down they go inert.

use crate::midi::events::{DataListener, ListenerSlot, RawEventListener};
use crate::session::GattSession;
use crate::transport::ble::codec;
use crate::transport::ble::gatt::{
    DiscoveredCharacteristic, WriteType, CLIENT_CHARACTERISTIC_CONFIG_UUID,
    ENABLE_NOTIFICATION_VALUE,
};
use crate::transport::ble::platform::PeerIdentity;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// MIDI-in endpoint: a notifying characteristic on a peer
pub struct MidiInputDevice {
    peer: PeerIdentity,
    characteristic: DiscoveredCharacteristic,
    session: RwLock<Weak<GattSession>>,
    data_listener: ListenerSlot<DataListener>,
    raw_listener: ListenerSlot<RawEventListener>,
    stopped: AtomicBool,
}

impl MidiInputDevice {
    pub(crate) fn new(session: &Arc<GattSession>, characteristic: DiscoveredCharacteristic) -> Self {
        Self {
            peer: session.peer().clone(),
            characteristic,
            session: RwLock::new(Arc::downgrade(session)),
            data_listener: ListenerSlot::new(),
            raw_listener: ListenerSlot::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Peer address
    pub fn identity(&self) -> &str {
        self.peer.address()
    }

    /// Peer name, or the address when the peer advertises none
    pub fn display_name(&self) -> &str {
        self.peer.name().unwrap_or_else(|| self.peer.address())
    }

    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    pub fn characteristic(&self) -> Uuid {
        self.characteristic.uuid
    }

    /// Whether the device is still bound to a live session
    pub fn is_active(&self) -> bool {
        !self.stopped.load(Ordering::Acquire) && self.session.read().upgrade().is_some()
    }

    /// Replace the decoded-data listener; `None` detaches it
    pub fn attach_data_listener(&self, listener: Option<Arc<DataListener>>) {
        self.data_listener.set(listener);
    }

    /// Replace the raw payload listener; `None` detaches it
    pub fn attach_raw_event_listener(&self, listener: Option<Arc<RawEventListener>>) {
        self.raw_listener.set(listener);
    }

    /// Handle one notification payload from the characteristic
    pub(crate) fn deliver(&self, raw: &[u8]) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }

        if let Some(listener) = self.raw_listener.current() {
            listener(self, raw);
        }

        let Some(midi) = codec::decode(raw) else {
            trace!("{}: notification without MIDI data", self.identity());
            return;
        };
        if midi.is_empty() {
            return;
        }

        if let Some(listener) = self.data_listener.current() {
            listener(self, &midi);
        }
    }

    /// Turn on notifications for the characteristic
    pub(crate) fn configure(&self) -> bool {
        let Some(session) = self.session.read().upgrade() else {
            return false;
        };
        let platform = session.platform();
        let uuid = self.characteristic.uuid;

        let enabled = platform.set_characteristic_notification(&self.peer, uuid, true);
        if !enabled {
            warn!("{}: notification enable refused for {}", self.identity(), uuid);
        }

        if self.characteristic.has_cccd()
            && !platform.write_descriptor(
                &self.peer,
                uuid,
                CLIENT_CHARACTERISTIC_CONFIG_UUID,
                &ENABLE_NOTIFICATION_VALUE,
            )
        {
            warn!("{}: CCCD write refused for {}", self.identity(), uuid);
        }

        platform.read_characteristic(&self.peer, uuid);
        enabled
    }

    /// Stop delivery, drop listeners and the session reference
    pub(crate) fn clear(&self) {
        self.stopped.store(true, Ordering::Release);
        self.data_listener.set(None);
        self.raw_listener.set(None);
        *self.session.write() = Weak::new();
    }
}

impl PartialEq for MidiInputDevice {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity() && self.characteristic() == other.characteristic()
    }
}

impl Eq for MidiInputDevice {}

impl Hash for MidiInputDevice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
        self.characteristic().hash(state);
    }
}

impl fmt::Debug for MidiInputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MidiInputDevice")
            .field("peer", &self.peer)
            .field("characteristic", &self.characteristic.uuid)
            .field("active", &self.is_active())
            .finish()
    }
}

impl fmt::Display for MidiInputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// MIDI-out endpoint: a writable characteristic on a peer
pub struct MidiOutputDevice {
    peer: PeerIdentity,
    characteristic: DiscoveredCharacteristic,
    session: RwLock<Weak<GattSession>>,
    write_type: Mutex<WriteType>,
}

impl MidiOutputDevice {
    pub(crate) fn new(session: &Arc<GattSession>, characteristic: DiscoveredCharacteristic) -> Self {
        Self {
            peer: session.peer().clone(),
            characteristic,
            session: RwLock::new(Arc::downgrade(session)),
            write_type: Mutex::new(WriteType::WithResponse),
        }
    }

    pub fn identity(&self) -> &str {
        self.peer.address()
    }

    pub fn display_name(&self) -> &str {
        self.peer.name().unwrap_or_else(|| self.peer.address())
    }

    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    pub fn characteristic(&self) -> Uuid {
        self.characteristic.uuid
    }

    pub fn write_type(&self) -> WriteType {
        *self.write_type.lock()
    }

    pub fn is_active(&self) -> bool {
        self.session.read().upgrade().is_some()
    }

    /// Send MIDI bytes to the peer.
    ///
    /// Returns `false` if the device is detached or any write is refused.
    /// Remaining chunks are dropped after the first failure. Failures never
    /// tear the session down.
    pub fn send(&self, midi: &[u8]) -> bool {
        let Some(session) = self.session.read().upgrade() else {
            warn!("{}: send on detached output device", self.identity());
            return false;
        };

        let write_type = self.write_type();
        let writes = codec::encode(midi, session.max_write_len());
        let total = writes.len();

        for (index, chunk) in writes.iter().enumerate() {
            match session.platform().write_characteristic(
                &self.peer,
                self.characteristic.uuid,
                chunk,
                write_type,
            ) {
                Ok(()) => trace!(
                    "{}: wrote chunk {}/{} ({} bytes)",
                    self.identity(),
                    index + 1,
                    total,
                    chunk.len()
                ),
                Err(e) => {
                    warn!(
                        "{}: write {}/{} failed: {}",
                        self.identity(),
                        index + 1,
                        total,
                        e
                    );
                    return false;
                }
            }
        }

        true
    }

    /// Switch to unacknowledged writes for latency
    pub(crate) fn configure(&self) {
        *self.write_type.lock() = WriteType::WithoutResponse;
        debug!("{}: output write type set to {:?}", self.identity(), WriteType::WithoutResponse);
    }

    pub(crate) fn clear(&self) {
        *self.session.write() = Weak::new();
    }
}

impl PartialEq for MidiOutputDevice {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity() && self.characteristic() == other.characteristic()
    }
}

impl Eq for MidiOutputDevice {}

impl Hash for MidiOutputDevice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
        self.characteristic().hash(state);
    }
}

impl fmt::Debug for MidiOutputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MidiOutputDevice")
            .field("peer", &self.peer)
            .field("characteristic", &self.characteristic.uuid)
            .field("write_type", &self.write_type())
            .finish()
    }
}

impl fmt::Display for MidiOutputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Either kind of device, as carried by attach/detach events
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MidiDevice {
    Input(Arc<MidiInputDevice>),
    Output(Arc<MidiOutputDevice>),
}

impl MidiDevice {
    pub fn identity(&self) -> &str {
        match self {
            Self::Input(device) => device.identity(),
            Self::Output(device) => device.identity(),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::Input(device) => device.display_name(),
            Self::Output(device) => device.display_name(),
        }
    }

    pub fn characteristic(&self) -> Uuid {
        match self {
            Self::Input(device) => device.characteristic(),
            Self::Output(device) => device.characteristic(),
        }
    }

    pub fn as_input(&self) -> Option<&Arc<MidiInputDevice>> {
        match self {
            Self::Input(device) => Some(device),
            Self::Output(_) => None,
        }
    }

    pub fn as_output(&self) -> Option<&Arc<MidiOutputDevice>> {
        match self {
            Self::Output(device) => Some(device),
            Self::Input(_) => None,
        }
    }
}
