//! GATT sessions
//!
//! A `GattSession` owns the low-level connection to one peer for the lifetime
//! of that connection. The negotiator advances its `SessionState`; the
//! registry owns the only strong reference.

pub mod negotiator;
pub mod registry;

use crate::midi::device::{MidiInputDevice, MidiOutputDevice};
use crate::transport::ble::platform::{BlePlatform, PeerIdentity};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use negotiator::{GattNegotiator, Negotiation};
pub use registry::{AttachOutcome, RemovedSession, SessionRegistry};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

/// Connection lifecycle of one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    ServiceDiscovering,
    ServiceDiscoveredOk,
    ServiceDiscoveredFailed,
    Bonding,
    CharacteristicsReady,
    Connected,
    Disconnected,
    /// Adapter went away underneath the session
    Offline,
    /// Fatal transport failure
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Offline | Self::Error)
    }

    /// Whether `self -> to` is an edge of the connection state machine
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }
        if to.is_terminal() {
            return true;
        }

        matches!(
            (self, to),
            (Idle, Connecting)
                | (Connecting, ServiceDiscovering)
                | (ServiceDiscovering, ServiceDiscoveredOk)
                | (ServiceDiscovering, ServiceDiscoveredFailed)
                | (ServiceDiscoveredOk, Bonding)
                | (ServiceDiscoveredOk, CharacteristicsReady)
                | (Bonding, CharacteristicsReady)
                | (CharacteristicsReady, Connected)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Devices waiting for the peer to finish bonding before they are configured
#[derive(Debug, Clone, Default)]
pub struct PendingBond {
    pub input: Option<Arc<MidiInputDevice>>,
    pub output: Option<Arc<MidiOutputDevice>>,
}

/// Live GATT connection to one peer
pub struct GattSession {
    id: u64,
    peer: PeerIdentity,
    platform: Arc<dyn BlePlatform>,
    state: Mutex<SessionState>,
    bonding_required: bool,
    default_max_write_len: usize,
    pending_bond: Mutex<Option<PendingBond>>,
}

impl GattSession {
    pub fn new(
        id: u64,
        peer: PeerIdentity,
        platform: Arc<dyn BlePlatform>,
        bonding_required: bool,
        default_max_write_len: usize,
    ) -> Self {
        Self {
            id,
            peer,
            platform,
            state: Mutex::new(SessionState::Idle),
            bonding_required,
            default_max_write_len,
            pending_bond: Mutex::new(None),
        }
    }

    /// Unique per connection lifetime; a reconnect gets a new id
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    pub fn address(&self) -> &str {
        self.peer.address()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn bonding_required(&self) -> bool {
        self.bonding_required
    }

    pub fn platform(&self) -> &dyn BlePlatform {
        self.platform.as_ref()
    }

    /// Write payload limit for this link
    pub fn max_write_len(&self) -> usize {
        self.platform
            .max_write_len(&self.peer)
            .unwrap_or(self.default_max_write_len)
    }

    /// Advance the state machine, refusing edges it does not define
    pub fn transition(&self, to: SessionState) -> Result<SessionState, SessionError> {
        let mut state = self.state.lock();
        let from = *state;
        if !from.can_transition(to) {
            return Err(SessionError::InvalidTransition { from, to });
        }
        *state = to;
        debug!("Session {} ({}): {} -> {}", self.id, self.peer.address(), from, to);
        Ok(from)
    }

    pub fn set_pending_bond(&self, pending: PendingBond) {
        *self.pending_bond.lock() = Some(pending);
    }

    pub fn take_pending_bond(&self) -> Option<PendingBond> {
        self.pending_bond.lock().take()
    }

    pub fn has_pending_bond(&self) -> bool {
        self.pending_bond.lock().is_some()
    }

    /// Drop the link and release the platform handle
    pub(crate) fn close(&self) {
        self.platform.disconnect(&self.peer);
        self.platform.close(&self.peer);
    }
}

impl fmt::Debug for GattSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GattSession")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("bonding_required", &self.bonding_required)
            .finish()
    }
}
