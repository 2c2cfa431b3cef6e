//! GATT session negotiator
//!
//! Drives a peer from "connected" through service discovery, optional bonding
//! and notification setup, to attached MIDI devices. Every step is triggered
//! by a platform callback; nothing here blocks or waits.

use crate::midi::device::{MidiDevice, MidiInputDevice, MidiOutputDevice};
use crate::midi::events::{DataListener, DeviceStatus, EventDispatcher};
use crate::session::registry::{AttachOutcome, RemovedSession, SessionRegistry};
use crate::session::{GattSession, PendingBond, SessionState};
use crate::transport::ble::gatt::{
    BondState, ConnectionState, GattAttribute, GattProfile, MidiServiceIds,
    CLIENT_CHARACTERISTIC_CONFIG_UUID, ENABLE_NOTIFICATION_VALUE,
};
use crate::transport::ble::platform::{BlePlatform, PeerIdentity};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// What a callback did to the negotiation for its peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// Late, duplicate or unrelated callback
    Ignored,
    InProgress,
    /// Devices are attached and configured
    Attached,
    Failed,
    /// The session was torn down
    Closed,
}

impl Negotiation {
    /// Whether the connect attempt for this peer has finished either way
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Attached | Self::Failed | Self::Closed)
    }
}

fn session_state_for(terminal: DeviceStatus) -> SessionState {
    match terminal {
        DeviceStatus::Offline => SessionState::Offline,
        DeviceStatus::Error => SessionState::Error,
        _ => SessionState::Disconnected,
    }
}

pub struct GattNegotiator {
    platform: Arc<dyn BlePlatform>,
    registry: Arc<SessionRegistry>,
    events: Arc<EventDispatcher>,
    ids: MidiServiceIds,
    needs_bonding: AtomicBool,
    default_max_write_len: usize,
    next_session_id: AtomicU64,
    /// Connect requests issued but not yet answered by the platform
    pending: Mutex<HashMap<String, PeerIdentity>>,
}

impl GattNegotiator {
    pub fn new(
        platform: Arc<dyn BlePlatform>,
        registry: Arc<SessionRegistry>,
        events: Arc<EventDispatcher>,
        ids: MidiServiceIds,
        needs_bonding: bool,
        default_max_write_len: usize,
    ) -> Self {
        Self {
            platform,
            registry,
            events,
            ids,
            needs_bonding: AtomicBool::new(needs_bonding),
            default_max_write_len,
            next_session_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Applies to sessions created after the call
    pub fn set_needs_bonding(&self, needs_bonding: bool) {
        self.needs_bonding.store(needs_bonding, Ordering::Release);
    }

    pub fn needs_bonding(&self) -> bool {
        self.needs_bonding.load(Ordering::Acquire)
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.registry.contains(address)
    }

    pub fn is_pending(&self, address: &str) -> bool {
        self.pending.lock().contains_key(address)
    }

    /// Ask the platform to connect. Returns `true` if already connected.
    pub fn connect(&self, peer: &PeerIdentity) -> bool {
        if self.registry.contains(peer.address()) {
            debug!("{} already connected", peer);
            return true;
        }

        self.events.status(peer, DeviceStatus::Connecting);
        self.pending
            .lock()
            .insert(peer.address().to_string(), peer.clone());

        if !self.platform.connect(peer) {
            self.pending.lock().remove(peer.address());
            warn!("Connect to {} refused by platform", peer);
            self.events.status(peer, DeviceStatus::Error);
            return false;
        }

        info!("Connecting to {}", peer);
        true
    }

    pub fn on_connection_state_change(
        &self,
        peer: &PeerIdentity,
        state: ConnectionState,
    ) -> Negotiation {
        match state {
            ConnectionState::Connected => self.on_connected(peer),
            ConnectionState::Disconnected => self.on_disconnected(peer),
            ConnectionState::Connecting | ConnectionState::Disconnecting => {
                trace!("{}: link {:?}", peer, state);
                Negotiation::Ignored
            }
        }
    }

    fn on_connected(&self, peer: &PeerIdentity) -> Negotiation {
        if self.registry.contains(peer.address()) {
            debug!("{}: duplicate connected callback", peer);
            return Negotiation::Ignored;
        }
        self.pending.lock().remove(peer.address());

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(GattSession::new(
            id,
            peer.clone(),
            self.platform.clone(),
            self.needs_bonding(),
            self.default_max_write_len,
        ));
        advance(&session, SessionState::Connecting);
        advance(&session, SessionState::ServiceDiscovering);

        if !self.registry.insert_session(session) {
            debug!("{}: lost session insert race", peer);
            return Negotiation::Ignored;
        }

        info!("Connected to {}", peer);
        self.events.status(peer, DeviceStatus::ServiceDiscovering);

        if !self.platform.discover_services(peer) {
            warn!("{}: service discovery refused", peer);
            self.disconnect(peer.address(), DeviceStatus::Disconnected);
            return Negotiation::Closed;
        }

        Negotiation::InProgress
    }

    fn on_disconnected(&self, peer: &PeerIdentity) -> Negotiation {
        if self.disconnect(peer.address(), DeviceStatus::Disconnected) {
            return Negotiation::Closed;
        }

        if self.pending.lock().remove(peer.address()).is_some() {
            warn!("Connect to {} failed", peer);
            self.events.status(peer, DeviceStatus::ConnectFailed);
            return Negotiation::Failed;
        }

        Negotiation::Ignored
    }

    pub fn on_services_discovered(
        &self,
        address: &str,
        success: bool,
        attributes: &[GattAttribute],
    ) -> Negotiation {
        let Some(session) = self.registry.session(address) else {
            debug!("{}: discovery result without session", address);
            return Negotiation::Ignored;
        };
        let peer = session.peer().clone();

        if !success {
            if session
                .transition(SessionState::ServiceDiscoveredFailed)
                .is_err()
            {
                return Negotiation::Ignored;
            }
            warn!("{}: service discovery failed", peer);
            self.events
                .status(&peer, DeviceStatus::ServiceDiscoveredFailed);
            return Negotiation::Failed;
        }

        if let Err(e) = session.transition(SessionState::ServiceDiscoveredOk) {
            debug!("{}: ignoring discovery result ({})", peer, e);
            return Negotiation::Ignored;
        }
        self.events.status(&peer, DeviceStatus::ServiceDiscoveredOk);
        self.events.status(&peer, DeviceStatus::CharDiscovering);

        let endpoints = GattProfile::from_attributes(attributes)
            .locate_midi(&self.ids)
            .filter(|endpoints| !endpoints.is_empty());
        let Some(endpoints) = endpoints else {
            warn!("{}: no MIDI service or characteristic", peer);
            self.events.status(&peer, DeviceStatus::CharDiscoveredFailed);
            return Negotiation::Failed;
        };

        let input = endpoints.input.map(|characteristic| {
            let device = Arc::new(MidiInputDevice::new(&session, characteristic));
            device.attach_data_listener(Some(self.data_forwarder()));
            device
        });
        let output = endpoints
            .output
            .map(|characteristic| Arc::new(MidiOutputDevice::new(&session, characteristic)));

        match self
            .registry
            .attach(&session, input.clone(), output.clone())
        {
            AttachOutcome::Attached => {}
            outcome => {
                debug!("{}: devices not attached ({:?})", peer, outcome);
                return Negotiation::Ignored;
            }
        }

        self.events.status(&peer, DeviceStatus::CharDiscoveredOk);
        if !self.registry.is_current(&session) {
            debug!("{}: torn down before attach was announced", peer);
            return Negotiation::Closed;
        }
        info!(
            "{}: MIDI attached (input: {}, output: {})",
            peer,
            input.is_some(),
            output.is_some()
        );
        let devices = input
            .iter()
            .map(|input| MidiDevice::Input(input.clone()))
            .chain(output.iter().map(|output| MidiDevice::Output(output.clone())));
        for device in devices {
            // A listener may have torn the peer down already
            if !self.registry.is_current(&session) {
                return Negotiation::Closed;
            }
            self.events.attached(&device);
        }

        if !self.registry.is_current(&session) {
            return Negotiation::Closed;
        }

        if session.bonding_required() && self.platform.bond_state(&peer) != BondState::Bonded {
            advance(&session, SessionState::Bonding);
            session.set_pending_bond(PendingBond { input, output });
            if !self.platform.create_bond(&peer) {
                warn!("{}: bond request refused", peer);
                return Negotiation::Failed;
            }
            debug!("{}: waiting for bond", peer);
            return Negotiation::InProgress;
        }

        if self.configure(&session, input.as_deref(), output.as_deref()) {
            Negotiation::Attached
        } else {
            Negotiation::Closed
        }
    }

    pub fn on_bond_state_changed(&self, address: &str, state: BondState) -> Negotiation {
        let Some(session) = self.registry.session(address) else {
            return Negotiation::Ignored;
        };

        match state {
            BondState::Bonding => Negotiation::Ignored,
            BondState::Bonded => match session.take_pending_bond() {
                Some(pending) => {
                    if !self.registry.is_current(&session) {
                        return Negotiation::Ignored;
                    }
                    info!("{}: bonded", session.peer());
                    if self.configure(
                        &session,
                        pending.input.as_deref(),
                        pending.output.as_deref(),
                    ) {
                        Negotiation::Attached
                    } else {
                        Negotiation::Closed
                    }
                }
                None => Negotiation::Ignored,
            },
            BondState::None => match session.take_pending_bond() {
                Some(_) => {
                    warn!("{}: bonding failed", session.peer());
                    self.events
                        .status(session.peer(), DeviceStatus::ConnectFailed);
                    Negotiation::Failed
                }
                None => Negotiation::Ignored,
            },
        }
    }

    pub fn on_characteristic_changed(&self, address: &str, characteristic: Uuid, value: &[u8]) {
        let inputs = self.registry.inputs_for(address);
        let Some(first) = inputs.first() else {
            return;
        };

        trace!("{}: {} bytes on {}", address, value.len(), characteristic);
        self.events.status(first.peer(), DeviceStatus::CharRecvData);

        for input in inputs
            .iter()
            .filter(|input| input.characteristic() == characteristic)
        {
            input.deliver(value);
        }
    }

    pub fn on_descriptor_write(
        &self,
        address: &str,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
        success: bool,
    ) {
        let Some(session) = self.registry.session(address) else {
            return;
        };

        if !success {
            warn!("{}: descriptor {} write failed", session.peer(), descriptor);
            return;
        }

        if descriptor == CLIENT_CHARACTERISTIC_CONFIG_UUID && value == ENABLE_NOTIFICATION_VALUE {
            self.events
                .status(session.peer(), DeviceStatus::CharEnableWrite);
            self.platform
                .set_characteristic_notification(session.peer(), characteristic, true);
        }
    }

    /// Tear down everything held for `address` and report `terminal`.
    ///
    /// Returns `false` when there was nothing to tear down.
    pub fn disconnect(&self, address: &str, terminal: DeviceStatus) -> bool {
        self.pending.lock().remove(address);
        match self.registry.remove(address) {
            Some(removed) => {
                self.announce_removed(removed, terminal);
                true
            }
            None => false,
        }
    }

    /// Tear down every session and forget pending connects
    pub fn disconnect_all(&self, terminal: DeviceStatus) -> usize {
        self.pending.lock().clear();
        let removed = self.registry.drain();
        let count = removed.len();
        for session in removed {
            self.announce_removed(session, terminal);
        }
        count
    }

    fn announce_removed(&self, removed: RemovedSession, terminal: DeviceStatus) {
        let RemovedSession {
            session,
            inputs,
            outputs,
        } = removed;

        advance(&session, session_state_for(terminal));
        info!(
            "Disconnected from {} ({} input, {} output)",
            session.peer(),
            inputs.len(),
            outputs.len()
        );

        for input in inputs {
            self.events.detached(&MidiDevice::Input(input));
        }
        for output in outputs {
            self.events.detached(&MidiDevice::Output(output));
        }
        self.events.status(session.peer(), terminal);
    }

    /// Wire up notifications and announce `Connected`.
    ///
    /// Returns `false` without announcing anything when the session was torn
    /// down underneath.
    fn configure(
        &self,
        session: &GattSession,
        input: Option<&MidiInputDevice>,
        output: Option<&MidiOutputDevice>,
    ) -> bool {
        if let Err(e) = session.transition(SessionState::CharacteristicsReady) {
            debug!("{}: not configuring ({})", session.peer(), e);
            return false;
        }
        if let Some(input) = input {
            input.configure();
        }
        if let Some(output) = output {
            output.configure();
        }
        if let Err(e) = session.transition(SessionState::Connected) {
            debug!("{}: torn down while configuring ({})", session.peer(), e);
            return false;
        }
        if !self.registry.is_current(session) {
            return false;
        }
        self.events.status(session.peer(), DeviceStatus::Connected);
        true
    }

    fn data_forwarder(&self) -> Arc<DataListener> {
        let events = self.events.clone();
        Arc::new(move |device: &MidiInputDevice, data: &[u8]| events.data(device, data))
    }
}

fn advance(session: &GattSession, to: SessionState) {
    if let Err(e) = session.transition(to) {
        debug!("{}: {}", session.peer(), e);
    }
}
