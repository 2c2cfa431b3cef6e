//! BLE-MIDI central
//!
//! The facade applications talk to. It owns the scanner, the negotiator and
//! the session registry, and is the `GattCallbackHandler` the platform reports
//! into.

use crate::config::{CentralConfig, ConfigError};
use crate::midi::device::{MidiDevice, MidiInputDevice, MidiOutputDevice};
use crate::midi::events::{
    AttachListener, DataListener, DetachListener, DeviceFoundListener, DeviceStatus,
    EventDispatcher, ScanStatusListener, StatusListener,
};
use crate::session::{GattNegotiator, Negotiation, SessionRegistry};
use crate::transport::ble::gatt::{BondState, ConnectionState, GattAttribute};
use crate::transport::ble::platform::{
    AdapterState, BlePlatform, GattCallbackHandler, PeerIdentity,
};
use crate::transport::ble::scanner::{BleScanner, ScannerError};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Faults raised once at construction
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("Bluetooth LE is not supported on this host")]
    BleUnsupported,
    #[error("No Bluetooth adapter available")]
    AdapterUnavailable,
    #[error("Bluetooth is disabled")]
    BluetoothDisabled,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

// ============================================================================
// CENTRAL
// ============================================================================

pub struct BleMidiCentral {
    events: Arc<EventDispatcher>,
    registry: Arc<SessionRegistry>,
    negotiator: GattNegotiator,
    scanner: Arc<BleScanner>,
}

impl BleMidiCentral {
    /// Create a central, picking up the ambient tokio runtime if there is one.
    ///
    /// Without a runtime, timed scans are unavailable.
    pub fn new(platform: Arc<dyn BlePlatform>, config: CentralConfig) -> Result<Self, SetupError> {
        Self::build(platform, config, Handle::try_current().ok())
    }

    /// Create a central whose scan deadlines run on `runtime`
    pub fn with_runtime(
        platform: Arc<dyn BlePlatform>,
        config: CentralConfig,
        runtime: Handle,
    ) -> Result<Self, SetupError> {
        Self::build(platform, config, Some(runtime))
    }

    fn build(
        platform: Arc<dyn BlePlatform>,
        config: CentralConfig,
        runtime: Option<Handle>,
    ) -> Result<Self, SetupError> {
        config.validate()?;

        if !platform.supports_ble() {
            return Err(SetupError::BleUnsupported);
        }

        match platform.adapter_state() {
            AdapterState::Enabled => {}
            AdapterState::Unavailable => return Err(SetupError::AdapterUnavailable),
            AdapterState::Disabled => {
                if !config.enable_adapter_if_disabled {
                    return Err(SetupError::BluetoothDisabled);
                }
                info!("Bluetooth disabled, requesting enable");
                if !platform.enable_adapter() {
                    return Err(SetupError::BluetoothDisabled);
                }
            }
        }

        let events = Arc::new(EventDispatcher::new());
        let registry = Arc::new(SessionRegistry::new());
        let negotiator = GattNegotiator::new(
            platform.clone(),
            registry.clone(),
            events.clone(),
            config.midi_service,
            config.needs_bonding,
            config.max_write_len,
        );
        let scanner = Arc::new(BleScanner::new(
            platform,
            events.clone(),
            runtime,
            config.auto_connect,
        ));

        debug!("BLE-MIDI central ready");
        Ok(Self {
            events,
            registry,
            negotiator,
            scanner,
        })
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    pub fn start_scan(&self, timeout_ms: i64) -> Result<(), ScannerError> {
        self.scanner.start_scan(timeout_ms)
    }

    pub fn stop_scan(&self) {
        self.scanner.stop_scan();
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    pub fn set_auto_connect(&self, enabled: bool) {
        self.scanner.set_auto_connect(enabled);
    }

    pub fn is_auto_connect(&self) -> bool {
        self.scanner.is_auto_connect()
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    /// Request a connection. `false` means the platform refused it.
    pub fn connect(&self, peer: &PeerIdentity) -> bool {
        self.negotiator.connect(peer)
    }

    /// Disconnect the peers behind the given devices
    pub fn disconnect(
        &self,
        input: Option<&MidiInputDevice>,
        output: Option<&MidiOutputDevice>,
    ) -> bool {
        let mut disconnected = false;
        if let Some(input) = input {
            disconnected |= self.disconnect_address(input.identity());
        }
        if let Some(output) = output {
            disconnected |= self.disconnect_address(output.identity());
        }
        disconnected
    }

    pub fn disconnect_device(&self, device: &MidiDevice) -> bool {
        self.disconnect_address(device.identity())
    }

    /// Tear down the session for `address`. A second call is a no-op.
    pub fn disconnect_address(&self, address: &str) -> bool {
        self.scanner.release_connect(address);
        self.negotiator
            .disconnect(address, DeviceStatus::Disconnected)
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.negotiator.is_connected(address)
    }

    pub fn input_devices(&self) -> HashSet<Arc<MidiInputDevice>> {
        self.registry.input_devices()
    }

    pub fn output_devices(&self) -> HashSet<Arc<MidiOutputDevice>> {
        self.registry.output_devices()
    }

    /// Applies to connections made after the call
    pub fn set_needs_bonding(&self, needs_bonding: bool) {
        self.negotiator.set_needs_bonding(needs_bonding);
    }

    /// Stop scanning and disconnect everything
    pub fn terminate(&self) {
        if self.scanner.is_scanning() {
            self.scanner.stop_scan();
        }
        if let Some(address) = self.scanner.connect_in_flight() {
            self.scanner.release_connect(&address);
        }
        let count = self.negotiator.disconnect_all(DeviceStatus::Disconnected);
        info!("Central terminated ({} sessions closed)", count);
    }

    // ------------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------------

    pub fn set_on_attached(&self, listener: Option<Arc<AttachListener>>) {
        self.events.set_on_attached(listener);
    }

    pub fn set_on_detached(&self, listener: Option<Arc<DetachListener>>) {
        self.events.set_on_detached(listener);
    }

    pub fn set_on_status(&self, listener: Option<Arc<StatusListener>>) {
        self.events.set_on_status(listener);
    }

    pub fn set_on_data(&self, listener: Option<Arc<DataListener>>) {
        self.events.set_on_data(listener);
    }

    pub fn set_on_scan_status(&self, listener: Option<Arc<ScanStatusListener>>) {
        self.events.set_on_scan_status(listener);
    }

    pub fn set_on_device_found(&self, listener: Option<Arc<DeviceFoundListener>>) {
        self.events.set_on_device_found(listener);
    }

    fn settle(&self, address: &str, outcome: Negotiation) {
        if outcome.is_resolved() {
            self.scanner.release_connect(address);
        }
    }
}

impl GattCallbackHandler for BleMidiCentral {
    fn on_scan_result(&self, peer: &PeerIdentity) {
        if !peer.is_ble() {
            trace!("Skipping non-LE peer {}", peer);
            return;
        }

        self.events.device_found(peer);

        let address = peer.address();
        let busy = self.negotiator.is_connected(address) || self.negotiator.is_pending(address);
        if self.scanner.claim_auto_connect(address, busy) {
            info!("Auto-connecting to {}", peer);
            if !self.negotiator.connect(peer) {
                self.scanner.release_connect(address);
            }
        }
    }

    fn on_connection_state_change(&self, peer: &PeerIdentity, state: ConnectionState) {
        let outcome = self.negotiator.on_connection_state_change(peer, state);
        self.settle(peer.address(), outcome);
    }

    fn on_services_discovered(&self, address: &str, success: bool, attributes: &[GattAttribute]) {
        let outcome = self
            .negotiator
            .on_services_discovered(address, success, attributes);
        self.settle(address, outcome);
    }

    fn on_characteristic_changed(&self, address: &str, characteristic: Uuid, value: &[u8]) {
        self.negotiator
            .on_characteristic_changed(address, characteristic, value);
    }

    fn on_descriptor_write(
        &self,
        address: &str,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
        success: bool,
    ) {
        self.negotiator
            .on_descriptor_write(address, characteristic, descriptor, value, success);
    }

    fn on_bond_state_changed(&self, address: &str, state: BondState) {
        let outcome = self.negotiator.on_bond_state_changed(address, state);
        self.settle(address, outcome);
    }

    fn on_adapter_state_changed(&self, state: AdapterState) {
        if state == AdapterState::Enabled {
            debug!("Adapter enabled");
            return;
        }

        warn!("Adapter went {:?}", state);
        if self.scanner.is_scanning() {
            self.scanner.stop_scan();
        }
        if let Some(address) = self.scanner.connect_in_flight() {
            self.scanner.release_connect(&address);
        }
        self.negotiator.disconnect_all(DeviceStatus::Offline);
    }

    fn on_transport_error(&self, address: &str) {
        warn!("Fatal transport error for {}", address);
        self.scanner.release_connect(address);
        self.negotiator.disconnect(address, DeviceStatus::Error);
    }
}

impl std::fmt::Debug for BleMidiCentral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleMidiCentral")
            .field("sessions", &self.registry.len())
            .field("scanning", &self.scanner.is_scanning())
            .field("auto_connect", &self.scanner.is_auto_connect())
            .finish()
    }
}
