// Platform seam for the BLE-MIDI central
//
// The core never talks to a radio directly. Platform code (Android/iOS
// bindings, btleplug on desktop, a recorder in tests) implements
// `BlePlatform`, and reports asynchronous results back through
// `GattCallbackHandler`, which the central implements.

use crate::transport::ble::gatt::{
    BondState, ConnectionState, GattAttribute, WriteType,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Request rejected by platform: {0}")]
    Rejected(String),
    #[error("Fatal transport error: {0}")]
    Fatal(String),
    #[error("Peer not connected: {0}")]
    NotConnected(String),
    #[error("Unknown characteristic {0}")]
    UnknownCharacteristic(Uuid),
}

// ============================================================================
// PEER IDENTITY
// ============================================================================

/// Radio type reported by the platform for a discovered peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceType {
    #[default]
    Unknown,
    Classic,
    Le,
    Dual,
}

/// Immutable identity of a discovered peer.
///
/// The address is the unique key for every lookup; the name is advisory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    handle: u64,
    address: String,
    name: Option<String>,
    kind: DeviceType,
}

impl PeerIdentity {
    /// Create an LE peer identity
    pub fn new(handle: u64, address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            handle,
            address: address.into(),
            name: name.filter(|n| !n.is_empty()),
            kind: DeviceType::Le,
        }
    }

    pub fn with_kind(mut self, kind: DeviceType) -> Self {
        self.kind = kind;
        self
    }

    /// Opaque platform handle
    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> DeviceType {
        self.kind
    }

    /// Whether the peer can carry GATT traffic
    pub fn is_ble(&self) -> bool {
        matches!(self.kind, DeviceType::Le | DeviceType::Dual)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Adapter availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterState {
    /// No adapter present
    Unavailable,
    /// Adapter present but switched off
    Disabled,
    Enabled,
}

// ============================================================================
// PLATFORM TRAITS
// ============================================================================

/// Requests the core issues to the host Bluetooth stack.
///
/// Every request is fire-and-forget: the return value only says whether the
/// platform accepted it. Results arrive later through `GattCallbackHandler`.
/// Implementations must not call back into the core synchronously from these
/// methods.
#[cfg_attr(test, mockall::automock)]
pub trait BlePlatform: Send + Sync {
    /// Whether the host supports Bluetooth LE at all
    fn supports_ble(&self) -> bool;

    fn adapter_state(&self) -> AdapterState;

    /// Try to switch a disabled adapter on
    fn enable_adapter(&self) -> bool;

    fn start_discovery(&self) -> Result<(), PlatformError>;

    fn stop_discovery(&self);

    fn connect(&self, peer: &PeerIdentity) -> bool;

    fn discover_services(&self, peer: &PeerIdentity) -> bool;

    fn disconnect(&self, peer: &PeerIdentity);

    /// Release the low-level connection handle
    fn close(&self, peer: &PeerIdentity);

    /// Enable or disable local delivery of notifications for a characteristic
    fn set_characteristic_notification(
        &self,
        peer: &PeerIdentity,
        characteristic: Uuid,
        enable: bool,
    ) -> bool;

    fn write_descriptor(
        &self,
        peer: &PeerIdentity,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> bool;

    fn read_characteristic(&self, peer: &PeerIdentity, characteristic: Uuid) -> bool;

    fn write_characteristic(
        &self,
        peer: &PeerIdentity,
        characteristic: Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), PlatformError>;

    fn bond_state(&self, peer: &PeerIdentity) -> BondState;

    /// Request pairing; completion arrives via `on_bond_state_changed`
    fn create_bond(&self, peer: &PeerIdentity) -> bool;

    /// Negotiated write payload limit, if the platform knows it
    fn max_write_len(&self, _peer: &PeerIdentity) -> Option<usize> {
        None
    }
}

/// Asynchronous results the platform reports back to the core.
///
/// May be invoked from any thread. Callbacks for one peer must be delivered in
/// transport order.
pub trait GattCallbackHandler: Send + Sync {
    fn on_scan_result(&self, peer: &PeerIdentity);

    fn on_connection_state_change(&self, peer: &PeerIdentity, state: ConnectionState);

    fn on_services_discovered(&self, address: &str, success: bool, attributes: &[GattAttribute]);

    fn on_characteristic_changed(&self, address: &str, characteristic: Uuid, value: &[u8]);

    fn on_descriptor_write(
        &self,
        address: &str,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
        success: bool,
    );

    fn on_bond_state_changed(&self, address: &str, state: BondState);

    fn on_adapter_state_changed(&self, state: AdapterState);

    /// Unrecoverable transport failure for one peer
    fn on_transport_error(&self, address: &str);
}
