// BLE-MIDI Core — GATT central for MIDI peripherals
#![allow(clippy::empty_line_after_doc_comments)]
//
// Finds BLE-MIDI peripherals, negotiates GATT sessions with them and moves
// plain MIDI bytes in both directions. The host Bluetooth stack sits behind
// `BlePlatform`; everything here is driven by its callbacks.

pub mod central;
pub mod config;
pub mod midi;
pub mod session;
pub mod transport;

pub use central::{BleMidiCentral, SetupError};
pub use config::{CentralConfig, ConfigError};
pub use midi::device::{MidiDevice, MidiInputDevice, MidiOutputDevice};
pub use midi::events::{DeviceStatus, EventDispatcher};
pub use session::{GattSession, SessionError, SessionState};
pub use transport::ble::codec;
pub use transport::ble::gatt::{
    BondState, ConnectionState, GattAttribute, MidiServiceIds, WriteType,
    CLIENT_CHARACTERISTIC_CONFIG_UUID, ENABLE_NOTIFICATION_VALUE, MIDI_IO_CHARACTERISTIC_UUID,
    MIDI_SERVICE_UUID,
};
pub use transport::ble::platform::{
    AdapterState, BlePlatform, DeviceType, GattCallbackHandler, PeerIdentity, PlatformError,
};
pub use transport::ble::scanner::ScannerError;
