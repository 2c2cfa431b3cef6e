/// BLE (Bluetooth Low Energy) Transport Module
///
/// Protocol-level pieces of the BLE-MIDI central:
///
/// - **codec**: MIDI payload framing for GATT characteristic values
/// - **gatt**: well-known identifiers and the discovered attribute model
/// - **platform**: the seam between the core and the host Bluetooth stack
/// - **scanner**: discovery with an optional deadline and auto-connect bookkeeping
///
/// Radio access lives behind `BlePlatform` (Kotlin/Swift bindings on mobile,
/// btleplug on desktop), so everything here is testable without hardware.

pub mod codec;
pub mod gatt;
pub mod platform;
pub mod scanner;

// Re-export commonly used types
pub use gatt::{
    BondState, ConnectionState, GattAttribute, GattProfile, MidiEndpoints, MidiServiceIds,
    WriteType, CLIENT_CHARACTERISTIC_CONFIG_UUID, DEFAULT_MAX_WRITE_LEN,
    ENABLE_NOTIFICATION_VALUE, MAX_ATTRIBUTE_LEN, MIDI_IO_CHARACTERISTIC_UUID,
    MIDI_SERVICE_UUID,
};

pub use platform::{
    AdapterState, BlePlatform, DeviceType, GattCallbackHandler, PeerIdentity, PlatformError,
};

pub use scanner::{BleScanner, ScannerError};
