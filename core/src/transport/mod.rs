// Transport module — BLE GATT plumbing beneath the MIDI layer

pub mod ble;

pub use ble::{BlePlatform, GattCallbackHandler, PeerIdentity, PlatformError};
