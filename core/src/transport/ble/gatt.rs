//! GATT model for BLE-MIDI peripherals
//!
//! Well-known identifiers, the discovered attribute tree reported by the
//! platform after service discovery, and the small enums shared by the
//! negotiator and the platform seam.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// BLE-MIDI service UUID
pub const MIDI_SERVICE_UUID: Uuid = Uuid::from_u128(0x03b8_0e5a_ede8_4b33_a751_6ce3_4ec4_c700);

/// BLE-MIDI data I/O characteristic UUID (used for both directions)
pub const MIDI_IO_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x7772_e5db_3868_4112_a1a9_f266_9d10_6bf3);

/// Bluetooth base UUID, used to expand 16-bit assigned numbers
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Client Characteristic Configuration descriptor (0x2902)
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid = uuid_from_short(0x2902);

/// CCCD value enabling notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Default write payload: ATT MTU 23 minus the 3-byte ATT header
pub const DEFAULT_MAX_WRITE_LEN: usize = 20;

/// Maximum attribute value length (protocol limitation)
pub const MAX_ATTRIBUTE_LEN: usize = 512;

/// Expand a 16-bit assigned number into a full UUID
pub const fn uuid_from_short(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Characteristic write mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WriteType {
    /// Acknowledged write (write request)
    #[default]
    WithResponse,
    /// Fire-and-forget write (write command)
    WithoutResponse,
}

/// Peer bonding state as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

/// Low-level link state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// One discovered attribute: a (service, characteristic, descriptor) triple.
///
/// Characteristics without descriptors are reported with `descriptor: None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GattAttribute {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub descriptor: Option<Uuid>,
}

impl GattAttribute {
    pub fn new(service: Uuid, characteristic: Uuid, descriptor: Option<Uuid>) -> Self {
        Self {
            service,
            characteristic,
            descriptor,
        }
    }
}

/// A discovered characteristic and its descriptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

impl DiscoveredCharacteristic {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            descriptors: Vec::new(),
        }
    }

    /// Whether the characteristic exposes a Client Characteristic Configuration descriptor
    pub fn has_cccd(&self) -> bool {
        self.descriptors.contains(&CLIENT_CHARACTERISTIC_CONFIG_UUID)
    }
}

/// A discovered service and its characteristics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

impl DiscoveredService {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&DiscoveredCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Identifiers used to recognise a MIDI service on a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiServiceIds {
    pub service: Uuid,
    pub input_characteristic: Uuid,
    pub output_characteristic: Uuid,
}

impl Default for MidiServiceIds {
    fn default() -> Self {
        Self {
            service: MIDI_SERVICE_UUID,
            input_characteristic: MIDI_IO_CHARACTERISTIC_UUID,
            output_characteristic: MIDI_IO_CHARACTERISTIC_UUID,
        }
    }
}

/// MIDI endpoints located on a peer. Either half may be missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiEndpoints {
    pub input: Option<DiscoveredCharacteristic>,
    pub output: Option<DiscoveredCharacteristic>,
}

impl MidiEndpoints {
    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.output.is_none()
    }
}

/// Attribute tree of one peer, rebuilt from discovery triples
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GattProfile {
    services: Vec<DiscoveredService>,
}

impl GattProfile {
    /// Build a profile from discovery triples, preserving discovery order
    pub fn from_attributes(attributes: &[GattAttribute]) -> Self {
        let mut services: Vec<DiscoveredService> = Vec::new();

        for attribute in attributes {
            let service = match services.iter().position(|s| s.uuid == attribute.service) {
                Some(index) => &mut services[index],
                None => {
                    services.push(DiscoveredService {
                        uuid: attribute.service,
                        characteristics: Vec::new(),
                    });
                    let last = services.len() - 1;
                    &mut services[last]
                }
            };

            let characteristic = match service
                .characteristics
                .iter()
                .position(|c| c.uuid == attribute.characteristic)
            {
                Some(index) => &mut service.characteristics[index],
                None => {
                    service
                        .characteristics
                        .push(DiscoveredCharacteristic::new(attribute.characteristic));
                    let last = service.characteristics.len() - 1;
                    &mut service.characteristics[last]
                }
            };

            if let Some(descriptor) = attribute.descriptor {
                if !characteristic.descriptors.contains(&descriptor) {
                    characteristic.descriptors.push(descriptor);
                }
            }
        }

        Self { services }
    }

    pub fn services(&self) -> &[DiscoveredService] {
        &self.services
    }

    pub fn service(&self, uuid: Uuid) -> Option<&DiscoveredService> {
        self.services.iter().find(|s| s.uuid == uuid)
    }

    /// Locate the MIDI service and its input/output characteristics.
    ///
    /// Returns `None` when the service itself is absent.
    pub fn locate_midi(&self, ids: &MidiServiceIds) -> Option<MidiEndpoints> {
        let service = self.service(ids.service)?;
        Some(MidiEndpoints {
            input: service.characteristic(ids.input_characteristic).cloned(),
            output: service.characteristic(ids.output_characteristic).cloned(),
        })
    }
}
