// Shared fixtures for the integration tests: a recording platform and an
// event log hooked into every listener slot.
#![allow(dead_code)]

use blemidi_core::{
    AdapterState, BlePlatform, BleMidiCentral, BondState, CentralConfig, DeviceStatus,
    GattAttribute, MidiDevice, PeerIdentity, PlatformError, WriteType,
    CLIENT_CHARACTERISTIC_CONFIG_UUID, MIDI_IO_CHARACTERISTIC_UUID, MIDI_SERVICE_UUID,
};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// A request the core issued to the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartDiscovery,
    StopDiscovery,
    Connect(String),
    DiscoverServices(String),
    Disconnect(String),
    Close(String),
    SetNotification(String, Uuid, bool),
    WriteDescriptor(String, Uuid, Vec<u8>),
    Read(String, Uuid),
    Write(String, Vec<u8>, WriteType),
    CreateBond(String),
}

/// Platform double that records requests and answers from fixed settings
pub struct FakePlatform {
    calls: Mutex<Vec<Call>>,
    pub adapter: Mutex<AdapterState>,
    pub accept_connect: Mutex<bool>,
    pub accept_discovery: Mutex<bool>,
    pub bond_state: Mutex<BondState>,
    pub accept_bond: Mutex<bool>,
    pub max_write_len: Mutex<Option<usize>>,
    /// Writes accepted before the platform starts failing
    pub writes_before_failure: Mutex<Option<usize>>,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            adapter: Mutex::new(AdapterState::Enabled),
            accept_connect: Mutex::new(true),
            accept_discovery: Mutex::new(true),
            bond_state: Mutex::new(BondState::None),
            accept_bond: Mutex::new(true),
            max_write_len: Mutex::new(None),
            writes_before_failure: Mutex::new(None),
        })
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matches(c)).count()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Write(_, value, _) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl BlePlatform for FakePlatform {
    fn supports_ble(&self) -> bool {
        true
    }

    fn adapter_state(&self) -> AdapterState {
        *self.adapter.lock()
    }

    fn enable_adapter(&self) -> bool {
        *self.adapter.lock() = AdapterState::Enabled;
        true
    }

    fn start_discovery(&self) -> Result<(), PlatformError> {
        self.record(Call::StartDiscovery);
        Ok(())
    }

    fn stop_discovery(&self) {
        self.record(Call::StopDiscovery);
    }

    fn connect(&self, peer: &PeerIdentity) -> bool {
        self.record(Call::Connect(peer.address().to_string()));
        *self.accept_connect.lock()
    }

    fn discover_services(&self, peer: &PeerIdentity) -> bool {
        self.record(Call::DiscoverServices(peer.address().to_string()));
        *self.accept_discovery.lock()
    }

    fn disconnect(&self, peer: &PeerIdentity) {
        self.record(Call::Disconnect(peer.address().to_string()));
    }

    fn close(&self, peer: &PeerIdentity) {
        self.record(Call::Close(peer.address().to_string()));
    }

    fn set_characteristic_notification(
        &self,
        peer: &PeerIdentity,
        characteristic: Uuid,
        enable: bool,
    ) -> bool {
        self.record(Call::SetNotification(
            peer.address().to_string(),
            characteristic,
            enable,
        ));
        true
    }

    fn write_descriptor(
        &self,
        peer: &PeerIdentity,
        _characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> bool {
        self.record(Call::WriteDescriptor(
            peer.address().to_string(),
            descriptor,
            value.to_vec(),
        ));
        true
    }

    fn read_characteristic(&self, peer: &PeerIdentity, characteristic: Uuid) -> bool {
        self.record(Call::Read(peer.address().to_string(), characteristic));
        true
    }

    fn write_characteristic(
        &self,
        peer: &PeerIdentity,
        _characteristic: Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), PlatformError> {
        let mut budget = self.writes_before_failure.lock();
        if let Some(remaining) = budget.as_mut() {
            if *remaining == 0 {
                return Err(PlatformError::Fatal("link lost".to_string()));
            }
            *remaining -= 1;
        }
        drop(budget);

        self.record(Call::Write(
            peer.address().to_string(),
            value.to_vec(),
            write_type,
        ));
        Ok(())
    }

    fn bond_state(&self, _peer: &PeerIdentity) -> BondState {
        *self.bond_state.lock()
    }

    fn create_bond(&self, peer: &PeerIdentity) -> bool {
        self.record(Call::CreateBond(peer.address().to_string()));
        *self.accept_bond.lock()
    }

    fn max_write_len(&self, _peer: &PeerIdentity) -> Option<usize> {
        *self.max_write_len.lock()
    }
}

/// Everything the listeners saw, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Attached(String, bool),
    Detached(String, bool),
    Status(String, DeviceStatus),
    Data(String, Vec<u8>),
    Scan(bool),
    Found(String),
}

#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn attach(central: &BleMidiCentral) -> Arc<Self> {
        let log = Arc::new(Self::default());

        let sink = log.clone();
        central.set_on_attached(Some(Arc::new(move |d: &MidiDevice| {
            sink.push(Event::Attached(d.identity().to_string(), d.as_input().is_some()))
        })));
        let sink = log.clone();
        central.set_on_detached(Some(Arc::new(move |d: &MidiDevice| {
            sink.push(Event::Detached(d.identity().to_string(), d.as_input().is_some()))
        })));
        let sink = log.clone();
        central.set_on_status(Some(Arc::new(move |p: &PeerIdentity, s: DeviceStatus| {
            sink.push(Event::Status(p.address().to_string(), s))
        })));
        let sink = log.clone();
        central.set_on_data(Some(Arc::new(
            move |d: &blemidi_core::MidiInputDevice, data: &[u8]| {
                sink.push(Event::Data(d.identity().to_string(), data.to_vec()))
            },
        )));
        let sink = log.clone();
        central.set_on_scan_status(Some(Arc::new(move |s: bool| sink.push(Event::Scan(s)))));
        let sink = log.clone();
        central.set_on_device_found(Some(Arc::new(move |p: &PeerIdentity| {
            sink.push(Event::Found(p.address().to_string()))
        })));

        log
    }

    pub fn push(&self, event: Event) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn statuses(&self, address: &str) -> Vec<DeviceStatus> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Status(a, s) if a == address => Some(*s),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| matches(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

pub fn peer(index: u8) -> PeerIdentity {
    PeerIdentity::new(
        u64::from(index),
        format!("AA:BB:CC:DD:EE:{:02X}", index),
        Some(format!("Synth {}", index)),
    )
}

/// Discovery triples for a standard BLE-MIDI peripheral
pub fn midi_attributes() -> Vec<GattAttribute> {
    vec![
        GattAttribute::new(
            blemidi_core::transport::ble::gatt::uuid_from_short(0x1800),
            blemidi_core::transport::ble::gatt::uuid_from_short(0x2A00),
            None,
        ),
        GattAttribute::new(
            MIDI_SERVICE_UUID,
            MIDI_IO_CHARACTERISTIC_UUID,
            Some(CLIENT_CHARACTERISTIC_CONFIG_UUID),
        ),
    ]
}

/// Route core logs to the test harness; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn central(platform: &Arc<FakePlatform>, config: CentralConfig) -> BleMidiCentral {
    init_tracing();
    BleMidiCentral::new(platform.clone(), config).expect("Central setup")
}

/// Drive a peer from connect request to attached devices
pub fn connect_fully(central: &BleMidiCentral, peer: &PeerIdentity) {
    use blemidi_core::{ConnectionState, GattCallbackHandler};

    assert!(central.connect(peer));
    central.on_connection_state_change(peer, ConnectionState::Connected);
    central.on_services_discovered(peer.address(), true, &midi_attributes());
}
