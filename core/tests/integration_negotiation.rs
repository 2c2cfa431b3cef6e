// Integration tests for GATT negotiation
//
// Drives a central through the platform callback sequence of a real
// BLE-MIDI peripheral and checks the requests it issues and the events it
// announces.

mod common;

use blemidi_core::{
    BondState, CentralConfig, ConnectionState, DeviceStatus, GattAttribute, GattCallbackHandler,
    WriteType, CLIENT_CHARACTERISTIC_CONFIG_UUID, ENABLE_NOTIFICATION_VALUE,
    MIDI_IO_CHARACTERISTIC_UUID, MIDI_SERVICE_UUID,
};
use common::{central, connect_fully, midi_attributes, peer, Call, Event, EventLog, FakePlatform};
use parking_lot::Mutex;
use std::sync::Arc;

#[test]
fn test_full_negotiation_attaches_both_devices() {
    let platform = FakePlatform::new();
    let central = central(&platform, CentralConfig::default());
    let log = EventLog::attach(&central);
    let keys = peer(1);

    connect_fully(&central, &keys);

    assert_eq!(
        log.statuses(keys.address()),
        vec![
            DeviceStatus::Connecting,
            DeviceStatus::ServiceDiscovering,
            DeviceStatus::ServiceDiscoveredOk,
            DeviceStatus::CharDiscovering,
            DeviceStatus::CharDiscoveredOk,
            DeviceStatus::Connected,
        ]
    );
    assert_eq!(log.count(|e| matches!(e, Event::Attached(_, true))), 1);
    assert_eq!(log.count(|e| matches!(e, Event::Attached(_, false))), 1);

    assert_eq!(central.input_devices().len(), 1);
    assert_eq!(central.output_devices().len(), 1);
    assert!(central.is_connected(keys.address()));

    let address = keys.address().to_string();
    let calls = platform.calls();
    assert!(calls.contains(&Call::SetNotification(
        address.clone(),
        MIDI_IO_CHARACTERISTIC_UUID,
        true
    )));
    assert!(calls.contains(&Call::WriteDescriptor(
        address.clone(),
        CLIENT_CHARACTERISTIC_CONFIG_UUID,
        ENABLE_NOTIFICATION_VALUE.to_vec()
    )));
    assert!(calls.contains(&Call::Read(address, MIDI_IO_CHARACTERISTIC_UUID)));

    let output = central.output_devices().into_iter().next().expect("Output");
    assert_eq!(output.write_type(), WriteType::WithoutResponse);
    assert_eq!(output.display_name(), "Synth 1");
}

#[test]
fn test_duplicate_connected_callback_discovers_once() {
    let platform = FakePlatform::new();
    let central = central(&platform, CentralConfig::default());
    let keys = peer(2);

    assert!(central.connect(&keys));
    central.on_connection_state_change(&keys, ConnectionState::Connected);
    central.on_connection_state_change(&keys, ConnectionState::Connected);

    assert_eq!(
        platform.count(|c| matches!(c, Call::DiscoverServices(_))),
        1
    );
}

#[test]
fn test_duplicate_discovery_attaches_once() {
    let platform = FakePlatform::new();
    let central = central(&platform, CentralConfig::default());
    let log = EventLog::attach(&central);
    let keys = peer(3);

    connect_fully(&central, &keys);
    central.on_services_discovered(keys.address(), true, &midi_attributes());

    assert_eq!(log.count(|e| matches!(e, Event::Attached(..))), 2);
    assert_eq!(central.input_devices().len(), 1);
}

#[test]
fn test_connect_when_already_connected_has_no_side_effects() {
    let platform = FakePlatform::new();
    let central = central(&platform, CentralConfig::default());
    let keys = peer(4);

    connect_fully(&central, &keys);
    platform.clear();

    assert!(central.connect(&keys));
    assert!(platform.calls().is_empty());
}

#[test]
fn test_missing_midi_service_keeps_session() {
    let platform = FakePlatform::new();
    let central = central(&platform, CentralConfig::default());
    let log = EventLog::attach(&central);
    let lamp = peer(5);

    assert!(central.connect(&lamp));
    central.on_connection_state_change(&lamp, ConnectionState::Connected);
    central.on_services_discovered(
        lamp.address(),
        true,
        &[GattAttribute::new(
            blemidi_core::transport::ble::gatt::uuid_from_short(0x180F),
            blemidi_core::transport::ble::gatt::uuid_from_short(0x2A19),
            None,
        )],
    );

    assert_eq!(
        log.statuses(lamp.address()).last(),
        Some(&DeviceStatus::CharDiscoveredFailed)
    );
    assert!(central.is_connected(lamp.address()));
    assert!(central.input_devices().is_empty());
    assert_eq!(log.count(|e| matches!(e, Event::Attached(..))), 0);
}

#[test]
fn test_input_only_peripheral() {
    let platform = FakePlatform::new();
    let input = blemidi_core::transport::ble::gatt::uuid_from_short(0xAA01);
    let output = blemidi_core::transport::ble::gatt::uuid_from_short(0xAA02);
    let config = CentralConfig {
        midi_service: blemidi_core::MidiServiceIds {
            service: MIDI_SERVICE_UUID,
            input_characteristic: input,
            output_characteristic: output,
        },
        ..CentralConfig::default()
    };
    let central = central(&platform, config);
    let pads = peer(6);

    assert!(central.connect(&pads));
    central.on_connection_state_change(&pads, ConnectionState::Connected);
    central.on_services_discovered(
        pads.address(),
        true,
        &[GattAttribute::new(MIDI_SERVICE_UUID, input, None)],
    );

    assert_eq!(central.input_devices().len(), 1);
    assert!(central.output_devices().is_empty());
    // No CCCD reported, so no descriptor write
    assert_eq!(
        platform.count(|c| matches!(c, Call::WriteDescriptor(..))),
        0
    );
}

#[test]
fn test_failed_discovery_reports_failure() {
    let platform = FakePlatform::new();
    let central = central(&platform, CentralConfig::default());
    let log = EventLog::attach(&central);
    let keys = peer(7);

    assert!(central.connect(&keys));
    central.on_connection_state_change(&keys, ConnectionState::Connected);
    central.on_services_discovered(keys.address(), false, &[]);

    assert_eq!(
        log.statuses(keys.address()).last(),
        Some(&DeviceStatus::ServiceDiscoveredFailed)
    );
    assert!(central.input_devices().is_empty());
}

#[test]
fn test_notifications_flow_to_data_listener() {
    let platform = FakePlatform::new();
    let central = central(&platform, CentralConfig::default());
    let log = EventLog::attach(&central);
    let keys = peer(8);

    connect_fully(&central, &keys);
    log.clear();

    central.on_characteristic_changed(
        keys.address(),
        MIDI_IO_CHARACTERISTIC_UUID,
        &[0x80, 0x90, 0x40, 0x7F],
    );
    central.on_characteristic_changed(keys.address(), MIDI_IO_CHARACTERISTIC_UUID, &[0x80]);

    assert_eq!(
        log.events(),
        vec![
            Event::Status(keys.address().to_string(), DeviceStatus::CharRecvData),
            Event::Data(keys.address().to_string(), vec![0x90, 0x40, 0x7F]),
            Event::Status(keys.address().to_string(), DeviceStatus::CharRecvData),
        ]
    );
}

#[test]
fn test_per_device_listener_overrides_forwarder() {
    let platform = FakePlatform::new();
    let central = central(&platform, CentralConfig::default());
    let log = EventLog::attach(&central);
    let keys = peer(9);
    connect_fully(&central, &keys);

    let input = central.input_devices().into_iter().next().expect("Input");
    let own = Arc::new(Mutex::new(Vec::new()));
    let sink = own.clone();
    input.attach_data_listener(Some(Arc::new(
        move |_: &blemidi_core::MidiInputDevice, data: &[u8]| sink.lock().push(data.to_vec()),
    )));

    central.on_characteristic_changed(
        keys.address(),
        MIDI_IO_CHARACTERISTIC_UUID,
        &[0x80, 0xB0, 0x07, 0x64],
    );

    assert_eq!(*own.lock(), vec![vec![0xB0, 0x07, 0x64]]);
    assert_eq!(log.count(|e| matches!(e, Event::Data(..))), 0);
}

#[test]
fn test_replacing_central_data_listener_takes_effect_next_event() {
    let platform = FakePlatform::new();
    let central = central(&platform, CentralConfig::default());
    let keys = peer(10);
    connect_fully(&central, &keys);

    let first = Arc::new(Mutex::new(0));
    let counter = first.clone();
    central.set_on_data(Some(Arc::new(
        move |_: &blemidi_core::MidiInputDevice, _: &[u8]| *counter.lock() += 1,
    )));
    central.on_characteristic_changed(keys.address(), MIDI_IO_CHARACTERISTIC_UUID, &[0x80, 0xF8]);

    let second = Arc::new(Mutex::new(0));
    let counter = second.clone();
    central.set_on_data(Some(Arc::new(
        move |_: &blemidi_core::MidiInputDevice, _: &[u8]| *counter.lock() += 1,
    )));
    central.on_characteristic_changed(keys.address(), MIDI_IO_CHARACTERISTIC_UUID, &[0x80, 0xF8]);

    assert_eq!(*first.lock(), 1);
    assert_eq!(*second.lock(), 1);
}

#[test]
fn test_descriptor_echo_reasserts_notifications() {
    let platform = FakePlatform::new();
    let central = central(&platform, CentralConfig::default());
    let log = EventLog::attach(&central);
    let keys = peer(11);
    connect_fully(&central, &keys);
    platform.clear();

    central.on_descriptor_write(
        keys.address(),
        MIDI_IO_CHARACTERISTIC_UUID,
        CLIENT_CHARACTERISTIC_CONFIG_UUID,
        &ENABLE_NOTIFICATION_VALUE,
        true,
    );

    assert_eq!(
        log.statuses(keys.address()).last(),
        Some(&DeviceStatus::CharEnableWrite)
    );
    assert_eq!(
        platform.calls(),
        vec![Call::SetNotification(
            keys.address().to_string(),
            MIDI_IO_CHARACTERISTIC_UUID,
            true
        )]
    );
}

#[test]
fn test_bonding_defers_configuration() {
    let platform = FakePlatform::new();
    let config = CentralConfig {
        needs_bonding: true,
        ..CentralConfig::default()
    };
    let central = central(&platform, config);
    let log = EventLog::attach(&central);
    let keys = peer(12);

    connect_fully(&central, &keys);

    // Devices are announced before bonding completes
    assert_eq!(log.count(|e| matches!(e, Event::Attached(..))), 2);
    assert_eq!(platform.count(|c| matches!(c, Call::CreateBond(_))), 1);
    assert_eq!(
        platform.count(|c| matches!(c, Call::SetNotification(..))),
        0
    );

    central.on_bond_state_changed(keys.address(), BondState::Bonding);
    central.on_bond_state_changed(keys.address(), BondState::Bonded);

    assert_eq!(
        platform.count(|c| matches!(c, Call::SetNotification(..))),
        1
    );
    assert_eq!(
        log.statuses(keys.address()).last(),
        Some(&DeviceStatus::Connected)
    );

    // A repeated bonded broadcast has nothing left to configure
    central.on_bond_state_changed(keys.address(), BondState::Bonded);
    assert_eq!(
        platform.count(|c| matches!(c, Call::SetNotification(..))),
        1
    );
}

#[test]
fn test_already_bonded_peer_configures_immediately() {
    let platform = FakePlatform::new();
    *platform.bond_state.lock() = BondState::Bonded;
    let central = central(
        &platform,
        CentralConfig {
            needs_bonding: true,
            ..CentralConfig::default()
        },
    );
    let keys = peer(13);

    connect_fully(&central, &keys);

    assert_eq!(platform.count(|c| matches!(c, Call::CreateBond(_))), 0);
    assert_eq!(
        platform.count(|c| matches!(c, Call::SetNotification(..))),
        1
    );
}

#[test]
fn test_bond_rejected_reports_connect_failed() {
    let platform = FakePlatform::new();
    let central = central(&platform, CentralConfig::default());
    central.set_needs_bonding(true);
    let log = EventLog::attach(&central);
    let keys = peer(14);

    connect_fully(&central, &keys);
    central.on_bond_state_changed(keys.address(), BondState::None);

    assert_eq!(
        log.statuses(keys.address()).last(),
        Some(&DeviceStatus::ConnectFailed)
    );
    assert!(central.is_connected(keys.address()));
    assert_eq!(
        platform.count(|c| matches!(c, Call::SetNotification(..))),
        0
    );
}

#[test]
fn test_output_send_uses_negotiated_limit() {
    let platform = FakePlatform::new();
    *platform.max_write_len.lock() = Some(4);
    let central = central(&platform, CentralConfig::default());
    let keys = peer(15);
    connect_fully(&central, &keys);

    let output = central.output_devices().into_iter().next().expect("Output");
    assert!(output.send(&[0x90, 0x3C, 0x64, 0x80, 0x3C, 0x00]));
    assert_eq!(
        platform.writes(),
        vec![vec![0x90, 0x3C, 0x64, 0x80], vec![0x3C, 0x00]]
    );
}

#[test]
fn test_output_send_failure_keeps_session() {
    let platform = FakePlatform::new();
    *platform.writes_before_failure.lock() = Some(1);
    let central = central(&platform, CentralConfig::default());
    let keys = peer(16);
    connect_fully(&central, &keys);

    let output = central.output_devices().into_iter().next().expect("Output");
    assert!(!output.send(&[0x42; 45]));
    assert_eq!(platform.writes().len(), 1);
    assert!(central.is_connected(keys.address()));
}

#[test]
fn test_connect_refused() {
    let platform = FakePlatform::new();
    *platform.accept_connect.lock() = false;
    let central = central(&platform, CentralConfig::default());
    let log = EventLog::attach(&central);
    let keys = peer(17);

    assert!(!central.connect(&keys));
    assert_eq!(
        log.statuses(keys.address()),
        vec![DeviceStatus::Connecting, DeviceStatus::Error]
    );
}

#[test]
fn test_connect_that_never_links_reports_failure() {
    let platform = FakePlatform::new();
    let central = central(&platform, CentralConfig::default());
    let log = EventLog::attach(&central);
    let keys = peer(18);

    assert!(central.connect(&keys));
    central.on_connection_state_change(&keys, ConnectionState::Disconnected);

    assert_eq!(
        log.statuses(keys.address()),
        vec![DeviceStatus::Connecting, DeviceStatus::ConnectFailed]
    );

    // A second disconnect for the same address has nothing to report
    central.on_connection_state_change(&keys, ConnectionState::Disconnected);
    assert_eq!(log.statuses(keys.address()).len(), 2);
}
