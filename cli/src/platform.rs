// btleplug-backed BLE platform for the desktop CLI
//
// Every `BlePlatform` request is accepted synchronously and carried out on
// the tokio runtime; results are reported back through the bound
// `GattCallbackHandler`. Peers are keyed by the btleplug peripheral id, which
// is stable on every host (macOS hides the MAC address).

use anyhow::{Context, Result};
use blemidi_core::transport::ble::gatt::{BondState, ConnectionState, GattAttribute, WriteType};
use blemidi_core::{
    AdapterState, BlePlatform, GattCallbackHandler, PeerIdentity, PlatformError,
    CLIENT_CHARACTERISTIC_CONFIG_UUID,
};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType as LinkWriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

struct QueuedWrite {
    characteristic: Characteristic,
    value: Vec<u8>,
    write_type: LinkWriteType,
}

/// Per-peer state
struct Link {
    peripheral: Peripheral,
    peer: PeerIdentity,
    writer: Option<mpsc::UnboundedSender<QueuedWrite>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Link {
    fn shutdown(&mut self) {
        self.writer = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

pub struct BtleplugPlatform {
    me: Weak<BtleplugPlatform>,
    adapter: Option<Adapter>,
    runtime: Handle,
    handler: OnceLock<Weak<dyn GattCallbackHandler>>,
    links: Mutex<HashMap<String, Link>>,
    next_handle: AtomicU64,
    event_pump: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugPlatform {
    /// Open the first Bluetooth adapter. A host without one still yields a
    /// platform; it reports `AdapterState::Unavailable`.
    pub async fn new() -> Result<Arc<Self>> {
        let manager = Manager::new()
            .await
            .context("Failed to start Bluetooth manager")?;
        let adapter = manager
            .adapters()
            .await
            .context("Failed to list Bluetooth adapters")?
            .into_iter()
            .next();

        if let Some(adapter) = &adapter {
            match adapter.adapter_info().await {
                Ok(info) => info!("Using Bluetooth adapter {}", info),
                Err(e) => debug!("Adapter info unavailable: {}", e),
            }
        }

        let runtime = Handle::current();
        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            adapter,
            runtime,
            handler: OnceLock::new(),
            links: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            event_pump: Mutex::new(None),
        }))
    }

    /// Route callbacks to `handler` and start listening for adapter events
    pub fn bind(&self, handler: Weak<dyn GattCallbackHandler>) -> Result<()> {
        self.handler
            .set(handler)
            .map_err(|_| anyhow::anyhow!("Platform already bound"))?;

        let me = self.me.clone();
        *self.event_pump.lock() = Some(self.runtime.spawn(pump_adapter_events(me)));
        Ok(())
    }

    fn handler(&self) -> Option<Arc<dyn GattCallbackHandler>> {
        self.handler.get().and_then(Weak::upgrade)
    }

    fn spawn<F, Fut>(&self, task: F)
    where
        F: FnOnce(Arc<Self>, Arc<dyn GattCallbackHandler>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (Some(me), Some(handler)) = (self.me.upgrade(), self.handler()) else {
            debug!("Platform request dropped: no callback handler");
            return;
        };
        self.runtime.spawn(task(me, handler));
    }

    fn peripheral(&self, address: &str) -> Option<Peripheral> {
        self.links
            .lock()
            .get(address)
            .map(|link| link.peripheral.clone())
    }

    fn peer_for(&self, id: &PeripheralId) -> Option<PeerIdentity> {
        self.links
            .lock()
            .get(&id.to_string())
            .map(|link| link.peer.clone())
    }

    fn characteristic(&self, address: &str, uuid: Uuid) -> Option<Characteristic> {
        self.peripheral(address)?
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
    }

    async fn remember(&self, adapter: &Adapter, id: &PeripheralId) -> Option<PeerIdentity> {
        let peripheral = match adapter.peripheral(id).await {
            Ok(peripheral) => peripheral,
            Err(e) => {
                debug!("Peripheral {} vanished: {}", id, e);
                return None;
            }
        };
        let name = match peripheral.properties().await {
            Ok(properties) => properties.and_then(|p| p.local_name),
            Err(_) => None,
        };

        let address = id.to_string();
        let mut links = self.links.lock();
        let link = links.entry(address.clone()).or_insert_with(|| Link {
            peer: PeerIdentity::new(
                self.next_handle.fetch_add(1, Ordering::Relaxed),
                address,
                name.clone(),
            ),
            peripheral: peripheral.clone(),
            writer: None,
            tasks: Vec::new(),
        });
        if link.peer.name().is_none() && name.is_some() {
            link.peer = PeerIdentity::new(link.peer.handle(), link.peer.address(), name);
        }
        link.peripheral = peripheral;
        Some(link.peer.clone())
    }

    /// Wire up notification delivery and the ordered write queue for a peer
    fn open_link(&self, address: &str, handler: &Arc<dyn GattCallbackHandler>) {
        let mut links = self.links.lock();
        let Some(link) = links.get_mut(address) else {
            return;
        };
        link.shutdown();

        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedWrite>();
        let peripheral = link.peripheral.clone();
        let writer_address = address.to_string();
        let writer = self.runtime.spawn(async move {
            while let Some(write) = rx.recv().await {
                if let Err(e) = peripheral
                    .write(&write.characteristic, &write.value, write.write_type)
                    .await
                {
                    warn!("{}: write failed: {}", writer_address, e);
                }
            }
        });

        let peripheral = link.peripheral.clone();
        let handler = Arc::downgrade(handler);
        let notify_address = address.to_string();
        let notifications = self.runtime.spawn(async move {
            let mut stream = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("{}: no notification stream: {}", notify_address, e);
                    return;
                }
            };
            while let Some(notification) = stream.next().await {
                let Some(handler) = handler.upgrade() else {
                    break;
                };
                handler.on_characteristic_changed(
                    &notify_address,
                    notification.uuid,
                    &notification.value,
                );
            }
            trace!("{}: notification stream ended", notify_address);
        });

        link.writer = Some(tx);
        link.tasks.push(writer);
        link.tasks.push(notifications);
    }
}

impl Drop for BtleplugPlatform {
    fn drop(&mut self) {
        if let Some(pump) = self.event_pump.get_mut().take() {
            pump.abort();
        }
        for link in self.links.get_mut().values_mut() {
            link.shutdown();
        }
    }
}

async fn pump_adapter_events(platform: Weak<BtleplugPlatform>) {
    let Some(adapter) = platform.upgrade().and_then(|p| p.adapter.clone()) else {
        return;
    };
    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            warn!("Could not subscribe to adapter events: {}", e);
            return;
        }
    };

    while let Some(event) = events.next().await {
        let Some(platform) = platform.upgrade() else {
            break;
        };
        let Some(handler) = platform.handler() else {
            continue;
        };

        match event {
            CentralEvent::DeviceDiscovered(id) => {
                if let Some(peer) = platform.remember(&adapter, &id).await {
                    handler.on_scan_result(&peer);
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                if let Some(peer) = platform.peer_for(&id) {
                    handler.on_connection_state_change(&peer, ConnectionState::Disconnected);
                }
            }
            _ => {}
        }
    }
}

fn link_write_type(write_type: WriteType) -> LinkWriteType {
    match write_type {
        WriteType::WithResponse => LinkWriteType::WithResponse,
        WriteType::WithoutResponse => LinkWriteType::WithoutResponse,
    }
}

impl BlePlatform for BtleplugPlatform {
    fn supports_ble(&self) -> bool {
        true
    }

    fn adapter_state(&self) -> AdapterState {
        if self.adapter.is_some() {
            AdapterState::Enabled
        } else {
            AdapterState::Unavailable
        }
    }

    fn enable_adapter(&self) -> bool {
        // Radio power is owned by the OS on desktop hosts
        false
    }

    fn start_discovery(&self) -> Result<(), PlatformError> {
        let adapter = self
            .adapter
            .clone()
            .ok_or_else(|| PlatformError::Rejected("no adapter".to_string()))?;
        self.runtime.spawn(async move {
            if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                warn!("Failed to start scan: {}", e);
            }
        });
        Ok(())
    }

    fn stop_discovery(&self) {
        if let Some(adapter) = self.adapter.clone() {
            self.runtime.spawn(async move {
                if let Err(e) = adapter.stop_scan().await {
                    debug!("Failed to stop scan: {}", e);
                }
            });
        }
    }

    fn connect(&self, peer: &PeerIdentity) -> bool {
        let Some(peripheral) = self.peripheral(peer.address()) else {
            return false;
        };
        let peer = peer.clone();
        self.spawn(move |_, handler| async move {
            match peripheral.connect().await {
                Ok(()) => handler.on_connection_state_change(&peer, ConnectionState::Connected),
                Err(e) => {
                    warn!("Connect to {} failed: {}", peer, e);
                    handler.on_connection_state_change(&peer, ConnectionState::Disconnected);
                }
            }
        });
        true
    }

    fn discover_services(&self, peer: &PeerIdentity) -> bool {
        let Some(peripheral) = self.peripheral(peer.address()) else {
            return false;
        };
        let address = peer.address().to_string();
        self.spawn(move |platform, handler| async move {
            if let Err(e) = peripheral.discover_services().await {
                warn!("{}: service discovery failed: {}", address, e);
                handler.on_services_discovered(&address, false, &[]);
                return;
            }

            let mut attributes = Vec::new();
            for service in peripheral.services() {
                for characteristic in &service.characteristics {
                    if characteristic.descriptors.is_empty() {
                        attributes.push(GattAttribute::new(service.uuid, characteristic.uuid, None));
                    }
                    for descriptor in &characteristic.descriptors {
                        attributes.push(GattAttribute::new(
                            service.uuid,
                            characteristic.uuid,
                            Some(descriptor.uuid),
                        ));
                    }
                }
            }

            platform.open_link(&address, &handler);
            handler.on_services_discovered(&address, true, &attributes);
        });
        true
    }

    fn disconnect(&self, peer: &PeerIdentity) {
        let Some(peripheral) = self.peripheral(peer.address()) else {
            return;
        };
        let address = peer.address().to_string();
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                debug!("{}: disconnect failed: {}", address, e);
            }
        });
    }

    fn close(&self, peer: &PeerIdentity) {
        if let Some(link) = self.links.lock().get_mut(peer.address()) {
            link.shutdown();
        }
    }

    fn set_characteristic_notification(
        &self,
        _peer: &PeerIdentity,
        _characteristic: Uuid,
        _enable: bool,
    ) -> bool {
        // btleplug routes every subscribed characteristic into one stream
        true
    }

    fn write_descriptor(
        &self,
        peer: &PeerIdentity,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> bool {
        if descriptor != CLIENT_CHARACTERISTIC_CONFIG_UUID {
            warn!("{}: unsupported descriptor write {}", peer, descriptor);
            return false;
        }
        let (Some(peripheral), Some(target)) = (
            self.peripheral(peer.address()),
            self.characteristic(peer.address(), characteristic),
        ) else {
            return false;
        };

        let address = peer.address().to_string();
        let value = value.to_vec();
        let enable = value.first().is_some_and(|flags| flags & 0x01 != 0);
        self.spawn(move |_, handler| async move {
            let result = if enable {
                peripheral.subscribe(&target).await
            } else {
                peripheral.unsubscribe(&target).await
            };
            if let Err(e) = &result {
                warn!("{}: CCCD update failed: {}", address, e);
            }
            handler.on_descriptor_write(
                &address,
                characteristic,
                descriptor,
                &value,
                result.is_ok(),
            );
        });
        true
    }

    fn read_characteristic(&self, peer: &PeerIdentity, characteristic: Uuid) -> bool {
        let (Some(peripheral), Some(target)) = (
            self.peripheral(peer.address()),
            self.characteristic(peer.address(), characteristic),
        ) else {
            return false;
        };
        let address = peer.address().to_string();
        self.runtime.spawn(async move {
            match peripheral.read(&target).await {
                Ok(value) => trace!("{}: read {} bytes from {}", address, value.len(), characteristic),
                Err(e) => debug!("{}: read failed: {}", address, e),
            }
        });
        true
    }

    fn write_characteristic(
        &self,
        peer: &PeerIdentity,
        characteristic: Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), PlatformError> {
        let target = self
            .characteristic(peer.address(), characteristic)
            .ok_or(PlatformError::UnknownCharacteristic(characteristic))?;

        let links = self.links.lock();
        let writer = links
            .get(peer.address())
            .and_then(|link| link.writer.as_ref())
            .ok_or_else(|| PlatformError::NotConnected(peer.address().to_string()))?;

        writer
            .send(QueuedWrite {
                characteristic: target,
                value: value.to_vec(),
                write_type: link_write_type(write_type),
            })
            .map_err(|_| PlatformError::Fatal("write queue closed".to_string()))
    }

    fn bond_state(&self, _peer: &PeerIdentity) -> BondState {
        BondState::None
    }

    fn create_bond(&self, peer: &PeerIdentity) -> bool {
        warn!("{}: pairing is managed by the OS, cannot bond from here", peer);
        false
    }
}
