/// BLE scanner with deadline and auto-connect bookkeeping
///
/// A scan runs until stopped or until its deadline fires. Each `start_scan`
/// opens a new scan cycle: the previous deadline is cancelled and the
/// auto-connect claim is released.
///
/// Auto-connect is serialised globally: at most one connect triggered by a scan
/// result is in flight at a time, whatever the address.

use crate::midi::events::EventDispatcher;
use crate::transport::ble::platform::{BlePlatform, PlatformError};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScannerError {
    #[error("Discovery failed to start: {0}")]
    DiscoveryFailed(#[from] PlatformError),
    #[error("No async runtime available for the scan deadline")]
    TimerUnavailable,
}

#[derive(Default)]
struct ScanState {
    scanning: bool,
    /// Bumped on every start/stop so a late deadline can tell it is stale
    generation: u64,
    deadline: Option<JoinHandle<()>>,
    auto_connect: bool,
    connect_in_flight: Option<String>,
}

impl ScanState {
    fn cancel_deadline(&mut self) {
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
    }
}

pub struct BleScanner {
    platform: Arc<dyn BlePlatform>,
    events: Arc<EventDispatcher>,
    runtime: Option<Handle>,
    state: Mutex<ScanState>,
}

impl BleScanner {
    pub fn new(
        platform: Arc<dyn BlePlatform>,
        events: Arc<EventDispatcher>,
        runtime: Option<Handle>,
        auto_connect: bool,
    ) -> Self {
        Self {
            platform,
            events,
            runtime,
            state: Mutex::new(ScanState {
                auto_connect,
                ..ScanState::default()
            }),
        }
    }

    /// Start discovery. `timeout_ms <= 0` scans until [`stop_scan`](Self::stop_scan).
    pub fn start_scan(self: &Arc<Self>, timeout_ms: i64) -> Result<(), ScannerError> {
        let runtime = match (timeout_ms > 0, &self.runtime) {
            (true, None) => return Err(ScannerError::TimerUnavailable),
            (true, Some(handle)) => Some(handle.clone()),
            (false, _) => None,
        };

        self.platform.start_discovery()?;

        let generation = {
            let mut state = self.state.lock();
            state.cancel_deadline();
            state.generation += 1;
            state.scanning = true;
            state.connect_in_flight = None;

            if let Some(runtime) = runtime {
                let scanner = Arc::downgrade(self);
                let generation = state.generation;
                let delay = Duration::from_millis(timeout_ms.unsigned_abs());
                state.deadline = Some(runtime.spawn(deadline(scanner, generation, delay)));
            }
            state.generation
        };

        info!(
            "Scan started (cycle {}, timeout {} ms)",
            generation,
            timeout_ms.max(0)
        );
        self.events.scan_status(true);
        Ok(())
    }

    /// Stop discovery and cancel any deadline
    pub fn stop_scan(&self) {
        {
            let mut state = self.state.lock();
            state.cancel_deadline();
            state.generation += 1;
            state.scanning = false;
        }
        self.finish_stop();
    }

    /// Deadline for scan cycle `generation` fired
    fn expire(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation || !state.scanning {
                debug!("Stale scan deadline for cycle {}", generation);
                return;
            }
            // Running inside the deadline task itself; nothing to abort.
            state.deadline = None;
            state.generation += 1;
            state.scanning = false;
        }
        self.finish_stop();
    }

    fn finish_stop(&self) {
        self.platform.stop_discovery();
        info!("Scan stopped");
        self.events.scan_status(false);
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    pub fn set_auto_connect(&self, enabled: bool) {
        self.state.lock().auto_connect = enabled;
    }

    pub fn is_auto_connect(&self) -> bool {
        self.state.lock().auto_connect
    }

    /// Claim the single auto-connect slot for `address`.
    ///
    /// Fails when auto-connect is off, the peer is already connected, or
    /// another auto-connect is still in flight.
    pub fn claim_auto_connect(&self, address: &str, already_connected: bool) -> bool {
        let mut state = self.state.lock();
        if !state.auto_connect || already_connected || state.connect_in_flight.is_some() {
            return false;
        }
        state.connect_in_flight = Some(address.to_string());
        true
    }

    /// Release the claim if it belongs to `address`
    pub fn release_connect(&self, address: &str) {
        let mut state = self.state.lock();
        if state.connect_in_flight.as_deref() == Some(address) {
            debug!("Auto-connect to {} resolved", address);
            state.connect_in_flight = None;
        }
    }

    pub fn connect_in_flight(&self) -> Option<String> {
        self.state.lock().connect_in_flight.clone()
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        self.state.get_mut().cancel_deadline();
    }
}

async fn deadline(scanner: Weak<BleScanner>, generation: u64, delay: Duration) {
    tokio::time::sleep(delay).await;
    match scanner.upgrade() {
        Some(scanner) => scanner.expire(generation),
        None => warn!("Scan deadline fired after scanner was dropped"),
    }
}
