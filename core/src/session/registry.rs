//! Session registry
//!
//! Address-keyed tables of live sessions and the devices bound to them. All
//! three tables sit behind one lock so a reader never sees a device whose
//! session is gone.

use crate::midi::device::{MidiInputDevice, MidiOutputDevice};
use crate::session::GattSession;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Result of binding devices to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    /// The session was torn down or replaced
    Stale,
    /// Devices are already bound for this connection
    Duplicate,
}

/// Everything removed for one address, already closed and cleared
#[derive(Debug)]
pub struct RemovedSession {
    pub session: Arc<GattSession>,
    pub inputs: Vec<Arc<MidiInputDevice>>,
    pub outputs: Vec<Arc<MidiOutputDevice>>,
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, Arc<GattSession>>,
    inputs: HashMap<String, HashSet<Arc<MidiInputDevice>>>,
    outputs: HashMap<String, HashSet<Arc<MidiOutputDevice>>>,
}

impl Tables {
    fn take(&mut self, address: &str) -> Option<RemovedSession> {
        let session = self.sessions.remove(address)?;
        session.close();

        let inputs: Vec<_> = self
            .inputs
            .remove(address)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        let outputs: Vec<_> = self
            .outputs
            .remove(address)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for input in &inputs {
            input.clear();
        }
        for output in &outputs {
            output.clear();
        }

        Some(RemovedSession {
            session,
            inputs,
            outputs,
        })
    }
}

/// Registry of connected peers
#[derive(Default)]
pub struct SessionRegistry {
    tables: Mutex<Tables>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session unless one already exists for the address
    pub fn insert_session(&self, session: Arc<GattSession>) -> bool {
        let mut tables = self.tables.lock();
        let address = session.address().to_string();
        if tables.sessions.contains_key(&address) {
            return false;
        }
        tables.sessions.insert(address, session);
        true
    }

    pub fn session(&self, address: &str) -> Option<Arc<GattSession>> {
        self.tables.lock().sessions.get(address).cloned()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.tables.lock().sessions.contains_key(address)
    }

    /// Whether `session` is still the registered session for its address
    pub fn is_current(&self, session: &GattSession) -> bool {
        self.tables
            .lock()
            .sessions
            .get(session.address())
            .is_some_and(|current| current.id() == session.id())
    }

    /// Bind freshly built devices to a session.
    ///
    /// Nothing is stored unless the session is still current and has no
    /// devices yet.
    pub fn attach(
        &self,
        session: &Arc<GattSession>,
        input: Option<Arc<MidiInputDevice>>,
        output: Option<Arc<MidiOutputDevice>>,
    ) -> AttachOutcome {
        let mut tables = self.tables.lock();
        let address = session.address();

        match tables.sessions.get(address) {
            Some(current) if current.id() == session.id() => {}
            _ => return AttachOutcome::Stale,
        }
        if tables.inputs.contains_key(address) || tables.outputs.contains_key(address) {
            return AttachOutcome::Duplicate;
        }

        if let Some(input) = input {
            tables
                .inputs
                .entry(address.to_string())
                .or_default()
                .insert(input);
        }
        if let Some(output) = output {
            tables
                .outputs
                .entry(address.to_string())
                .or_default()
                .insert(output);
        }

        AttachOutcome::Attached
    }

    /// Remove, close and clear everything held for `address`
    pub fn remove(&self, address: &str) -> Option<RemovedSession> {
        let removed = self.tables.lock().take(address);
        if removed.is_some() {
            debug!("Removed session for {}", address);
        }
        removed
    }

    /// Remove every session in one critical section
    pub fn drain(&self) -> Vec<RemovedSession> {
        let mut tables = self.tables.lock();
        let addresses: Vec<String> = tables.sessions.keys().cloned().collect();
        addresses
            .iter()
            .filter_map(|address| tables.take(address))
            .collect()
    }

    /// Snapshot of every bound input device
    pub fn input_devices(&self) -> HashSet<Arc<MidiInputDevice>> {
        self.tables
            .lock()
            .inputs
            .values()
            .flat_map(|set| set.iter().cloned())
            .collect()
    }

    /// Snapshot of every bound output device
    pub fn output_devices(&self) -> HashSet<Arc<MidiOutputDevice>> {
        self.tables
            .lock()
            .outputs
            .values()
            .flat_map(|set| set.iter().cloned())
            .collect()
    }

    pub fn inputs_for(&self, address: &str) -> Vec<Arc<MidiInputDevice>> {
        self.tables
            .lock()
            .inputs
            .get(address)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn outputs_for(&self, address: &str) -> Vec<Arc<MidiOutputDevice>> {
        self.tables
            .lock()
            .outputs
            .get(address)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.tables.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check the table invariant: device keys are a subset of session keys
    /// and device sets are never empty.
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let tables = self.tables.lock();
        tables
            .inputs
            .iter()
            .all(|(k, set)| !set.is_empty() && tables.sessions.contains_key(k))
            && tables
                .outputs
                .iter()
                .all(|(k, set)| !set.is_empty() && tables.sessions.contains_key(k))
    }
}
