// MIDI layer — device handles and the listener fan-out

pub mod device;
pub mod events;

pub use device::{MidiDevice, MidiInputDevice, MidiOutputDevice};
pub use events::{DeviceStatus, EventDispatcher};
