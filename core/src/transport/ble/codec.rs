//! BLE-MIDI packet codec
//!
//! Translates between raw GATT characteristic payloads and plain MIDI byte
//! streams. Both directions are stateless pure functions.
//!
//! Known protocol-fidelity gap: the BLE-MIDI wire format prefixes every packet
//! with a header byte and interleaves timestamp bytes whose values range over
//! `0x80..=0xFF`. This codec does not parse them. Decoding only strips bytes
//! equal to [`SENTINEL`], which is correct for peers that always send a zero
//! timestamp and will corrupt payloads carrying non-zero timestamps or SysEx
//! continuation packets. Whether full timestamp semantics are in scope is an
//! open product decision; do not change this behavior without one.

use super::gatt::MAX_ATTRIBUTE_LEN;

/// Header/timestamp byte treated as padding on decode
pub const SENTINEL: u8 = 0x80;

/// Decode a notification payload into MIDI bytes.
///
/// Payloads of one byte or less carry no data and yield `None`. Otherwise every
/// [`SENTINEL`] byte is removed and the remaining bytes are returned in order;
/// the result may be empty.
pub fn decode(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() <= 1 {
        return None;
    }

    Some(
        payload
            .iter()
            .copied()
            .filter(|byte| *byte != SENTINEL)
            .collect(),
    )
}

/// Encode outgoing MIDI bytes into characteristic writes.
///
/// Each write holds at most `max_write_len` bytes (clamped to
/// `1..=MAX_ATTRIBUTE_LEN`). No header or timestamp is added.
pub fn encode(midi: &[u8], max_write_len: usize) -> Vec<Vec<u8>> {
    if midi.is_empty() {
        return Vec::new();
    }

    let limit = max_write_len.clamp(1, MAX_ATTRIBUTE_LEN);
    midi.chunks(limit).map(<[u8]>::to_vec).collect()
}
