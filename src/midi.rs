//! MIDI event types and output.
//!
//! Defines the three-byte channel-voice event the engine records and
//! replays, classification helpers following the MIDI 1.0 specification,
//! and a thin wrapper around a `midir` output connection.

use midir::{MidiOutput, MidiOutputConnection};

/// Note Off (0x80-0x8F)
pub const NOTE_OFF: u8 = 0x80;

/// Note On (0x90-0x9F); velocity 0 is equivalent to Note Off
pub const NOTE_ON: u8 = 0x90;

/// Polyphonic aftertouch
pub const POLY_PRESSURE: u8 = 0xA0;

/// Control change
pub const CONTROL_CHANGE: u8 = 0xB0;

/// Program change (two-byte message)
pub const PROGRAM_CHANGE: u8 = 0xC0;

/// Channel aftertouch (two-byte message)
pub const CHANNEL_PRESSURE: u8 = 0xD0;

/// Pitch bend
pub const PITCH_BEND: u8 = 0xE0;

/// Sustain pedal controller number
pub const CC_SUSTAIN: u8 = 64;

/// A MIDI channel-voice message.
///
/// Always carried as three bytes; for the two-byte message kinds (program
/// change, channel pressure) `data2` is 0 and is not sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl MidiEvent {
    pub fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            status,
            data1,
            data2,
        }
    }

    /// Parse a raw wire message into an event.
    ///
    /// Returns `None` for system messages (status 0xF0 and above), data
    /// bytes without a status, and truncated messages.
    pub fn from_bytes(message: &[u8]) -> Option<Self> {
        let status = *message.first()?;
        if !(0x80..0xF0).contains(&status) {
            return None;
        }
        let data1 = *message.get(1)?;
        if message_len(status) == 3 {
            Some(Self::new(status, data1, *message.get(2)?))
        } else {
            Some(Self::new(status, data1, 0))
        }
    }

    /// Raw wire bytes, two or three depending on the message kind.
    pub fn to_bytes(&self) -> Vec<u8> {
        if message_len(self.status) == 3 {
            vec![self.status, self.data1, self.data2]
        } else {
            vec![self.status, self.data1]
        }
    }

    /// Status with the channel nibble masked off.
    pub fn kind(&self) -> u8 {
        self.status & 0xF0
    }

    /// MIDI channel, 0-15.
    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    pub fn is_note_on(&self) -> bool {
        self.kind() == NOTE_ON && self.data2 > 0
    }

    /// Note Off status, or Note On with velocity 0.
    pub fn is_note_off(&self) -> bool {
        self.kind() == NOTE_OFF || (self.kind() == NOTE_ON && self.data2 == 0)
    }
}

/// Wire length of a channel-voice message with the given status byte.
pub fn message_len(status: u8) -> usize {
    match status & 0xF0 {
        PROGRAM_CHANGE | CHANNEL_PRESSURE => 2,
        _ => 3,
    }
}

/// Wrapper for the MIDI output connection the looper plays into.
pub struct MidiOut {
    connection: MidiOutputConnection,
    pub port_name: String,
}

impl MidiOut {
    /// Open an output port, preferring one whose name contains `preferred`.
    /// Falls back to the first available port.
    pub fn new(preferred: Option<&str>) -> Result<Self, String> {
        let midi_out = MidiOutput::new("overdub-out")
            .map_err(|e| format!("Failed to create MIDI output: {}", e))?;

        let ports = midi_out.ports();
        if ports.is_empty() {
            return Err("No MIDI output ports found".to_string());
        }

        let port_idx = preferred
            .and_then(|wanted| {
                ports.iter().position(|p| {
                    midi_out
                        .port_name(p)
                        .map(|n| n.contains(wanted))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(0);

        let port = &ports[port_idx];
        let port_name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());

        let connection = midi_out
            .connect(port, "overdub-out")
            .map_err(|e| format!("Failed to connect MIDI output: {}", e))?;

        println!("MIDI output connected to: {}", port_name);
        Ok(Self {
            connection,
            port_name,
        })
    }

    /// Send a raw MIDI message.
    pub fn send(&mut self, message: &[u8]) -> Result<(), String> {
        self.connection
            .send(message)
            .map_err(|e| format!("Failed to send MIDI: {}", e))
    }

    /// Send a channel-voice event.
    pub fn send_event(&mut self, ev: &MidiEvent) -> Result<(), String> {
        self.send(&ev.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_classification() {
        let ev = MidiEvent::new(0x93, 60, 100);
        assert!(ev.is_note_on());
        assert!(!ev.is_note_off());
        assert_eq!(ev.channel(), 3);
        assert_eq!(ev.kind(), NOTE_ON);
    }

    #[test]
    fn test_note_on_velocity_zero_is_note_off() {
        let ev = MidiEvent::new(0x90, 60, 0);
        assert!(!ev.is_note_on());
        assert!(ev.is_note_off());
    }

    #[test]
    fn test_note_off_classification() {
        let ev = MidiEvent::new(0x85, 60, 64);
        assert!(ev.is_note_off());
        assert!(!ev.is_note_on());
    }

    #[test]
    fn test_other_events_are_neither() {
        let cc = MidiEvent::new(0xB0, 7, 100);
        assert!(!cc.is_note_on());
        assert!(!cc.is_note_off());
    }

    #[test]
    fn test_from_bytes_rejects_system_messages() {
        assert_eq!(MidiEvent::from_bytes(&[0xF8]), None);
        assert_eq!(MidiEvent::from_bytes(&[0xF0, 0x7E, 0xF7]), None);
    }

    #[test]
    fn test_from_bytes_rejects_data_bytes() {
        assert_eq!(MidiEvent::from_bytes(&[60, 100]), None);
        assert_eq!(MidiEvent::from_bytes(&[]), None);
    }

    #[test]
    fn test_from_bytes_truncated() {
        assert_eq!(MidiEvent::from_bytes(&[0x90, 60]), None);
        assert_eq!(
            MidiEvent::from_bytes(&[0x90, 60, 100]),
            Some(MidiEvent::new(0x90, 60, 100))
        );
    }

    #[test]
    fn test_two_byte_messages_round_trip() {
        let pc = MidiEvent::from_bytes(&[0xC2, 17]).unwrap();
        assert_eq!(pc, MidiEvent::new(0xC2, 17, 0));
        assert_eq!(pc.to_bytes(), vec![0xC2, 17]);

        let at = MidiEvent::from_bytes(&[0xD0, 90]).unwrap();
        assert_eq!(at.to_bytes(), vec![0xD0, 90]);
    }

    #[test]
    fn test_pitch_bend_round_trip() {
        let ev = MidiEvent::new(0xE1, 0x00, 0x40);
        assert_eq!(MidiEvent::from_bytes(&ev.to_bytes()), Some(ev));
    }
}
