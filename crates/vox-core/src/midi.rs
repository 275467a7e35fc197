//! Raw MIDI 1.0 event types: status/CC constants and byte-level encode/decode.
//!
//! The engine's MIDI reader hands it a stream of raw bytes off a single
//! mutex-guarded queue; everything here stays on that channel-message subset.
//! SysEx, MTC, and other system-exclusive traffic decode to `None` and are
//! dropped by the caller.

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// MIDI CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// MIDI 1.0 status bytes
pub mod status {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_PRESSURE: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;
    pub const SYSTEM: u8 = 0xF0;
}

/// Common MIDI CC numbers
pub mod cc {
    pub const BANK_SELECT_MSB: u8 = 0;
    pub const MOD_WHEEL: u8 = 1;
    pub const BREATH: u8 = 2;
    pub const FOOT_CONTROLLER: u8 = 4;
    pub const PORTAMENTO_TIME: u8 = 5;
    pub const DATA_ENTRY_MSB: u8 = 6;
    pub const VOLUME: u8 = 7;
    pub const BALANCE: u8 = 8;
    pub const PAN: u8 = 10;
    pub const EXPRESSION: u8 = 11;
    pub const EFFECT_1: u8 = 12;
    pub const EFFECT_2: u8 = 13;
    pub const BANK_SELECT_LSB: u8 = 32;
    pub const DATA_ENTRY_LSB: u8 = 38;
    pub const SUSTAIN: u8 = 64;
    pub const PORTAMENTO: u8 = 65;
    pub const SOSTENUTO: u8 = 66;
    pub const SOFT_PEDAL: u8 = 67;
    pub const LEGATO: u8 = 68;
    pub const HOLD_2: u8 = 69;
    pub const SOUND_VARIATION: u8 = 70;
    pub const RESONANCE: u8 = 71;
    pub const RELEASE_TIME: u8 = 72;
    pub const ATTACK_TIME: u8 = 73;
    pub const CUTOFF: u8 = 74;
    pub const DECAY_TIME: u8 = 75;
    pub const VIBRATO_RATE: u8 = 76;
    pub const VIBRATO_DEPTH: u8 = 77;
    pub const VIBRATO_DELAY: u8 = 78;
    pub const REVERB_SEND: u8 = 91;
    pub const TREMOLO: u8 = 92;
    pub const CHORUS_SEND: u8 = 93;
    pub const DETUNE: u8 = 94;
    pub const PHASER: u8 = 95;
    pub const DATA_INCREMENT: u8 = 96;
    pub const DATA_DECREMENT: u8 = 97;
    pub const NRPN_LSB: u8 = 98;
    pub const NRPN_MSB: u8 = 99;
    pub const RPN_LSB: u8 = 100;
    pub const RPN_MSB: u8 = 101;
    pub const ALL_SOUND_OFF: u8 = 120;
    pub const RESET_ALL_CONTROLLERS: u8 = 121;
    pub const LOCAL_CONTROL: u8 = 122;
    pub const ALL_NOTES_OFF: u8 = 123;
    pub const OMNI_OFF: u8 = 124;
    pub const OMNI_ON: u8 = 125;
    pub const MONO_ON: u8 = 126;
    pub const POLY_ON: u8 = 127;
}

// ═══════════════════════════════════════════════════════════════════════════════
// MIDI EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// MIDI channel (0-15)
pub type MidiChannel = u8;

/// MIDI note number (0-127)
pub type NoteNumber = u8;

/// MIDI velocity (0-127 for MIDI 1.0, 0-65535 for MIDI 2.0)
pub type Velocity = u16;

/// MIDI controller number (0-127)
pub type ControllerNumber = u8;

/// MIDI controller value (0-127 for MIDI 1.0, 0-16383 for high-res)
pub type ControllerValue = u16;

/// Note name helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteName {
    C, Cs, D, Ds, E, F, Fs, G, Gs, A, As, B,
}

impl NoteName {
    pub fn from_note(note: NoteNumber) -> (Self, i8) {
        let octave = (note as i8 / 12) - 1;
        let name = match note % 12 {
            0 => NoteName::C,
            1 => NoteName::Cs,
            2 => NoteName::D,
            3 => NoteName::Ds,
            4 => NoteName::E,
            5 => NoteName::F,
            6 => NoteName::Fs,
            7 => NoteName::G,
            8 => NoteName::Gs,
            9 => NoteName::A,
            10 => NoteName::As,
            11 => NoteName::B,
            _ => unreachable!(),
        };
        (name, octave)
    }

    pub fn to_note(self, octave: i8) -> NoteNumber {
        let base = match self {
            NoteName::C => 0,
            NoteName::Cs => 1,
            NoteName::D => 2,
            NoteName::Ds => 3,
            NoteName::E => 4,
            NoteName::F => 5,
            NoteName::Fs => 6,
            NoteName::G => 7,
            NoteName::Gs => 8,
            NoteName::A => 9,
            NoteName::As => 10,
            NoteName::B => 11,
        };
        ((octave + 1) * 12 + base) as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            NoteName::C => "C",
            NoteName::Cs => "C#",
            NoteName::D => "D",
            NoteName::Ds => "D#",
            NoteName::E => "E",
            NoteName::F => "F",
            NoteName::Fs => "F#",
            NoteName::G => "G",
            NoteName::Gs => "G#",
            NoteName::A => "A",
            NoteName::As => "A#",
            NoteName::B => "B",
        }
    }
}

/// MIDI event data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MidiEventData {
    /// Note Off (note, velocity)
    NoteOff {
        note: NoteNumber,
        velocity: Velocity,
    },
    /// Note On (note, velocity) - velocity 0 = note off
    NoteOn {
        note: NoteNumber,
        velocity: Velocity,
    },
    /// Polyphonic Key Pressure (aftertouch per note)
    PolyPressure {
        note: NoteNumber,
        pressure: u16,
    },
    /// Control Change
    ControlChange {
        controller: ControllerNumber,
        value: ControllerValue,
    },
    /// Program Change
    ProgramChange {
        program: u8,
    },
    /// Channel Pressure (aftertouch for whole channel)
    ChannelPressure {
        pressure: u16,
    },
    /// Pitch Bend (-8192 to +8191, center = 0)
    PitchBend {
        value: i16,
    },
    /// System Exclusive (reference to data buffer)
    SysEx {
        length: u32,
        /// Offset into external sysex buffer
        offset: u32,
    },
    /// MIDI Time Code Quarter Frame
    MtcQuarterFrame {
        data: u8,
    },
    /// Song Position Pointer
    SongPosition {
        position: u16,
    },
    /// Song Select
    SongSelect {
        song: u8,
    },
    /// Tune Request
    TuneRequest,
    /// Timing Clock
    TimingClock,
    /// Start
    Start,
    /// Continue
    Continue,
    /// Stop
    Stop,
    /// Active Sensing
    ActiveSensing,
    /// System Reset
    SystemReset,
}

/// Sample-accurate MIDI event
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MidiEvent {
    /// Sample offset within the buffer (0 = start of buffer)
    pub sample_offset: u32,
    /// MIDI channel (0-15, or 0xFF for channel-less messages)
    pub channel: MidiChannel,
    /// Event data
    pub data: MidiEventData,
}

impl MidiEvent {
    /// Create a Note On event
    pub fn note_on(sample_offset: u32, channel: MidiChannel, note: NoteNumber, velocity: Velocity) -> Self {
        Self {
            sample_offset,
            channel,
            data: MidiEventData::NoteOn { note, velocity },
        }
    }

    /// Create a Note Off event
    pub fn note_off(sample_offset: u32, channel: MidiChannel, note: NoteNumber, velocity: Velocity) -> Self {
        Self {
            sample_offset,
            channel,
            data: MidiEventData::NoteOff { note, velocity },
        }
    }

    /// Create a CC event
    pub fn control_change(
        sample_offset: u32,
        channel: MidiChannel,
        controller: ControllerNumber,
        value: ControllerValue,
    ) -> Self {
        Self {
            sample_offset,
            channel,
            data: MidiEventData::ControlChange { controller, value },
        }
    }

    /// Create a Pitch Bend event
    pub fn pitch_bend(sample_offset: u32, channel: MidiChannel, value: i16) -> Self {
        Self {
            sample_offset,
            channel,
            data: MidiEventData::PitchBend { value },
        }
    }

    /// Create a Program Change event
    pub fn program_change(sample_offset: u32, channel: MidiChannel, program: u8) -> Self {
        Self {
            sample_offset,
            channel,
            data: MidiEventData::ProgramChange { program },
        }
    }

    /// Convert from raw MIDI bytes
    pub fn from_bytes(sample_offset: u32, bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }

        let status = bytes[0];
        let channel = status & 0x0F;
        let msg_type = status & 0xF0;

        let data = match msg_type {
            status::NOTE_OFF if bytes.len() >= 3 => MidiEventData::NoteOff {
                note: bytes[1] & 0x7F,
                velocity: (bytes[2] & 0x7F) as u16,
            },
            status::NOTE_ON if bytes.len() >= 3 => {
                let velocity = (bytes[2] & 0x7F) as u16;
                if velocity == 0 {
                    MidiEventData::NoteOff {
                        note: bytes[1] & 0x7F,
                        velocity: 64,
                    }
                } else {
                    MidiEventData::NoteOn {
                        note: bytes[1] & 0x7F,
                        velocity,
                    }
                }
            }
            status::POLY_PRESSURE if bytes.len() >= 3 => MidiEventData::PolyPressure {
                note: bytes[1] & 0x7F,
                pressure: (bytes[2] & 0x7F) as u16,
            },
            status::CONTROL_CHANGE if bytes.len() >= 3 => MidiEventData::ControlChange {
                controller: bytes[1] & 0x7F,
                value: (bytes[2] & 0x7F) as u16,
            },
            status::PROGRAM_CHANGE if bytes.len() >= 2 => MidiEventData::ProgramChange {
                program: bytes[1] & 0x7F,
            },
            status::CHANNEL_PRESSURE if bytes.len() >= 2 => MidiEventData::ChannelPressure {
                pressure: (bytes[1] & 0x7F) as u16,
            },
            status::PITCH_BEND if bytes.len() >= 3 => {
                let lsb = bytes[1] as i16 & 0x7F;
                let msb = bytes[2] as i16 & 0x7F;
                let value = ((msb << 7) | lsb) - 8192;
                MidiEventData::PitchBend { value }
            }
            status::SYSTEM => match status {
                0xF8 => MidiEventData::TimingClock,
                0xFA => MidiEventData::Start,
                0xFB => MidiEventData::Continue,
                0xFC => MidiEventData::Stop,
                0xFE => MidiEventData::ActiveSensing,
                0xFF => MidiEventData::SystemReset,
                _ => return None,
            },
            _ => return None,
        };

        Some(Self {
            sample_offset,
            channel: if msg_type >= 0xF0 { 0xFF } else { channel },
            data,
        })
    }

    /// Convert to raw MIDI bytes
    pub fn to_bytes(&self, buffer: &mut [u8]) -> usize {
        match self.data {
            MidiEventData::NoteOff { note, velocity } => {
                if buffer.len() >= 3 {
                    buffer[0] = status::NOTE_OFF | (self.channel & 0x0F);
                    buffer[1] = note & 0x7F;
                    buffer[2] = (velocity.min(127)) as u8;
                    3
                } else {
                    0
                }
            }
            MidiEventData::NoteOn { note, velocity } => {
                if buffer.len() >= 3 {
                    buffer[0] = status::NOTE_ON | (self.channel & 0x0F);
                    buffer[1] = note & 0x7F;
                    buffer[2] = (velocity.min(127)) as u8;
                    3
                } else {
                    0
                }
            }
            MidiEventData::ControlChange { controller, value } => {
                if buffer.len() >= 3 {
                    buffer[0] = status::CONTROL_CHANGE | (self.channel & 0x0F);
                    buffer[1] = controller & 0x7F;
                    buffer[2] = (value.min(127)) as u8;
                    3
                } else {
                    0
                }
            }
            MidiEventData::PitchBend { value } => {
                if buffer.len() >= 3 {
                    let bent = (value + 8192).clamp(0, 16383) as u16;
                    buffer[0] = status::PITCH_BEND | (self.channel & 0x0F);
                    buffer[1] = (bent & 0x7F) as u8;
                    buffer[2] = ((bent >> 7) & 0x7F) as u8;
                    3
                } else {
                    0
                }
            }
            MidiEventData::ProgramChange { program } => {
                if buffer.len() >= 2 {
                    buffer[0] = status::PROGRAM_CHANGE | (self.channel & 0x0F);
                    buffer[1] = program & 0x7F;
                    2
                } else {
                    0
                }
            }
            MidiEventData::ChannelPressure { pressure } => {
                if buffer.len() >= 2 {
                    buffer[0] = status::CHANNEL_PRESSURE | (self.channel & 0x0F);
                    buffer[1] = (pressure.min(127)) as u8;
                    2
                } else {
                    0
                }
            }
            MidiEventData::PolyPressure { note, pressure } => {
                if buffer.len() >= 3 {
                    buffer[0] = status::POLY_PRESSURE | (self.channel & 0x0F);
                    buffer[1] = note & 0x7F;
                    buffer[2] = (pressure.min(127)) as u8;
                    3
                } else {
                    0
                }
            }
            MidiEventData::TimingClock => {
                if !buffer.is_empty() {
                    buffer[0] = 0xF8;
                    1
                } else {
                    0
                }
            }
            MidiEventData::Start => {
                if !buffer.is_empty() {
                    buffer[0] = 0xFA;
                    1
                } else {
                    0
                }
            }
            MidiEventData::Continue => {
                if !buffer.is_empty() {
                    buffer[0] = 0xFB;
                    1
                } else {
                    0
                }
            }
            MidiEventData::Stop => {
                if !buffer.is_empty() {
                    buffer[0] = 0xFC;
                    1
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    /// Check if this is a note event
    pub fn is_note(&self) -> bool {
        matches!(self.data, MidiEventData::NoteOn { .. } | MidiEventData::NoteOff { .. })
    }

    /// Check if this is a note on with velocity > 0
    pub fn is_note_on(&self) -> bool {
        matches!(self.data, MidiEventData::NoteOn { velocity, .. } if velocity > 0)
    }

    /// Check if this is a note off (or note on with velocity 0)
    pub fn is_note_off(&self) -> bool {
        matches!(
            self.data,
            MidiEventData::NoteOff { .. } | MidiEventData::NoteOn { velocity: 0, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_name() {
        let (name, octave) = NoteName::from_note(60);
        assert_eq!(name, NoteName::C);
        assert_eq!(octave, 4);

        let note = NoteName::A.to_note(4);
        assert_eq!(note, 69); // A4 = 440Hz
    }

    #[test]
    fn test_midi_event_from_bytes() {
        // Note On
        let bytes = [0x91, 60, 100];
        let event = MidiEvent::from_bytes(0, &bytes).unwrap();
        assert_eq!(event.channel, 1);
        assert!(matches!(event.data, MidiEventData::NoteOn { note: 60, velocity: 100 }));

        // Note On with velocity 0 = Note Off
        let bytes = [0x90, 64, 0];
        let event = MidiEvent::from_bytes(0, &bytes).unwrap();
        assert!(event.is_note_off());
    }

    #[test]
    fn test_midi_event_to_bytes() {
        let event = MidiEvent::note_on(0, 0, 60, 127);
        let mut buffer = [0u8; 3];
        let len = event.to_bytes(&mut buffer);
        assert_eq!(len, 3);
        assert_eq!(buffer, [0x90, 60, 127]);
    }

    #[test]
    fn test_midi_event_ignores_sysex_and_system_common() {
        assert!(MidiEvent::from_bytes(0, &[0xF0, 0x43, 0x10]).is_none());
        assert!(MidiEvent::from_bytes(0, &[0xF1, 0x00]).is_none());
    }
}
