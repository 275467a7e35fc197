//! Per-channel MIDI-like state tracked by a `Sequencer`.

use vox_format::ObjectId;

use crate::VoiceId;

/// One of a sequencer's 16 channels: its bound program plus MIDI controller
/// state and the active-voice table, keyed by sounding note.
pub struct Channel {
    pub program: Option<ObjectId>,
    pub controllers: [u8; 128],
    /// Pitch wheel, normalized to `[-1, 1]`.
    pub pitch_wheel: f64,
    active_voices: [Option<VoiceId>; 128],
}

impl Channel {
    pub fn new() -> Self {
        Self {
            program: None,
            controllers: [0; 128],
            pitch_wheel: 0.0,
            active_voices: [None; 128],
        }
    }

    pub fn voice_for_note(&self, note: u8) -> Option<VoiceId> {
        self.active_voices[note as usize]
    }

    pub fn set_voice_for_note(&mut self, note: u8, voice: Option<VoiceId>) {
        self.active_voices[note as usize] = voice;
    }

    pub fn active_notes(&self) -> impl Iterator<Item = (u8, VoiceId)> + '_ {
        self.active_voices
            .iter()
            .enumerate()
            .filter_map(|(note, v)| v.map(|v| (note as u8, v)))
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}
