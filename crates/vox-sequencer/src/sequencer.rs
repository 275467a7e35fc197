//! The live song/sfx-group instance: per-channel MIDI state, key-on
//! resolution against a group's pool, and the attached `SongState` driver.

use vox_format::{AudioGroupPool, DataFormat, ObjectId, SongGroup};

use crate::channel::Channel;
use crate::song_state::{SongDispatch, SongState};

/// Opaque identifier for a voice spawned through a `VoiceSink`. Dense and
/// unique among live voices, per the owning engine's allocation scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u32);

/// What a `Sequencer` delegates actual voice lifetime to. Implemented by the
/// engine, which owns the sound-macro interpreter.
pub trait VoiceSink {
    /// Spawns one voice bound to `macro_id`, returning its id if the macro
    /// allocates successfully (a missing sound macro is a recoverable error).
    #[allow(clippy::too_many_arguments)]
    fn spawn_voice(
        &mut self,
        macro_id: ObjectId,
        note: u8,
        vel: u8,
        transpose: i8,
        pan: i8,
        volume: u8,
    ) -> Option<VoiceId>;

    fn key_off_voice(&mut self, voice: VoiceId, vel: u8);
    fn kill_voice(&mut self, voice: VoiceId);
    fn send_macro_message(&mut self, obj_id: ObjectId, val: i32);
    fn kill_keygroup(&mut self, keygroup: u8, now: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Playing,
    Paused,
    Dead,
}

/// A live song or sfx-group instance. Generic over the `VoiceSink` that
/// actually owns voice lifetimes.
pub struct Sequencer<'a, V: VoiceSink> {
    pool: &'a AudioGroupPool,
    pool_bytes: &'a [u8],
    format: DataFormat,
    channels: [Channel; 16],
    state: SequencerState,
    song: Option<SongState<'a>>,
    voices: V,
}

impl<'a, V: VoiceSink> Sequencer<'a, V> {
    pub fn new(pool: &'a AudioGroupPool, pool_bytes: &'a [u8], format: DataFormat, voices: V) -> Self {
        Self {
            pool,
            pool_bytes,
            format,
            channels: std::array::from_fn(|_| Channel::new()),
            state: SequencerState::Playing,
            song: None,
            voices,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn key_on(&mut self, chan: u8, note: u8, vel: u8) {
        if self.state == SequencerState::Dead {
            return;
        }
        let Some(channel) = self.channels.get_mut(chan as usize) else {
            return;
        };

        if let Some(prior) = channel.voice_for_note(note) {
            self.voices.kill_voice(prior);
            self.channels[chan as usize].set_voice_for_note(note, None);
        }

        let Some(program) = self.channels[chan as usize].program else {
            return;
        };

        if let Some(entry) = self.pool.keymap_entry(self.pool_bytes, program, note, self.format) {
            if let Some(voice) = self.voices.spawn_voice(
                entry.macro_id,
                note,
                vel,
                entry.transpose,
                entry.pan,
                entry.volume,
            ) {
                self.channels[chan as usize].set_voice_for_note(note, Some(voice));
            }
            return;
        }

        if let Some(layers) = self.pool.layers(program) {
            for layer in layers.iter().filter(|l| l.covers(note)) {
                if let Some(voice) = self.voices.spawn_voice(
                    layer.macro_id,
                    note,
                    vel,
                    layer.transpose,
                    layer.pan,
                    layer.volume,
                ) {
                    self.channels[chan as usize].set_voice_for_note(note, Some(voice));
                }
            }
        }
    }

    pub fn key_off(&mut self, chan: u8, note: u8, vel: u8) {
        let Some(channel) = self.channels.get_mut(chan as usize) else {
            return;
        };
        if let Some(voice) = channel.voice_for_note(note) {
            self.voices.key_off_voice(voice, vel);
            channel.set_voice_for_note(note, None);
        }
    }

    pub fn set_ctrl_value(&mut self, chan: u8, ctrl: u8, val: u8) {
        if let Some(channel) = self.channels.get_mut(chan as usize) {
            channel.controllers[ctrl as usize] = val;
        }
    }

    pub fn set_pitch_wheel(&mut self, chan: u8, norm: f64) {
        if let Some(channel) = self.channels.get_mut(chan as usize) {
            channel.pitch_wheel = norm.clamp(-1.0, 1.0);
        }
    }

    pub fn set_chan_program(&mut self, chan: u8, prog: u16) {
        if let Some(channel) = self.channels.get_mut(chan as usize) {
            channel.program = Some(ObjectId(prog));
        }
    }

    pub fn set_tempo(&mut self, _bpm: f64) {
        // Tempo is owned by the attached SongState; the sequencer has no
        // independent notion of tempo outside song playback.
    }

    pub fn all_off(&mut self, chan: u8, hard: bool) {
        let Some(channel) = self.channels.get_mut(chan as usize) else {
            return;
        };
        let notes: Vec<(u8, VoiceId)> = channel.active_notes().collect();
        for (note, voice) in notes {
            if hard {
                self.voices.kill_voice(voice);
            } else {
                self.voices.key_off_voice(voice, 0);
            }
            channel.set_voice_for_note(note, None);
        }
    }

    pub fn kill_keygroup(&mut self, keygroup: u8, now: bool) {
        self.voices.kill_keygroup(keygroup, now);
    }

    /// Attaches a song blob, decoding its header and detecting its event
    /// stream version. On decode failure the sequencer stays inert.
    pub fn play_song(&mut self, song: &'a [u8]) {
        self.song = SongState::initialize(song);
    }

    /// Primes every MIDI channel's program from a song-group's initial
    /// setup, mirroring how the original sequencer's constructor applies a
    /// `setupId`-selected program table before any playback begins.
    pub fn apply_song_group(&mut self, group: &SongGroup) {
        for (chan, program) in group.channel_programs.iter().enumerate() {
            if let Some(program) = program {
                self.channels[chan].program = Some(*program);
            }
        }
    }

    pub fn advance(&mut self, dt: f64) {
        if self.state != SequencerState::Playing {
            return;
        }
        if let Some(mut song) = self.song.take() {
            song.advance(dt, self);
            if song.is_stopped() {
                self.state = SequencerState::Dead;
            } else {
                self.song = Some(song);
            }
        }
    }

    /// Whether this sequencer currently tracks `voice` in any channel slot.
    pub fn find_voice(&self, voice: VoiceId) -> bool {
        self.channels
            .iter()
            .any(|c| c.active_notes().any(|(_, v)| v == voice))
    }

    pub fn send_macro_message(&mut self, obj_id: ObjectId, val: i32) {
        self.voices.send_macro_message(obj_id, val);
    }

    pub fn kill(&mut self) {
        for chan in 0..16u8 {
            self.all_off(chan, true);
        }
        self.state = SequencerState::Dead;
    }
}

impl<'a, V: VoiceSink> SongDispatch for Sequencer<'a, V> {
    fn key_on(&mut self, chan: u8, note: u8, vel: u8) {
        Sequencer::key_on(self, chan, note, vel);
    }

    fn key_off(&mut self, chan: u8, note: u8, vel: u8) {
        Sequencer::key_off(self, chan, note, vel);
    }

    fn set_ctrl_value(&mut self, chan: u8, ctrl: u8, val: u8) {
        Sequencer::set_ctrl_value(self, chan, ctrl, val);
    }

    fn set_pitch_wheel(&mut self, chan: u8, norm: f64) {
        Sequencer::set_pitch_wheel(self, chan, norm);
    }

    fn set_chan_program(&mut self, chan: u8, prog: u16) {
        Sequencer::set_chan_program(self, chan, prog);
    }

    fn set_tempo(&mut self, bpm: f64) {
        Sequencer::set_tempo(self, bpm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_format::LayerMapping;

    struct FakeVoices {
        next_id: u32,
        killed: Vec<VoiceId>,
    }

    impl VoiceSink for FakeVoices {
        fn spawn_voice(
            &mut self,
            _macro_id: ObjectId,
            _note: u8,
            _vel: u8,
            _transpose: i8,
            _pan: i8,
            _volume: u8,
        ) -> Option<VoiceId> {
            self.next_id += 1;
            Some(VoiceId(self.next_id))
        }

        fn key_off_voice(&mut self, voice: VoiceId, _vel: u8) {
            self.killed.push(voice);
        }

        fn kill_voice(&mut self, voice: VoiceId) {
            self.killed.push(voice);
        }

        fn send_macro_message(&mut self, _obj_id: ObjectId, _val: i32) {}

        fn kill_keygroup(&mut self, _keygroup: u8, _now: bool) {}
    }

    #[test]
    fn key_on_duplicate_note_kills_prior_voice() {
        let pool_bytes = vec![0u8; 16];
        let pool = AudioGroupPool::new(&pool_bytes, DataFormat::Gcn);
        let voices = FakeVoices { next_id: 0, killed: Vec::new() };
        let mut seq = Sequencer::new(&pool, &pool_bytes, DataFormat::Gcn, voices);

        seq.set_chan_program(0, 1);
        // No keymap/layers registered for program 1, so key_on is a no-op;
        // this still exercises the duplicate-kill path being skipped safely.
        seq.key_on(0, 60, 100);
        seq.key_on(0, 60, 100);
        assert!(seq.voices.killed.is_empty());
    }

    #[test]
    fn all_off_clears_channel_voices() {
        let pool_bytes = vec![0u8; 16];
        let pool = AudioGroupPool::new(&pool_bytes, DataFormat::Gcn);
        let voices = FakeVoices { next_id: 0, killed: Vec::new() };
        let mut seq = Sequencer::new(&pool, &pool_bytes, DataFormat::Gcn, voices);
        seq.channels[0].set_voice_for_note(60, Some(VoiceId(1)));

        seq.all_off(0, true);
        assert_eq!(seq.voices.killed, vec![VoiceId(1)]);
        assert!(seq.channels[0].voice_for_note(60).is_none());
    }

    #[test]
    fn layer_key_on_spawns_voice_for_covering_range() {
        // Build a pool with one layer-list record covering notes 0..=127.
        let mut pool_blob = vec![0u8; 16];
        let layers_off = pool_blob.len() as u32;
        let mut rec = Vec::new();
        let size_placeholder = 0u32;
        rec.extend_from_slice(&size_placeholder.to_be_bytes());
        rec.extend_from_slice(&7u16.to_be_bytes()); // id
        rec.extend_from_slice(&[0, 0]);
        rec.extend_from_slice(&1u32.to_be_bytes()); // count
        let mapping = LayerMapping {
            macro_id: ObjectId(42),
            key_lo: 0,
            key_hi: 127,
            transpose: 0,
            pan: 0,
            volume: 127,
            priority: 0,
            reserved: 0,
        };
        rec.extend_from_slice(&mapping.macro_id.to_bytes(DataFormat::Gcn));
        rec.push(mapping.key_lo);
        rec.push(mapping.key_hi);
        rec.push(mapping.transpose as u8);
        rec.push(mapping.pan as u8);
        rec.push(mapping.volume);
        rec.push(mapping.priority);
        rec.extend_from_slice(&mapping.reserved.to_be_bytes());
        let size = rec.len() as u32;
        rec[0..4].copy_from_slice(&size.to_be_bytes());
        pool_blob.extend_from_slice(&rec);
        pool_blob.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());

        pool_blob[12..16].copy_from_slice(&layers_off.to_be_bytes());

        let pool = AudioGroupPool::new(&pool_blob, DataFormat::Gcn);
        let voices = FakeVoices { next_id: 0, killed: Vec::new() };
        let mut seq = Sequencer::new(&pool, &pool_blob, DataFormat::Gcn, voices);
        seq.set_chan_program(0, 7);
        seq.key_on(0, 60, 100);

        assert!(seq.channels[0].voice_for_note(60).is_some());
    }
}
