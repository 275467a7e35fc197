//! The engine: owns audio groups, studios, voices, and sequencers, and
//! drives the 5ms scheduling tick that advances all of them.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use vox_audio::{Backend, VoiceHandle};
use vox_core::{MidiEvent, MidiEventData};
use vox_format::{
    AdpcmParms, AudioGroupData, AudioGroupPool, AudioGroupSampleDirectory, DataFormat, ObjectId,
    ProjectIndex, SampleEntry, SfxEntry,
};
use vox_sequencer::{Sequencer, VoiceId as SeqVoiceId, VoiceSink};

use crate::studio::{Effect, Studio};
use crate::voice::{Voice, VoiceId};

/// How an emitter's requested volume is interpreted before reaching the
/// backend: linear gain or perceptual decibels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmplitudeMode {
    Normalized,
    Decibels,
}

struct AudioGroupEntry<'a> {
    pool: &'a AudioGroupPool,
    sdir: &'a AudioGroupSampleDirectory,
    proj: &'a ProjectIndex,
    data: AudioGroupData<'a>,
}

/// Shared mutable voice storage. A `Sequencer`'s `VoiceSink` holds a clone of
/// this handle so it can spawn/kill real voices without the engine lending
/// it a direct `&mut Engine` (which would alias the engine's own borrow of
/// the sequencer that holds the sink) — the Rust analogue of amuse's raw
/// `Engine*` back-pointer on every `Voice`.
#[derive(Clone)]
struct VoiceTable {
    voices: Rc<RefCell<HashMap<u32, Voice>>>,
    next_vid: Rc<Cell<u32>>,
}

impl VoiceTable {
    fn new() -> Self {
        Self {
            voices: Rc::new(RefCell::new(HashMap::new())),
            next_vid: Rc::new(Cell::new(1)),
        }
    }

    fn alloc_vid(&self) -> VoiceId {
        let vid = self.next_vid.get();
        self.next_vid.set(vid + 1);
        VoiceId(vid)
    }
}

struct EngineVoiceSink<'a> {
    group_id: usize,
    pool: &'a AudioGroupPool,
    pool_bytes: &'a [u8],
    format: DataFormat,
    studio_id: u32,
    table: VoiceTable,
    backend: Rc<RefCell<dyn Backend>>,
}

impl<'a> VoiceSink for EngineVoiceSink<'a> {
    fn spawn_voice(
        &mut self,
        macro_id: ObjectId,
        note: u8,
        vel: u8,
        transpose: i8,
        pan: i8,
        volume: u8,
    ) -> Option<SeqVoiceId> {
        let sample_rate = self.backend.borrow().get_available_set().sample_rate;
        let handle = self.backend.borrow_mut().allocate_voice(sample_rate, true);
        let vid = self.table.alloc_vid();
        let voice = Voice::new(
            vid,
            self.group_id,
            macro_id,
            handle,
            self.pool,
            self.pool_bytes,
            self.format,
            note,
            vel,
            transpose,
            pan,
            volume,
            self.studio_id,
            false,
        );
        match voice {
            Some(voice) => {
                self.table.voices.borrow_mut().insert(vid.0, voice);
                Some(SeqVoiceId(vid.0))
            }
            None => {
                self.backend.borrow_mut().release_voice(handle);
                None
            }
        }
    }

    fn key_off_voice(&mut self, voice: SeqVoiceId, _vel: u8) {
        if let Some(v) = self.table.voices.borrow_mut().get_mut(&voice.0) {
            v.key_off();
        }
    }

    fn kill_voice(&mut self, voice: SeqVoiceId) {
        if let Some(v) = self.table.voices.borrow_mut().get_mut(&voice.0) {
            v.kill();
        }
    }

    fn send_macro_message(&mut self, obj_id: ObjectId, val: i32) {
        for voice in self.table.voices.borrow_mut().values_mut() {
            if voice.macro_id() == obj_id {
                voice.message(val);
            }
        }
    }

    fn kill_keygroup(&mut self, keygroup: u8, now: bool) {
        for voice in self.table.voices.borrow_mut().values_mut() {
            if voice.keygroup() == keygroup {
                if now {
                    voice.kill();
                } else {
                    voice.key_off();
                }
            }
        }
    }
}

struct SequencerEntry<'a> {
    group_id: usize,
    studio_id: u32,
    sequencer: Sequencer<'a, EngineVoiceSink<'a>>,
}

/// A resolved sfx-id: which audio group owns it and its default playback
/// parameters, populated by `add_audio_group` from a project index's
/// sfx-group table.
#[derive(Clone, Copy)]
struct SfxLookupEntry {
    group_id: usize,
    entry: SfxEntry,
}

/// The playback runtime: owns every live audio group, studio, voice, and
/// sequencer, and exposes the operations a host integration drives them
/// through (device/MIDI setup aside, which stays with the `Backend`).
pub struct Engine<'a> {
    groups: HashMap<usize, AudioGroupEntry<'a>>,
    studios: HashMap<u32, Studio>,
    next_studio_id: u32,
    default_studio: u32,
    table: VoiceTable,
    backend: Rc<RefCell<dyn Backend>>,
    sequencers: HashMap<u32, SequencerEntry<'a>>,
    next_seq_id: u32,
    midi_queue: Arc<Mutex<VecDeque<MidiEvent>>>,
    midi_target: Option<u32>,
    amplitude_mode: AmplitudeMode,
    /// Global sfx-id -> (owning group, default params) lookup, rebuilt
    /// incrementally as audio groups are added/removed so `fx_start` and
    /// `add_emitter` can resolve a bare sfx-id without the caller knowing
    /// which group it lives in.
    sfx_lookup: HashMap<u16, SfxLookupEntry>,
}

impl<'a> Engine<'a> {
    pub fn new<B: Backend + 'static>(backend: B) -> Self {
        let backend: Rc<RefCell<dyn Backend>> = Rc::new(RefCell::new(backend));
        let mut engine = Self {
            groups: HashMap::new(),
            studios: HashMap::new(),
            next_studio_id: 0,
            default_studio: 0,
            table: VoiceTable::new(),
            backend,
            sequencers: HashMap::new(),
            next_seq_id: 0,
            midi_queue: Arc::new(Mutex::new(VecDeque::new())),
            midi_target: None,
            amplitude_mode: AmplitudeMode::Normalized,
            sfx_lookup: HashMap::new(),
        };
        let default_studio = engine.add_studio();
        engine.default_studio = default_studio;
        engine
    }

    pub fn set_amplitude_mode(&mut self, mode: AmplitudeMode) {
        self.amplitude_mode = mode;
    }

    pub fn amplitude_mode(&self) -> AmplitudeMode {
        self.amplitude_mode
    }

    pub fn default_studio(&self) -> u32 {
        self.default_studio
    }

    /// Registers an audio group's decoded indices and raw blobs. Returns a
    /// stable identity (the pool blob's address) used to reference it from
    /// `add_emitter`/`seq_play`/`remove_audio_group`.
    pub fn add_audio_group(
        &mut self,
        pool: &'a AudioGroupPool,
        sdir: &'a AudioGroupSampleDirectory,
        proj: &'a ProjectIndex,
        data: AudioGroupData<'a>,
    ) -> usize {
        let identity = data.identity();
        for (_, sfx_group) in proj.sfx_groups() {
            for (sfx_id, entry) in &sfx_group.entries {
                self.sfx_lookup.insert(
                    *sfx_id,
                    SfxLookupEntry {
                        group_id: identity,
                        entry: *entry,
                    },
                );
            }
        }
        self.groups.insert(
            identity,
            AudioGroupEntry {
                pool,
                sdir,
                proj,
                data,
            },
        );
        identity
    }

    /// Tears down every sequencer and voice still bound to `identity` before
    /// dropping the group's indices, mirroring amuse's teardown ordering
    /// (sequencers and voices before the group data they reference).
    pub fn remove_audio_group(&mut self, identity: usize) -> bool {
        let dead_seqs: Vec<u32> = self
            .sequencers
            .iter()
            .filter(|(_, e)| e.group_id == identity)
            .map(|(id, _)| *id)
            .collect();
        for id in dead_seqs {
            if let Some(mut entry) = self.sequencers.remove(&id) {
                entry.sequencer.kill();
            }
        }
        let dead_sfx: Vec<u16> = self
            .sfx_lookup
            .iter()
            .filter(|(_, e)| e.group_id == identity)
            .map(|(id, _)| *id)
            .collect();
        for id in dead_sfx {
            self.sfx_lookup.remove(&id);
        }
        self.groups.remove(&identity).is_some()
    }

    pub fn add_studio(&mut self) -> u32 {
        let id = self.next_studio_id;
        self.next_studio_id += 1;
        let studio = Studio::new(&mut *self.backend.borrow_mut());
        self.studios.insert(id, studio);
        id
    }

    /// Kills every voice and sequencer routed through `studio_id`, then
    /// destroys the studio itself. The default studio can never be removed.
    pub fn remove_studio(&mut self, studio_id: u32) -> bool {
        if studio_id == self.default_studio {
            return false;
        }
        if !self.studios.contains_key(&studio_id) {
            return false;
        }

        for voice in self.table.voices.borrow_mut().values_mut() {
            if voice.studio_id() == studio_id {
                voice.kill();
            }
        }
        for entry in self.sequencers.values_mut() {
            if entry.studio_id == studio_id {
                entry.sequencer.kill();
            }
        }

        let studio = self.studios.remove(&studio_id).expect("checked above");
        studio.teardown(&mut *self.backend.borrow_mut());
        true
    }

    /// Pushes an effect onto `studio_id`'s chain, e.g. starting a reverb or
    /// send-effect instance.
    pub fn push_studio_effect(&mut self, studio_id: u32, effect: Box<dyn Effect>) -> bool {
        match self.studios.get_mut(&studio_id) {
            Some(studio) => {
                studio.push_effect(effect);
                true
            }
            None => false,
        }
    }

    /// Resolves `sfx_id` through the global sfx lookup and spawns its macro
    /// at a fixed 32000 Hz, the shared core of `fx_start` and `add_emitter`.
    fn spawn_sfx_voice(&mut self, sfx_id: u16, vol: u8, pan: i8, studio_id: u32, emitter: bool) -> Option<VoiceId> {
        let lookup = *self.sfx_lookup.get(&sfx_id)?;
        let group = self.groups.get(&lookup.group_id)?;
        let handle = self.backend.borrow_mut().allocate_voice(32000, true);
        let vid = self.table.alloc_vid();
        let voice = Voice::new(
            vid,
            lookup.group_id,
            lookup.entry.obj_id,
            handle,
            group.pool,
            group.data.pool(),
            group.data.format(),
            lookup.entry.def_key,
            lookup.entry.def_vel,
            0,
            pan,
            vol,
            studio_id,
            emitter,
        );
        match voice {
            Some(voice) => {
                self.table.voices.borrow_mut().insert(vid.0, voice);
                Some(vid)
            }
            None => {
                self.backend.borrow_mut().release_voice(handle);
                None
            }
        }
    }

    /// Starts a sound effect by id: looks it up in the global sfx lookup,
    /// allocates a voice at a fixed 32000 Hz, and applies `vol`/`pan`.
    pub fn fx_start(&mut self, sfx_id: u16, vol: u8, pan: i8, studio_id: u32) -> Option<VoiceId> {
        self.spawn_sfx_voice(sfx_id, vol, pan, studio_id, false)
    }

    /// Spawns a one-shot or looping emitter voice for `sfx_id`, bypassing any
    /// sequencer channel routing.
    pub fn add_emitter(&mut self, sfx_id: u16, pan: i8, volume: u8, studio_id: u32) -> Option<VoiceId> {
        self.spawn_sfx_voice(sfx_id, volume, pan, studio_id, true)
    }

    /// Looks up a sample's directory entry within `group_id`, e.g. for a
    /// host wanting its duration or loop points ahead of playback.
    pub fn sample_entry(&self, group_id: usize, sfx_id: u16) -> Option<&(SampleEntry, AdpcmParms)> {
        self.groups.get(&group_id)?.sdir.get(sfx_id)
    }

    /// Attaches a song blob to a freshly created sequencer bound to
    /// `group_id`'s pool, priming its channels from `song_id`'s song-group
    /// setup and routing spawned voices through `studio_id`.
    pub fn seq_play(
        &mut self,
        group_id: usize,
        song_id: u16,
        song: Option<&'a [u8]>,
        studio_id: u32,
    ) -> Option<u32> {
        let group = self.groups.get(&group_id)?;
        let sink = EngineVoiceSink {
            group_id,
            pool: group.pool,
            pool_bytes: group.data.pool(),
            format: group.data.format(),
            studio_id,
            table: self.table.clone(),
            backend: Rc::clone(&self.backend),
        };
        let mut sequencer = Sequencer::new(group.pool, group.data.pool(), group.data.format(), sink);
        if let Some(song_group) = group.proj.song_group(song_id) {
            sequencer.apply_song_group(song_group);
        }
        if let Some(song) = song {
            sequencer.play_song(song);
        }
        let id = self.next_seq_id;
        self.next_seq_id += 1;
        self.sequencers.insert(
            id,
            SequencerEntry {
                group_id,
                studio_id,
                sequencer,
            },
        );
        Some(id)
    }

    /// Whether `vid` names a currently live voice.
    pub fn find_voice(&self, vid: VoiceId) -> bool {
        self.table.voices.borrow().contains_key(&vid.0)
    }

    /// Begins the release phase for an emitter spawned via `add_emitter`.
    pub fn key_off_voice(&mut self, vid: VoiceId) {
        if let Some(v) = self.table.voices.borrow_mut().get_mut(&vid.0) {
            v.key_off();
        }
    }

    /// Immediately silences and reaps an emitter spawned via `add_emitter`.
    pub fn kill_voice(&mut self, vid: VoiceId) {
        if let Some(v) = self.table.voices.borrow_mut().get_mut(&vid.0) {
            v.kill();
        }
    }

    pub fn kill_keygroup(&mut self, keygroup: u8, now: bool) {
        for voice in self.table.voices.borrow_mut().values_mut() {
            if voice.keygroup() == keygroup {
                if now {
                    voice.kill();
                } else {
                    voice.key_off();
                }
            }
        }
    }

    pub fn send_macro_message(&mut self, obj_id: ObjectId, val: i32) {
        for voice in self.table.voices.borrow_mut().values_mut() {
            if voice.macro_id() == obj_id {
                voice.message(val);
            }
        }
    }

    /// Picks which live sequencer raw MIDI input is routed to. A later
    /// `push_midi` with no target set is simply dropped on the next drain.
    pub fn set_midi_target(&mut self, seq_id: Option<u32>) {
        self.midi_target = seq_id;
    }

    /// Enqueues a raw MIDI message onto the engine's single mutex-guarded
    /// input queue, decoding it immediately so the 5ms tick only drains
    /// already-typed events.
    pub fn push_midi(&self, sample_offset: u32, bytes: &[u8]) {
        if let Some(event) = MidiEvent::from_bytes(sample_offset, bytes) {
            self.midi_queue.lock().unwrap().push_back(event);
        }
    }

    fn drain_midi(&mut self) {
        let Some(seq_id) = self.midi_target else {
            self.midi_queue.lock().unwrap().clear();
            return;
        };
        let events: Vec<MidiEvent> = self.midi_queue.lock().unwrap().drain(..).collect();
        let Some(entry) = self.sequencers.get_mut(&seq_id) else {
            return;
        };
        for event in events {
            let chan = if event.channel == 0xFF { 0 } else { event.channel };
            match event.data {
                MidiEventData::NoteOn { note, velocity } => {
                    entry.sequencer.key_on(chan, note, velocity as u8);
                }
                MidiEventData::NoteOff { note, velocity } => {
                    entry.sequencer.key_off(chan, note, velocity as u8);
                }
                MidiEventData::ControlChange { controller, value } => {
                    entry.sequencer.set_ctrl_value(chan, controller, value as u8);
                }
                MidiEventData::ProgramChange { program } => {
                    entry.sequencer.set_chan_program(chan, program as u16);
                }
                MidiEventData::PitchBend { value } => {
                    entry.sequencer.set_pitch_wheel(chan, value as f64 / 8192.0);
                }
                _ => {}
            }
        }
    }

    /// One 5ms scheduler tick: drains pending MIDI, advances every
    /// sequencer and voice by `dt` seconds, then reaps anything finished.
    pub fn pump_engine(&mut self, dt: f64, sample_rate: f64) {
        self.drain_midi();

        for entry in self.sequencers.values_mut() {
            entry.sequencer.advance(dt);
        }

        {
            let mut backend = self.backend.borrow_mut();
            let mut voices = self.table.voices.borrow_mut();
            let fallback: &[u8] = &[];
            for voice in voices.values_mut() {
                let pool_bytes = self
                    .groups
                    .get(&voice.group_id())
                    .map(|g| g.data.pool())
                    .unwrap_or(fallback);
                voice.advance(dt, sample_rate, pool_bytes, &mut *backend);

                let group_id = voice.group_id();
                let Some(group) = self.groups.get(&group_id) else {
                    continue;
                };
                let table = &self.table;
                let parent_note = voice.last_note();
                let parent_vel = voice.last_vel();
                let parent_pan = (voice.pan() * 127.0) as i8;
                let parent_volume = (voice.volume() * 127.0) as u8;
                let parent_studio_id = voice.studio_id();
                voice.resolve_spawns(&mut |req| {
                    let note = (parent_note as i16 + req.add_note as i16).clamp(0, 127) as u8;
                    let sample_rate = backend.get_available_set().sample_rate;
                    let handle = backend.allocate_voice(sample_rate, true);
                    let vid = table.alloc_vid();
                    Voice::new_sibling(
                        vid,
                        group_id,
                        ObjectId(req.macro_id),
                        handle,
                        group.pool,
                        group.data.pool(),
                        group.data.format(),
                        note,
                        parent_vel,
                        parent_pan,
                        parent_volume,
                        parent_studio_id,
                        req.macro_step,
                    )
                });
            }
        }

        self.bring_out_your_dead();
    }

    /// Reaps finished voices and dead sequencers, in that order (sequencers
    /// can still reference voices while advancing; voices never reference
    /// sequencers).
    fn bring_out_your_dead(&mut self) {
        let dead_vids: Vec<u32> = self
            .table
            .voices
            .borrow()
            .iter()
            .filter(|(_, v)| v.is_recursively_dead())
            .map(|(id, _)| *id)
            .collect();
        for vid in dead_vids {
            if let Some(voice) = self.table.voices.borrow_mut().remove(&vid) {
                let mut handles = Vec::new();
                voice.collect_backend_voices(&mut handles);
                let mut backend = self.backend.borrow_mut();
                for handle in handles {
                    backend.release_voice(handle);
                }
            }
        }

        let dead_seqs: Vec<u32> = self
            .sequencers
            .iter()
            .filter(|(_, e)| e.sequencer.state() == vox_sequencer::SequencerState::Dead)
            .map(|(id, _)| *id)
            .collect();
        for id in dead_seqs {
            self.sequencers.remove(&id);
        }
    }

    pub fn backend(&self) -> Rc<RefCell<dyn Backend>> {
        Rc::clone(&self.backend)
    }
}

fn _assert_voice_handle_is_copy(_: VoiceHandle) {}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_audio::{AudioConfig, CpalBackend};
    use vox_format::AudioGroupPool;

    fn build_proj_with_sfx(sfx_id: u16, obj_id: u16, def_key: u8, def_vel: u8, pan: i8) -> Vec<u8> {
        let mut proj = vec![0u8; 8];
        let sfx_off = proj.len() as u32;
        let mut rec = Vec::new();
        rec.extend_from_slice(&0u32.to_be_bytes());
        rec.extend_from_slice(&1u16.to_be_bytes()); // sfx group id
        rec.extend_from_slice(&[0, 0]);
        rec.extend_from_slice(&1i32.to_be_bytes()); // entry count
        rec.extend_from_slice(&sfx_id.to_be_bytes());
        rec.extend_from_slice(&obj_id.to_be_bytes());
        rec.push(def_key);
        rec.push(def_vel);
        rec.push(pan as u8);
        rec.push(0);
        let size = rec.len() as u32;
        rec[0..4].copy_from_slice(&size.to_be_bytes());
        proj.extend_from_slice(&rec);
        proj.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        proj[4..8].copy_from_slice(&sfx_off.to_be_bytes());
        proj
    }

    fn build_proj_with_song_group(song_id: u16, chan0_program: u16) -> Vec<u8> {
        let mut proj = vec![0u8; 8];
        let song_off = proj.len() as u32;
        let mut rec = Vec::new();
        rec.extend_from_slice(&0u32.to_be_bytes());
        rec.extend_from_slice(&song_id.to_be_bytes());
        rec.extend_from_slice(&[0, 0]);
        for chan in 0..16u16 {
            if chan == 0 {
                rec.extend_from_slice(&chan0_program.to_be_bytes());
            } else {
                rec.extend_from_slice(&0xFFFFu16.to_be_bytes());
            }
        }
        rec.extend_from_slice(&0u16.to_be_bytes()); // drum count
        rec.extend_from_slice(&[0, 0]);
        let size = rec.len() as u32;
        rec[0..4].copy_from_slice(&size.to_be_bytes());
        proj.extend_from_slice(&rec);
        proj.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        proj[0..4].copy_from_slice(&song_off.to_be_bytes());
        proj
    }

    fn build_pool_with_macro(code: &[u8]) -> (Vec<u8>, AudioGroupPool) {
        let mut pool = vec![0u8; 16];
        let macros_off = pool.len() as u32;
        let mut rec = Vec::new();
        rec.extend_from_slice(&0u32.to_be_bytes());
        rec.extend_from_slice(&1u16.to_be_bytes());
        rec.extend_from_slice(&[0, 0]);
        rec.extend_from_slice(code);
        let size = rec.len() as u32;
        rec[0..4].copy_from_slice(&size.to_be_bytes());
        pool.extend_from_slice(&rec);
        pool.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        pool[0..4].copy_from_slice(&macros_off.to_be_bytes());
        let index = AudioGroupPool::new(&pool, DataFormat::Gcn);
        (pool, index)
    }

    #[test]
    fn add_emitter_spawns_a_live_voice() {
        let (pool_bytes, pool) = build_pool_with_macro(&[0]); // OP_STOP
        let sdir = AudioGroupSampleDirectory::new(&[], DataFormat::Gcn);
        let proj_bytes = build_proj_with_sfx(1, 1, 60, 100, 0);
        let proj = ProjectIndex::new(&proj_bytes, DataFormat::Gcn);
        let data = AudioGroupData::new(&[], &pool_bytes, &[], &[], DataFormat::Gcn, 0);

        let mut engine = Engine::new(CpalBackend::new(AudioConfig::default()));
        engine.add_audio_group(&pool, &sdir, &proj, data);
        let studio = engine.default_studio();

        let vid = engine.add_emitter(1, 0, 127, studio).unwrap();
        assert!(engine.find_voice(vid));
    }

    #[test]
    fn missing_sound_macro_spawns_nothing() {
        let (pool_bytes, pool) = build_pool_with_macro(&[0]);
        let sdir = AudioGroupSampleDirectory::new(&[], DataFormat::Gcn);
        // sfx id 1 resolves, but its obj id (99) has no macro in the pool.
        let proj_bytes = build_proj_with_sfx(1, 99, 60, 100, 0);
        let proj = ProjectIndex::new(&proj_bytes, DataFormat::Gcn);
        let data = AudioGroupData::new(&[], &pool_bytes, &[], &[], DataFormat::Gcn, 0);

        let mut engine = Engine::new(CpalBackend::new(AudioConfig::default()));
        engine.add_audio_group(&pool, &sdir, &proj, data);
        let studio = engine.default_studio();

        assert!(engine.add_emitter(1, 0, 127, studio).is_none());
    }

    #[test]
    fn unresolved_sfx_id_spawns_nothing() {
        let (pool_bytes, pool) = build_pool_with_macro(&[0]);
        let sdir = AudioGroupSampleDirectory::new(&[], DataFormat::Gcn);
        let proj = ProjectIndex::new(&[], DataFormat::Gcn);
        let data = AudioGroupData::new(&[], &pool_bytes, &[], &[], DataFormat::Gcn, 0);

        let mut engine = Engine::new(CpalBackend::new(AudioConfig::default()));
        engine.add_audio_group(&pool, &sdir, &proj, data);
        let studio = engine.default_studio();

        assert!(engine.add_emitter(1, 0, 127, studio).is_none());
        assert!(engine.fx_start(1, 127, 0, studio).is_none());
    }

    #[test]
    fn pump_engine_reaps_finished_voices() {
        let (pool_bytes, pool) = build_pool_with_macro(&[0]); // immediately stops
        let sdir = AudioGroupSampleDirectory::new(&[], DataFormat::Gcn);
        let proj_bytes = build_proj_with_sfx(1, 1, 60, 100, 0);
        let proj = ProjectIndex::new(&proj_bytes, DataFormat::Gcn);
        let data = AudioGroupData::new(&[], &pool_bytes, &[], &[], DataFormat::Gcn, 0);

        let mut engine = Engine::new(CpalBackend::new(AudioConfig::default()));
        engine.add_audio_group(&pool, &sdir, &proj, data);
        let studio = engine.default_studio();
        let vid = engine.add_emitter(1, 0, 127, studio).unwrap();

        // Sustain holds indefinitely until key-off starts the release ramp;
        // advancing past the default release window then reaps the voice.
        engine.key_off_voice(vid);
        for _ in 0..200 {
            engine.pump_engine(0.005, 48000.0);
        }
        assert!(!engine.find_voice(vid));
    }

    fn build_pool_with_two_macros(first: &[u8], second: &[u8]) -> (Vec<u8>, AudioGroupPool) {
        let mut pool = vec![0u8; 16];
        let macros_off = pool.len() as u32;
        for (id, code) in [(1u16, first), (2u16, second)] {
            let mut rec = Vec::new();
            rec.extend_from_slice(&0u32.to_be_bytes());
            rec.extend_from_slice(&id.to_be_bytes());
            rec.extend_from_slice(&[0, 0]);
            rec.extend_from_slice(code);
            let size = rec.len() as u32;
            rec[0..4].copy_from_slice(&size.to_be_bytes());
            pool.extend_from_slice(&rec);
        }
        pool.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        pool[0..4].copy_from_slice(&macros_off.to_be_bytes());
        let index = AudioGroupPool::new(&pool, DataFormat::Gcn);
        (pool, index)
    }

    #[test]
    fn play_macro_spawns_a_sibling_during_pump_engine() {
        // PLAY_MACRO(add_note=0, macro_id=2, macro_step=0), STOP
        let mut code = vec![15, 0];
        code.extend_from_slice(&2u16.to_be_bytes());
        code.extend_from_slice(&0u16.to_be_bytes());
        code.push(0);
        let (pool_bytes, pool) = build_pool_with_two_macros(&code, &[0]);
        let sdir = AudioGroupSampleDirectory::new(&[], DataFormat::Gcn);
        let proj_bytes = build_proj_with_sfx(1, 1, 60, 100, 0);
        let proj = ProjectIndex::new(&proj_bytes, DataFormat::Gcn);
        let data = AudioGroupData::new(&[], &pool_bytes, &[], &[], DataFormat::Gcn, 0);

        let mut engine = Engine::new(CpalBackend::new(AudioConfig::default()));
        engine.add_audio_group(&pool, &sdir, &proj, data);
        let studio = engine.default_studio();
        let vid = engine.add_emitter(1, 0, 127, studio).unwrap();

        // The PLAYMACRO op fires on construction, so the very first tick
        // already resolves the sibling; the parent stays live throughout.
        engine.pump_engine(0.005, 48000.0);
        assert!(engine.find_voice(vid));
    }

    #[test]
    fn removing_default_studio_is_rejected() {
        let mut engine = Engine::new(CpalBackend::new(AudioConfig::default()));
        assert!(!engine.remove_studio(engine.default_studio()));
    }

    #[test]
    fn removing_studio_kills_its_voices() {
        let (pool_bytes, pool) = build_pool_with_macro(&[0]); // sustains until key-off
        let sdir = AudioGroupSampleDirectory::new(&[], DataFormat::Gcn);
        let proj_bytes = build_proj_with_sfx(1, 1, 60, 100, 0);
        let proj = ProjectIndex::new(&proj_bytes, DataFormat::Gcn);
        let data = AudioGroupData::new(&[], &pool_bytes, &[], &[], DataFormat::Gcn, 0);

        let mut engine = Engine::new(CpalBackend::new(AudioConfig::default()));
        engine.add_audio_group(&pool, &sdir, &proj, data);
        let studio = engine.add_studio();
        let vid = engine.add_emitter(1, 0, 127, studio).unwrap();

        assert!(engine.remove_studio(studio));
        for _ in 0..200 {
            engine.pump_engine(0.005, 48000.0);
        }
        assert!(!engine.find_voice(vid));
    }

    #[test]
    fn seq_play_primes_channel_program_from_song_group() {
        let (pool_bytes, pool) = build_pool_with_macro(&[0]);
        let sdir = AudioGroupSampleDirectory::new(&[], DataFormat::Gcn);
        let proj_bytes = build_proj_with_song_group(7, 1);
        let proj = ProjectIndex::new(&proj_bytes, DataFormat::Gcn);
        let data = AudioGroupData::new(&[], &pool_bytes, &[], &[], DataFormat::Gcn, 0);

        let mut engine = Engine::new(CpalBackend::new(AudioConfig::default()));
        let group_id = engine.add_audio_group(&pool, &sdir, &proj, data);
        let studio = engine.default_studio();

        let seq_id = engine.seq_play(group_id, 7, None, studio).unwrap();
        engine.set_midi_target(Some(seq_id));
        engine.push_midi(0, &[0x90, 60, 100]); // note-on, channel 0
        engine.pump_engine(0.005, 48000.0);

        // The song group primed channel 0's program to macro 1 before any
        // MIDI arrived, so the note-on above resolves to a live voice.
        let live = engine.table.voices.borrow().len();
        assert_eq!(live, 1);
    }

    #[test]
    fn amplitude_mode_round_trips() {
        let mut engine = Engine::new(CpalBackend::new(AudioConfig::default()));
        assert_eq!(engine.amplitude_mode(), AmplitudeMode::Normalized);
        engine.set_amplitude_mode(AmplitudeMode::Decibels);
        assert_eq!(engine.amplitude_mode(), AmplitudeMode::Decibels);
    }

    #[test]
    fn missing_group_sample_entry_is_none() {
        let (pool_bytes, pool) = build_pool_with_macro(&[0]);
        let sdir = AudioGroupSampleDirectory::new(&[], DataFormat::Gcn);
        let proj = ProjectIndex::new(&[], DataFormat::Gcn);
        let data = AudioGroupData::new(&[], &pool_bytes, &[], &[], DataFormat::Gcn, 0);

        let mut engine = Engine::new(CpalBackend::new(AudioConfig::default()));
        let group_id = engine.add_audio_group(&pool, &sdir, &proj, data);
        assert!(engine.sample_entry(group_id, 1).is_none());
    }
}
