//! A single sounding instance of a sound macro: interpreter state, envelope,
//! pitch/modulation, and the backend voice primitive it drives.

use vox_audio::{Backend, VoiceHandle};
use vox_dsp::Envelope;
use vox_format::{AudioGroupPool, DataFormat, ObjectId};

use crate::macro_interp::{decode_op, MacroOp};

/// Lifecycle state, mirroring the envelope's own phase but visible to the
/// engine's reap pass independent of envelope internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Playing,
    KeyOff,
    Finished,
}

/// Dense, dedicated index into the engine's voice arena. Stable across reaps
/// within a single live voice's lifetime; reused only after that voice is
/// destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u32);

struct MacroState {
    code_offset: usize,
    code_len: usize,
    pc: usize,
    wait_ticks: u32,
    halted: bool,
    ctrl_values: [i8; 128],
}

/// A `PLAYMACRO` request queued by the interpreter, to be resolved by
/// whoever owns the pool/backend context (the voice itself only has the
/// byte slice it was given for this tick).
#[derive(Debug, Clone, Copy)]
pub struct PlayMacroRequest {
    pub add_note: i8,
    pub macro_id: u16,
    pub macro_step: u16,
}

/// One active voice: a sound-macro interpreter plus an envelope and the
/// backend handle that actually renders samples.
pub struct Voice {
    vid: VoiceId,
    group_id: usize,
    macro_id: ObjectId,
    state: VoiceState,
    studio_id: u32,
    emitter: bool,
    keygroup: u8,
    last_note: u8,
    last_vel: u8,
    volume: f64,
    pan: f64,
    surround_pan: f64,
    reverb_vol: f64,
    pitch_cents: i32,
    pitch_wheel_up: i8,
    pitch_wheel_down: i8,
    modulation: f64,
    envelope: Envelope,
    backend_voice: VoiceHandle,
    macro_state: MacroState,
    /// Siblings created by `PLAYMACRO`, owned by the voice that spawned them.
    siblings: Vec<Voice>,
    /// `PLAYMACRO` requests queued this tick, awaiting resolution via
    /// `resolve_spawns`.
    pending_spawns: Vec<PlayMacroRequest>,
}

impl Voice {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vid: VoiceId,
        group_id: usize,
        macro_id: ObjectId,
        backend_voice: VoiceHandle,
        pool: &AudioGroupPool,
        pool_bytes: &[u8],
        format: DataFormat,
        note: u8,
        vel: u8,
        transpose: i8,
        pan: i8,
        volume: u8,
        studio_id: u32,
        emitter: bool,
    ) -> Option<Self> {
        Self::construct(
            vid, group_id, macro_id, backend_voice, pool, pool_bytes, format, note, vel,
            transpose, pan, volume, studio_id, emitter, 0,
        )
    }

    /// Constructs a sibling voice spawned by a `PLAYMACRO` op, starting
    /// execution at `start_pc` within its own macro rather than at 0.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_sibling(
        vid: VoiceId,
        group_id: usize,
        macro_id: ObjectId,
        backend_voice: VoiceHandle,
        pool: &AudioGroupPool,
        pool_bytes: &[u8],
        format: DataFormat,
        note: u8,
        vel: u8,
        pan: i8,
        volume: u8,
        studio_id: u32,
        start_pc: u16,
    ) -> Option<Self> {
        Self::construct(
            vid, group_id, macro_id, backend_voice, pool, pool_bytes, format, note, vel, 0, pan,
            volume, studio_id, false, start_pc as usize,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn construct(
        vid: VoiceId,
        group_id: usize,
        macro_id: ObjectId,
        backend_voice: VoiceHandle,
        pool: &AudioGroupPool,
        pool_bytes: &[u8],
        format: DataFormat,
        note: u8,
        vel: u8,
        transpose: i8,
        pan: i8,
        volume: u8,
        studio_id: u32,
        emitter: bool,
        start_pc: usize,
    ) -> Option<Self> {
        let slice = pool.sound_macro(macro_id)?;

        let mut envelope = Envelope::new();
        if let Some(dls) = pool.table_as_adsr_dls(pool_bytes, macro_id, format) {
            envelope.reset_dls(&dls, note, vel);
        } else if let Some(adsr) = pool.table_as_adsr(pool_bytes, macro_id, format) {
            envelope.reset(&adsr);
        } else {
            envelope.reset(&vox_dsp::Adsr {
                attack_time: 0.0,
                decay_time: 0.0,
                sustain_factor: 1.0,
                release_time: 0.05,
            });
        }

        let mut voice = Self {
            vid,
            group_id,
            macro_id,
            state: VoiceState::Playing,
            studio_id,
            emitter,
            keygroup: 0,
            last_note: (note as i16 + transpose as i16).clamp(0, 127) as u8,
            last_vel: vel,
            volume: volume as f64 / 127.0,
            pan: pan as f64 / 127.0,
            surround_pan: 0.0,
            reverb_vol: 0.0,
            pitch_cents: 0,
            pitch_wheel_up: 2,
            pitch_wheel_down: 2,
            modulation: 0.0,
            envelope,
            backend_voice,
            macro_state: MacroState {
                code_offset: slice.offset,
                code_len: slice.len,
                pc: start_pc,
                wait_ticks: 0,
                halted: false,
                ctrl_values: [0; 128],
            },
            siblings: Vec::new(),
            pending_spawns: Vec::new(),
        };
        voice.run_macro(pool_bytes);
        Some(voice)
    }

    pub fn vid(&self) -> VoiceId {
        self.vid
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn is_emitter(&self) -> bool {
        self.emitter
    }

    pub fn keygroup(&self) -> u8 {
        self.keygroup
    }

    pub fn last_note(&self) -> u8 {
        self.last_note
    }

    pub fn last_vel(&self) -> u8 {
        self.last_vel
    }

    pub fn pan(&self) -> f64 {
        self.pan
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn macro_id(&self) -> ObjectId {
        self.macro_id
    }

    pub fn group_id(&self) -> usize {
        self.group_id
    }

    /// The studio this voice renders into. Weak by convention: a removed
    /// studio id simply stops resolving to anything, which `Engine` treats
    /// the same way amuse treats an expired `weak_ptr<Studio>`.
    pub fn studio_id(&self) -> u32 {
        self.studio_id
    }

    pub fn reverb_vol(&self) -> f64 {
        self.reverb_vol
    }

    pub fn surround_pan(&self) -> f64 {
        self.surround_pan
    }

    /// Whether this voice (and every sibling in its chain) has finished.
    pub fn is_recursively_dead(&self) -> bool {
        self.state == VoiceState::Finished && self.siblings.iter().all(|s| s.is_recursively_dead())
    }

    /// Collects this voice's own backend handle plus every sibling's,
    /// so a caller can release them all before dropping the chain.
    pub fn collect_backend_voices(&self, out: &mut Vec<VoiceHandle>) {
        out.push(self.backend_voice);
        for sibling in &self.siblings {
            sibling.collect_backend_voices(out);
        }
    }

    pub fn key_off(&mut self) {
        if self.state == VoiceState::Playing {
            self.state = VoiceState::KeyOff;
            self.envelope.key_off();
        }
        for sibling in &mut self.siblings {
            sibling.key_off();
        }
    }

    /// Immediate silence, bypassing the release envelope.
    pub fn kill(&mut self) {
        self.state = VoiceState::Finished;
        for sibling in &mut self.siblings {
            sibling.kill();
        }
    }

    pub fn message(&mut self, val: i32) {
        self.macro_state.ctrl_values[0] = (val & 0x7f) as i8;
        for sibling in &mut self.siblings {
            sibling.message(val);
        }
    }

    /// Steps the macro interpreter and envelope forward by one engine tick
    /// (5ms). Transitions to `Finished` when the macro halts and the
    /// envelope completes.
    pub fn advance(&mut self, dt: f64, sample_rate: f64, pool_bytes: &[u8], backend: &mut dyn Backend) {
        if self.macro_state.wait_ticks > 0 {
            let elapsed_ticks = (dt * 1000.0 / 5.0).round().max(1.0) as u32;
            self.macro_state.wait_ticks = self.macro_state.wait_ticks.saturating_sub(elapsed_ticks);
        }
        if self.macro_state.wait_ticks == 0 && !self.macro_state.halted {
            self.run_macro(pool_bytes);
        }

        let frames = (dt * sample_rate).round().max(1.0) as u32;
        for _ in 0..frames {
            let gain = self.envelope.next_sample(sample_rate);
            if self.envelope.is_complete() && self.state != VoiceState::Finished {
                self.state = VoiceState::Finished;
            }
            let _ = gain;
        }

        if let Some(backend_voice) = backend.voice_mut(self.backend_voice) {
            let left = (self.volume * (1.0 - self.pan.max(0.0))).clamp(0.0, 1.0);
            let right = (self.volume * (1.0 + self.pan.min(0.0))).clamp(0.0, 1.0);
            backend_voice.set_channel_levels([left, right], 5.0);
            // Mod wheel bends pitch up to a semitone, layered on top of
            // whatever the macro/pitch-wheel already set.
            let total_cents = self.pitch_cents as f64 + self.modulation * 100.0;
            let ratio = 2f64.powf(total_cents / 1200.0);
            backend_voice.set_pitch_ratio(ratio, 5.0);
        }

        for sibling in &mut self.siblings {
            sibling.advance(dt, sample_rate, pool_bytes, backend);
        }
    }

    /// Runs the interpreter to completion for this scheduling slice: executes
    /// instructions until a `Wait`, `Stop`, or decode failure.
    fn run_macro(&mut self, pool_bytes: &[u8]) {
        let code = &pool_bytes[self.macro_state.code_offset
            ..self.macro_state.code_offset + self.macro_state.code_len];
        loop {
            let Some((op, next_pc)) = decode_op(code, self.macro_state.pc) else {
                self.macro_state.halted = true;
                break;
            };
            self.macro_state.pc = next_pc;
            match op {
                MacroOp::Stop => {
                    self.macro_state.halted = true;
                    break;
                }
                MacroOp::StartSample { .. } | MacroOp::StopSample => {
                    // Sample start/stop is mediated by the backend voice's
                    // own pull (`supplyAudio`); the interpreter only tracks
                    // macro-level state here.
                }
                MacroOp::SetVolume { vol } => self.volume = vol as f64 / 127.0,
                MacroOp::ScaleVolume { percent } => self.volume *= percent as f64 / 127.0,
                MacroOp::SetPan { pan } => self.pan = pan as f64 / 127.0,
                MacroOp::SetSurroundPan { span } => self.surround_pan = span as f64 / 127.0,
                MacroOp::SetReverbVol { rvol } => self.reverb_vol = rvol as f64 / 127.0,
                MacroOp::SetPitchKey { cents } => self.pitch_cents = cents,
                MacroOp::SetPitchFrequency { .. } => {
                    // Frequency-domain pitch set is a backend-voice concern;
                    // tracked pitch stays in cents for mixing purposes.
                }
                MacroOp::SetPitchAdsr { cents, .. } => self.pitch_cents = cents,
                MacroOp::SetPitchWheelRange { up, down } => {
                    self.pitch_wheel_up = up;
                    self.pitch_wheel_down = down;
                }
                MacroOp::SetAdsr { .. } => {
                    // Re-binding the envelope mid-flight is out of scope;
                    // the envelope set at voice creation stays in effect.
                }
                MacroOp::SetKeygroup { kg } => self.keygroup = kg,
                MacroOp::MessageSelf { val } => self.message(val),
                MacroOp::PlayMacro {
                    add_note,
                    macro_id,
                    macro_step,
                } => self.pending_spawns.push(PlayMacroRequest {
                    add_note,
                    macro_id,
                    macro_step,
                }),
                MacroOp::Wait { ticks } => {
                    self.macro_state.wait_ticks = ticks as u32;
                    break;
                }
                MacroOp::BranchIfCtrl {
                    ctrl,
                    cmp_val,
                    target_pc,
                } => {
                    if self.macro_state.ctrl_values[ctrl as usize] == cmp_val as i8 {
                        self.macro_state.pc = target_pc as usize;
                    }
                }
                MacroOp::SetCtrlValue { ctrl, val } => {
                    self.macro_state.ctrl_values[ctrl as usize] = val;
                }
            }
        }
    }

    pub fn set_ctrl_value(&mut self, ctrl: u8, val: i8) {
        self.macro_state.ctrl_values[ctrl as usize] = val;
    }

    pub fn ctrl_value(&self, ctrl: u8) -> i8 {
        self.macro_state.ctrl_values[ctrl as usize]
    }

    pub fn set_modulation(&mut self, mod_value: f64) {
        self.modulation = mod_value.clamp(0.0, 1.0);
    }

    pub fn set_pitch_wheel(&mut self, norm: f64) {
        let semis = if norm >= 0.0 {
            norm * self.pitch_wheel_up as f64
        } else {
            norm * self.pitch_wheel_down as f64
        };
        self.pitch_cents = (semis * 100.0) as i32;
    }

    /// Finds `vid` within this voice's own sibling chain.
    pub fn find_voice(&self, vid: VoiceId) -> bool {
        self.vid == vid || self.siblings.iter().any(|s| s.find_voice(vid))
    }

    /// Resolves any `PLAYMACRO` requests queued this tick across this voice's
    /// whole sibling chain. `spawn_fn` knows how to allocate a backend voice
    /// and resolve `macro_id` within the owning group, which `Voice` itself
    /// has no access to.
    pub fn resolve_spawns(&mut self, spawn_fn: &mut dyn FnMut(&PlayMacroRequest) -> Option<Voice>) {
        for req in self.pending_spawns.drain(..) {
            if let Some(sibling) = spawn_fn(&req) {
                self.siblings.push(sibling);
            }
        }
        for sibling in &mut self.siblings {
            sibling.resolve_spawns(spawn_fn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_audio::{AudioConfig, Backend, CpalBackend};

    fn pool_with_macro(code: &[u8]) -> (Vec<u8>, AudioGroupPool) {
        let mut pool_bytes = vec![0u8; 16];
        let macros_off = pool_bytes.len() as u32;
        let mut rec = Vec::new();
        rec.extend_from_slice(&0u32.to_be_bytes());
        rec.extend_from_slice(&1u16.to_be_bytes());
        rec.extend_from_slice(&[0, 0]);
        rec.extend_from_slice(code);
        let size = rec.len() as u32;
        rec[0..4].copy_from_slice(&size.to_be_bytes());
        pool_bytes.extend_from_slice(&rec);
        pool_bytes.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        pool_bytes[0..4].copy_from_slice(&macros_off.to_be_bytes());
        let pool = AudioGroupPool::new(&pool_bytes, DataFormat::Gcn);
        (pool_bytes, pool)
    }

    #[test]
    fn missing_sound_macro_fails_construction() {
        let (pool_bytes, pool) = pool_with_macro(&[0]);
        let mut backend = CpalBackend::new(AudioConfig::default());
        let handle = backend.allocate_voice(48000, true);
        assert!(Voice::new(
            VoiceId(1),
            0,
            ObjectId(99),
            handle,
            &pool,
            &pool_bytes,
            DataFormat::Gcn,
            60,
            100,
            0,
            0,
            127,
            0,
            false,
        )
        .is_none());
    }

    #[test]
    fn macro_runs_set_volume_then_stops() {
        // SET_VOLUME(64), STOP
        let (pool_bytes, pool) = pool_with_macro(&[3, 64, 0]);
        let mut backend = CpalBackend::new(AudioConfig::default());
        let handle = backend.allocate_voice(48000, true);
        let voice = Voice::new(
            VoiceId(1),
            0,
            ObjectId(1),
            handle,
            &pool,
            &pool_bytes,
            DataFormat::Gcn,
            60,
            100,
            0,
            0,
            127,
            0,
            false,
        )
        .unwrap();
        assert_eq!(voice.volume, 64.0 / 127.0);
        assert_eq!(voice.state(), VoiceState::Playing);
    }

    #[test]
    fn key_off_then_kill_marks_finished() {
        let (pool_bytes, pool) = pool_with_macro(&[0]);
        let mut backend = CpalBackend::new(AudioConfig::default());
        let handle = backend.allocate_voice(48000, true);
        let mut voice = Voice::new(
            VoiceId(1),
            0,
            ObjectId(1),
            handle,
            &pool,
            &pool_bytes,
            DataFormat::Gcn,
            60,
            100,
            0,
            0,
            127,
            0,
            false,
        )
        .unwrap();
        voice.key_off();
        assert_eq!(voice.state(), VoiceState::KeyOff);
        voice.kill();
        assert_eq!(voice.state(), VoiceState::Finished);
        assert!(voice.is_recursively_dead());
    }

    #[test]
    fn reverb_and_surround_pan_are_tracked_from_macro_ops() {
        // SET_REVERB_VOL(32), SET_SURROUND_PAN(-10), STOP
        let (pool_bytes, pool) = pool_with_macro(&[7, 32, 6, (-10i8) as u8, 0]);
        let mut backend = CpalBackend::new(AudioConfig::default());
        let handle = backend.allocate_voice(48000, true);
        let voice = Voice::new(
            VoiceId(1),
            0,
            ObjectId(1),
            handle,
            &pool,
            &pool_bytes,
            DataFormat::Gcn,
            60,
            100,
            0,
            0,
            127,
            0,
            false,
        )
        .unwrap();
        assert_eq!(voice.reverb_vol(), 32.0 / 127.0);
        assert_eq!(voice.surround_pan(), -10.0 / 127.0);
    }

    fn pool_with_two_macros(first: &[u8], second: &[u8]) -> (Vec<u8>, AudioGroupPool) {
        let mut pool_bytes = vec![0u8; 16];
        let macros_off = pool_bytes.len() as u32;
        for (id, code) in [(1u16, first), (2u16, second)] {
            let mut rec = Vec::new();
            rec.extend_from_slice(&0u32.to_be_bytes());
            rec.extend_from_slice(&id.to_be_bytes());
            rec.extend_from_slice(&[0, 0]);
            rec.extend_from_slice(code);
            let size = rec.len() as u32;
            rec[0..4].copy_from_slice(&size.to_be_bytes());
            pool_bytes.extend_from_slice(&rec);
        }
        pool_bytes.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        pool_bytes[0..4].copy_from_slice(&macros_off.to_be_bytes());
        let pool = AudioGroupPool::new(&pool_bytes, DataFormat::Gcn);
        (pool_bytes, pool)
    }

    #[test]
    fn play_macro_op_queues_a_resolvable_spawn() {
        // PLAY_MACRO(add_note=3, macro_id=2, macro_step=0), STOP
        let mut code = vec![15, 3];
        code.extend_from_slice(&2u16.to_be_bytes());
        code.extend_from_slice(&0u16.to_be_bytes());
        code.push(0);
        let (pool_bytes, pool) = pool_with_two_macros(&code, &[0]);
        let mut backend = CpalBackend::new(AudioConfig::default());
        let handle = backend.allocate_voice(48000, true);
        let mut voice = Voice::new(
            VoiceId(1),
            0,
            ObjectId(1),
            handle,
            &pool,
            &pool_bytes,
            DataFormat::Gcn,
            60,
            100,
            0,
            0,
            127,
            0,
            false,
        )
        .unwrap();

        let mut spawned = 0;
        voice.resolve_spawns(&mut |req| {
            assert_eq!(req.add_note, 3);
            assert_eq!(req.macro_id, 2);
            spawned += 1;
            let handle = backend.allocate_voice(48000, true);
            Voice::new_sibling(
                VoiceId(2),
                0,
                ObjectId(req.macro_id),
                handle,
                &pool,
                &pool_bytes,
                DataFormat::Gcn,
                (60 + req.add_note) as u8,
                100,
                0,
                127,
                0,
                req.macro_step,
            )
        });
        assert_eq!(spawned, 1);
        assert!(voice.find_voice(VoiceId(2)));
    }
}
