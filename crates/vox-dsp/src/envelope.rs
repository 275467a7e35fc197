//! ADSR envelope state machine sampled once per voice frame.

use serde::{Deserialize, Serialize};

/// A flat ADSR envelope table, shared by every note using the same sound macro.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adsr {
    pub attack_time: f64,
    pub decay_time: f64,
    pub sustain_factor: f64,
    pub release_time: f64,
}

/// DLS-style envelope parameterised per note and velocity, as stored in the
/// pool's ADSR table when a sound macro opts into per-note curves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdsrDls {
    pub attack_time: f64,
    pub decay_time: f64,
    pub sustain_factor: f64,
    pub release_time: f64,
    /// Scales attack/decay/release times per MIDI note (higher notes decay faster).
    pub vel_to_time: f64,
    pub note_to_time: f64,
}

impl AdsrDls {
    fn resolve(&self, note: u8, velocity: u8) -> Adsr {
        let vel_scale = 1.0 - (velocity as f64 / 127.0) * self.vel_to_time;
        let note_scale = 1.0 - (note as f64 / 127.0) * self.note_to_time;
        let scale = (vel_scale * note_scale).max(0.01);
        Adsr {
            attack_time: self.attack_time * scale,
            decay_time: self.decay_time * scale,
            sustain_factor: self.sustain_factor,
            release_time: self.release_time * scale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopePhase {
    Attack,
    Decay,
    Sustain,
    Release,
    Complete,
}

/// Per-voice envelope follower driven by `nextSample`.
#[derive(Debug, Clone, Copy)]
pub struct Envelope {
    phase: EnvelopePhase,
    attack_time: f64,
    decay_time: f64,
    sustain_factor: f64,
    release_time: f64,
    release_start_factor: f64,
    level: f64,
    cur_time: f64,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            phase: EnvelopePhase::Complete,
            attack_time: 0.0,
            decay_time: 0.0,
            sustain_factor: 0.0,
            release_time: 0.0,
            release_start_factor: 0.0,
            level: 0.0,
            cur_time: 0.0,
        }
    }
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset from a flat ADSR table.
    pub fn reset(&mut self, adsr: &Adsr) {
        self.attack_time = adsr.attack_time.max(0.0);
        self.decay_time = adsr.decay_time.max(0.0);
        self.sustain_factor = adsr.sustain_factor.clamp(0.0, 1.0);
        self.release_time = adsr.release_time.max(0.0);
        self.release_start_factor = 0.0;
        self.level = 0.0;
        self.cur_time = 0.0;
        self.phase = EnvelopePhase::Attack;
    }

    /// Reset from a DLS ADSR table, resolving per-note/velocity scaling first.
    pub fn reset_dls(&mut self, adsr: &AdsrDls, note: u8, velocity: u8) {
        self.reset(&adsr.resolve(note, velocity));
    }

    /// Capture the current level and begin the release ramp, regardless of phase.
    pub fn key_off(&mut self) {
        if self.phase == EnvelopePhase::Complete {
            return;
        }
        self.release_start_factor = self.level;
        self.cur_time = 0.0;
        self.phase = EnvelopePhase::Release;
    }

    pub fn is_complete(&self) -> bool {
        self.phase == EnvelopePhase::Complete
    }

    pub fn phase(&self) -> EnvelopePhase {
        self.phase
    }

    /// Advance by one sample and return the current linear gain in [0, 1].
    pub fn next_sample(&mut self, sample_rate: f64) -> f64 {
        if sample_rate <= 0.0 {
            return self.level;
        }
        let dt = 1.0 / sample_rate;

        // Zero-duration stages fall through within the same sample rather
        // than holding their entry level for one extra call.
        loop {
            match self.phase {
                EnvelopePhase::Attack => {
                    if self.attack_time <= 0.0 {
                        self.cur_time = 0.0;
                        self.phase = EnvelopePhase::Decay;
                        continue;
                    }
                    self.cur_time += dt;
                    self.level = (self.cur_time / self.attack_time).min(1.0);
                    if self.cur_time >= self.attack_time {
                        self.cur_time = 0.0;
                        self.phase = EnvelopePhase::Decay;
                    }
                    break;
                }
                EnvelopePhase::Decay => {
                    if self.decay_time <= 0.0 {
                        self.level = self.sustain_factor;
                        self.phase = EnvelopePhase::Sustain;
                        break;
                    }
                    self.cur_time += dt;
                    let t = (self.cur_time / self.decay_time).min(1.0);
                    self.level = 1.0 + (self.sustain_factor - 1.0) * t;
                    if self.cur_time >= self.decay_time {
                        self.phase = EnvelopePhase::Sustain;
                    }
                    break;
                }
                EnvelopePhase::Sustain => {
                    self.level = self.sustain_factor;
                    break;
                }
                EnvelopePhase::Release => {
                    if self.release_time <= 0.0 {
                        self.level = 0.0;
                        self.phase = EnvelopePhase::Complete;
                        break;
                    }
                    self.cur_time += dt;
                    let t = (self.cur_time / self.release_time).min(1.0);
                    self.level = self.release_start_factor * (1.0 - t);
                    if self.cur_time >= self.release_time {
                        self.level = 0.0;
                        self.phase = EnvelopePhase::Complete;
                    }
                    break;
                }
                EnvelopePhase::Complete => {
                    self.level = 0.0;
                    break;
                }
            }
        }

        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adsr(a: f64, d: f64, s: f64, r: f64) -> Adsr {
        Adsr {
            attack_time: a,
            decay_time: d,
            sustain_factor: s,
            release_time: r,
        }
    }

    #[test]
    fn key_off_releases_from_sustain() {
        let sample_rate = 1000.0;
        let mut env = Envelope::new();
        env.reset(&adsr(0.01, 0.1, 0.5, 0.5));

        for _ in 0..(0.5 * sample_rate) as usize {
            env.next_sample(sample_rate);
        }
        assert!((env.level - 0.5).abs() < 0.01);

        env.key_off();
        for _ in 0..(0.5 * sample_rate) as usize {
            env.next_sample(sample_rate);
        }
        assert!(env.is_complete());
        assert!(env.next_sample(sample_rate).abs() < 1e-9);
    }

    #[test]
    fn key_off_during_attack_ramps_from_current_level() {
        let sample_rate = 1000.0;
        let mut env = Envelope::new();
        env.reset(&adsr(1.0, 0.1, 0.5, 0.2));

        for _ in 0..100 {
            env.next_sample(sample_rate);
        }
        let level_at_keyoff = env.level;
        env.key_off();
        assert_eq!(env.phase(), EnvelopePhase::Release);
        assert!((env.release_start_factor - level_at_keyoff).abs() < 1e-9);
    }

    #[test]
    fn zero_attack_and_decay_reach_sustain_immediately() {
        let mut env = Envelope::new();
        env.reset(&adsr(0.0, 0.0, 0.7, 0.1));
        let level = env.next_sample(48000.0);
        assert!((level - 0.7).abs() < 1e-9);
        assert_eq!(env.phase(), EnvelopePhase::Sustain);
    }

    #[test]
    fn dls_scales_times_by_note_and_velocity() {
        let dls = AdsrDls {
            attack_time: 1.0,
            decay_time: 1.0,
            sustain_factor: 0.8,
            release_time: 1.0,
            vel_to_time: 0.5,
            note_to_time: 0.0,
        };
        let mut env = Envelope::new();
        env.reset_dls(&dls, 60, 127);
        // Full velocity halves the scaled attack time relative to velocity 0.
        let fast_attack = env.attack_time;

        let mut env_slow = Envelope::new();
        env_slow.reset_dls(&dls, 60, 0);
        assert!(fast_attack < env_slow.attack_time);
    }
}
