//! Pitch and cents/frequency conversion for voice playback.

use serde::{Deserialize, Serialize};

/// MIDI-style pitch with cents precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pitch {
    /// MIDI note number (60 = C4).
    pub midi_note: u8,
    /// Cents deviation from equal temperament (-50 to +50).
    pub cents: f64,
}

impl Pitch {
    /// Create from frequency in Hz.
    pub fn from_frequency(freq: f64) -> Option<Self> {
        if freq <= 0.0 {
            return None;
        }

        let midi_f = 12.0 * (freq / 440.0).log2() + 69.0;
        if !(0.0..=127.0).contains(&midi_f) {
            return None;
        }

        let midi_note = midi_f.round() as u8;
        let cents = (midi_f - midi_note as f64) * 100.0;
        Some(Self { midi_note, cents })
    }

    /// Convert to frequency in Hz.
    pub fn to_frequency(&self) -> f64 {
        let midi_f = self.midi_note as f64 + self.cents / 100.0;
        440.0 * 2.0_f64.powf((midi_f - 69.0) / 12.0)
    }

    /// Total pitch in fractional MIDI units.
    pub fn as_midi(&self) -> f64 {
        self.midi_note as f64 + self.cents / 100.0
    }

    /// Apply a shift in semitones, clamping to the MIDI note range.
    pub fn shifted(&self, semitones: f64) -> Self {
        let new_midi = (self.as_midi() + semitones).clamp(0.0, 127.0);
        let midi_note = new_midi.round() as u8;
        let cents = (new_midi - midi_note as f64) * 100.0;
        Self { midi_note, cents }
    }
}

impl Default for Pitch {
    fn default() -> Self {
        Self {
            midi_note: 69,
            cents: 0.0,
        }
    }
}

/// Frequency ratio for a cents offset (1200 cents = one octave).
#[inline]
pub fn cents_to_ratio(cents: f64) -> f64 {
    2.0_f64.powf(cents / 1200.0)
}

/// Frequency ratio for a semitone offset.
#[inline]
pub fn semitones_to_ratio(semitones: f64) -> f64 {
    2.0_f64.powf(semitones / 12.0)
}

/// Resolve a normalized pitch-wheel position (-1..1) against a bend range in
/// semitones to a cents offset, the unit the sound-macro interpreter applies
/// on top of a voice's base pitch.
#[inline]
pub fn pitch_wheel_cents(norm: f64, wheel_range_semitones: f64) -> f64 {
    norm.clamp(-1.0, 1.0) * wheel_range_semitones * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_round_trips() {
        let pitch = Pitch::from_frequency(440.0).unwrap();
        assert_eq!(pitch.midi_note, 69);
        assert!(pitch.cents.abs() < 1e-6);
        assert!((pitch.to_frequency() - 440.0).abs() < 1e-9);
    }

    #[test]
    fn octave_is_1200_cents() {
        assert!((cents_to_ratio(1200.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn wheel_range_scales_linearly() {
        assert_eq!(pitch_wheel_cents(1.0, 2.0), 200.0);
        assert_eq!(pitch_wheel_cents(-0.5, 2.0), -100.0);
    }

    #[test]
    fn shift_clamps_to_midi_range() {
        let pitch = Pitch {
            midi_note: 126,
            cents: 0.0,
        };
        let shifted = pitch.shifted(5.0);
        assert_eq!(shifted.midi_note, 127);
    }
}
