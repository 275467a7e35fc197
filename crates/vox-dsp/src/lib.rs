//! vox-dsp: the small set of signal-processing primitives the playback
//! runtime needs directly.
//!
//! - `envelope` - ADSR/ADSRDLS envelope state machine
//! - `pitch` - cents/frequency/pitch-wheel conversions
//! - `rle` - the song format's run-length decoders
//! - `smoothing` - lock-free parameter smoothing for channel levels and pan

mod envelope;
mod pitch;
mod rle;
mod smoothing;

pub use envelope::*;
pub use pitch::*;
pub use rle::*;
pub use smoothing::*;
