//! vox-sequencer: the live song/sfx-group instance and the song-blob
//! scheduler that drives it.
//!
//! - `channel` - per-channel MIDI controller/program/active-voice state
//! - `sequencer` - `Sequencer`, key-on resolution, and the `VoiceSink` contract
//! - `song_state` - stateful song playback over a decoded song blob

mod channel;
mod sequencer;
mod song_state;

pub use sequencer::*;
pub use song_state::*;
