//! vox-engine: the playback runtime's entity owner and scheduler.
//!
//! - `macro_interp` - sound-macro bytecode fetch/decode
//! - `voice` - one sounding voice: interpreter, envelope, backend handle
//! - `studio` - submix/effect-stack graph a voice renders into
//! - `engine` - owns audio groups, voices, sequencers, studios; drives the tick

mod engine;
mod macro_interp;
mod studio;
mod voice;

pub use engine::*;
pub use macro_interp::{decode_op, MacroOp};
pub use studio::*;
pub use voice::{PlayMacroRequest, Voice, VoiceId, VoiceState};
