//! vox-audio: output device I/O (via cpal) and the host backend contract
//! the engine drives voices and submixes through.

mod backend;
mod device;
mod error;
mod stream;

pub use backend::*;
pub use device::*;
pub use error::*;
pub use stream::*;

use vox_core::{BufferSize, SampleRate};

/// Output stream configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: SampleRate,
    pub buffer_size: BufferSize,
    pub output_channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz48000,
            buffer_size: BufferSize::Samples256,
            output_channels: 2,
        }
    }
}
