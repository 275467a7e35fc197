//! vox-format: binary decoders for the four on-disk audio group blobs and
//! the song stream.
//!
//! - `object_id` - `ObjectId`, `DataFormat`, and endian-aware primitive reads
//! - `data` - `AudioGroupData`, the four-blob bundle every decoder reads from
//! - `proj` - group-id -> SongGroup/SFXGroup project index
//! - `pool` - sound macros, ADSR tables, keymaps, and layer lists
//! - `sample_directory` - per-sample metadata and ADPCM coefficients
//! - `song` - song header, track/region index, and event-stream decoding

mod data;
mod object_id;
mod pool;
mod proj;
mod sample_directory;
mod song;

pub use data::*;
pub use object_id::*;
pub use pool::*;
pub use proj::*;
pub use sample_directory::*;
pub use song::*;
