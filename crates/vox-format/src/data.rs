//! `AudioGroupData`: the four-blob bundle every decoder reads from.

use crate::object_id::DataFormat;

/// An immutable bundle of the four companion blobs that make up one audio
/// group: project descriptor, pool, sample directory, and sample data.
///
/// The engine stores only a borrow of this bundle; it is the caller's
/// responsibility to keep it alive for as long as any `AudioGroup`,
/// `Voice`, or `Sequencer` derived from it is in use.
pub struct AudioGroupData<'a> {
    proj: &'a [u8],
    pool: &'a [u8],
    sdir: &'a [u8],
    samp: &'a [u8],
    format: DataFormat,
    /// Absolute offset applied to sample pointers for N64/PC groups.
    sample_base_offset: u32,
}

impl<'a> AudioGroupData<'a> {
    pub fn new(
        proj: &'a [u8],
        pool: &'a [u8],
        sdir: &'a [u8],
        samp: &'a [u8],
        format: DataFormat,
        sample_base_offset: u32,
    ) -> Self {
        Self {
            proj,
            pool,
            sdir,
            samp,
            format,
            sample_base_offset,
        }
    }

    pub fn proj(&self) -> &'a [u8] {
        self.proj
    }

    pub fn pool(&self) -> &'a [u8] {
        self.pool
    }

    pub fn sdir(&self) -> &'a [u8] {
        self.sdir
    }

    pub fn samp(&self) -> &'a [u8] {
        self.samp
    }

    pub fn format(&self) -> DataFormat {
        self.format
    }

    pub fn sample_base_offset(&self) -> u32 {
        self.sample_base_offset
    }

    /// Identity used for indexing by the engine: the address of the pool blob.
    /// Two bundles built from distinct byte slices never compare equal, even
    /// if their contents happen to match.
    pub fn identity(&self) -> usize {
        self.pool.as_ptr() as usize
    }
}
