//! Pool blob decoder: sound macros, ADSR tables, keymaps, and layer lists,
//! each keyed by `ObjectId`.

use std::collections::HashMap;

use vox_dsp::{Adsr, AdsrDls};

use crate::object_id::{read_u32, DataFormat, ObjectId};

const SENTINEL: u32 = 0xFFFF_FFFF;
const POOL_HEADER_LEN: usize = 16;
const RECORD_HEADER_LEN: usize = 8; // size(u32) + id(u16) + 2 pad bytes per spec's ObjectId slot
const LAYER_MAPPING_LEN: usize = 12;

/// One entry in a layer list: a key-range bound to a sound macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerMapping {
    pub macro_id: ObjectId,
    pub key_lo: u8,
    pub key_hi: u8,
    pub transpose: i8,
    pub pan: i8,
    pub volume: u8,
    pub priority: u8,
    /// Reserved on-disk field with no documented use; preserved verbatim.
    pub reserved: u32,
}

impl LayerMapping {
    pub fn covers(&self, note: u8) -> bool {
        note >= self.key_lo && note <= self.key_hi
    }
}

/// A decoded byte range inside the pool blob: `(offset, length)` of a
/// record's payload, kept as a pointer-into-blob rather than copied out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSlice {
    pub offset: usize,
    pub len: usize,
}

/// Index over one group's pool blob. Payloads stay pinned to the source
/// bytes and are only materialised into typed records (`Adsr`, keymap
/// entries) on demand.
pub struct AudioGroupPool {
    sound_macros: HashMap<ObjectId, PoolSlice>,
    tables: HashMap<ObjectId, PoolSlice>,
    keymaps: HashMap<ObjectId, PoolSlice>,
    layers: HashMap<ObjectId, Vec<LayerMapping>>,
}

impl AudioGroupPool {
    pub fn new(pool: &[u8], format: DataFormat) -> Self {
        let mut sound_macros = HashMap::new();
        let mut tables = HashMap::new();
        let mut keymaps = HashMap::new();
        let mut layers = HashMap::new();

        if pool.len() < POOL_HEADER_LEN {
            return Self {
                sound_macros,
                tables,
                keymaps,
                layers,
            };
        }

        let sound_macros_off = read_u32(pool, 0, format).unwrap_or(0) as usize;
        let tables_off = read_u32(pool, 4, format).unwrap_or(0) as usize;
        let keymaps_off = read_u32(pool, 8, format).unwrap_or(0) as usize;
        let layers_off = read_u32(pool, 12, format).unwrap_or(0) as usize;

        if sound_macros_off != 0 {
            Self::decode_records(pool, sound_macros_off, format, &mut sound_macros);
        }
        if tables_off != 0 {
            Self::decode_records(pool, tables_off, format, &mut tables);
        }
        if keymaps_off != 0 {
            Self::decode_records(pool, keymaps_off, format, &mut keymaps);
        }
        if layers_off != 0 {
            Self::decode_layers(pool, layers_off, format, &mut layers);
        }

        Self {
            sound_macros,
            tables,
            keymaps,
            layers,
        }
    }

    fn decode_records(
        pool: &[u8],
        start: usize,
        format: DataFormat,
        out: &mut HashMap<ObjectId, PoolSlice>,
    ) {
        let mut cur = start;
        loop {
            let Some(size) = read_u32(pool, cur, format) else {
                break;
            };
            if size == SENTINEL {
                break;
            }
            let size = size as usize;
            if size < RECORD_HEADER_LEN || cur + size > pool.len() {
                break;
            }
            let Some(id_raw) = crate::object_id::read_u16(pool, cur + 4, format) else {
                break;
            };
            let id = ObjectId(id_raw);
            let payload_off = cur + RECORD_HEADER_LEN;
            let payload_len = size - RECORD_HEADER_LEN;
            out.insert(
                id,
                PoolSlice {
                    offset: payload_off,
                    len: payload_len,
                },
            );
            cur += size;
        }
    }

    fn decode_layers(
        pool: &[u8],
        start: usize,
        format: DataFormat,
        out: &mut HashMap<ObjectId, Vec<LayerMapping>>,
    ) {
        let mut cur = start;
        loop {
            let Some(size) = read_u32(pool, cur, format) else {
                break;
            };
            if size == SENTINEL {
                break;
            }
            let size = size as usize;
            if size < RECORD_HEADER_LEN || cur + size > pool.len() {
                break;
            }
            let Some(id_raw) = crate::object_id::read_u16(pool, cur + 4, format) else {
                break;
            };
            let id = ObjectId(id_raw);
            let mut p = cur + RECORD_HEADER_LEN;
            let Some(count) = read_u32(pool, p, format) else {
                break;
            };
            p += 4;

            let mut mappings = Vec::with_capacity(count as usize);
            for _ in 0..count {
                if p + LAYER_MAPPING_LEN > pool.len() {
                    break;
                }
                let macro_id = ObjectId(crate::object_id::read_u16(pool, p, format).unwrap_or(0));
                let key_lo = pool[p + 2];
                let key_hi = pool[p + 3];
                let transpose = pool[p + 4] as i8;
                let pan = pool[p + 5] as i8;
                let volume = pool[p + 6];
                let priority = pool[p + 7];
                let reserved = read_u32(pool, p + 8, format).unwrap_or(0);
                mappings.push(LayerMapping {
                    macro_id,
                    key_lo,
                    key_hi,
                    transpose,
                    pan,
                    volume,
                    priority,
                    reserved,
                });
                p += LAYER_MAPPING_LEN;
            }
            out.insert(id, mappings);
            cur += size;
        }
    }

    pub fn sound_macro(&self, id: ObjectId) -> Option<PoolSlice> {
        self.sound_macros.get(&id).copied()
    }

    pub fn keymap(&self, id: ObjectId) -> Option<PoolSlice> {
        self.keymaps.get(&id).copied()
    }

    pub fn layers(&self, id: ObjectId) -> Option<&[LayerMapping]> {
        self.layers.get(&id).map(|v| v.as_slice())
    }

    /// Decodes the table entry for `id` as a flat ADSR (16 bytes: four
    /// big-endian/native f32 fields: attack, decay, sustain, release).
    pub fn table_as_adsr(&self, pool: &[u8], id: ObjectId, format: DataFormat) -> Option<Adsr> {
        let slice = self.tables.get(&id)?;
        if slice.len < 16 {
            return None;
        }
        let bytes = &pool[slice.offset..slice.offset + 16];
        Some(Adsr {
            attack_time: read_f32(bytes, 0, format)? as f64,
            decay_time: read_f32(bytes, 4, format)? as f64,
            sustain_factor: read_f32(bytes, 8, format)? as f64,
            release_time: read_f32(bytes, 12, format)? as f64,
        })
    }

    /// Decodes the table entry for `id` as an ADSRDLS record (24 bytes: the
    /// four ADSR fields plus velocity/note time-scaling factors).
    pub fn table_as_adsr_dls(
        &self,
        pool: &[u8],
        id: ObjectId,
        format: DataFormat,
    ) -> Option<AdsrDls> {
        let slice = self.tables.get(&id)?;
        if slice.len < 24 {
            return None;
        }
        let bytes = &pool[slice.offset..slice.offset + 24];
        Some(AdsrDls {
            attack_time: read_f32(bytes, 0, format)? as f64,
            decay_time: read_f32(bytes, 4, format)? as f64,
            sustain_factor: read_f32(bytes, 8, format)? as f64,
            release_time: read_f32(bytes, 12, format)? as f64,
            vel_to_time: read_f32(bytes, 16, format)? as f64,
            note_to_time: read_f32(bytes, 20, format)? as f64,
        })
    }

    /// Decodes a 128-entry keymap (5 bytes per MIDI note: macro id, transpose,
    /// pan, volume) and returns the entry for `note`, if present.
    pub fn keymap_entry(
        &self,
        pool: &[u8],
        id: ObjectId,
        note: u8,
        format: DataFormat,
    ) -> Option<KeymapEntry> {
        let slice = self.keymaps.get(&id)?;
        const ENTRY_LEN: usize = 5;
        let idx = note as usize * ENTRY_LEN;
        if idx + ENTRY_LEN > slice.len {
            return None;
        }
        let base = slice.offset + idx;
        let macro_id = ObjectId(crate::object_id::read_u16(pool, base, format)?);
        Some(KeymapEntry {
            macro_id,
            transpose: pool[base + 2] as i8,
            pan: pool[base + 3] as i8,
            volume: pool[base + 4],
        })
    }
}

/// One resolved keymap lookup: `(macroId, transpose, pan, volume)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeymapEntry {
    pub macro_id: ObjectId,
    pub transpose: i8,
    pub pan: i8,
    pub volume: u8,
}

fn read_f32(bytes: &[u8], offset: usize, format: DataFormat) -> Option<f32> {
    let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(if format.is_big_endian() {
        f32::from_be_bytes(raw)
    } else {
        f32::from_ne_bytes(raw)
    })
}
