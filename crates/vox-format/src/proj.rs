//! Project blob decoder: group-id -> SongGroup/SFXGroup index.
//!
//! The project blob opens with an 8-byte header of two absolute offsets
//! (song-group records, sfx-group records). Each section is a concatenation
//! of `{size, groupId}`-prefixed records terminated by the pool blob's
//! `0xFFFFFFFF` sentinel, matching the record-stream convention used for the
//! pool and sample directory.

use std::collections::HashMap;

use crate::object_id::{read_i32, read_u16, read_u32, DataFormat, ObjectId};

const SENTINEL: u32 = 0xFFFF_FFFF;
const PROJ_HEADER_LEN: usize = 8;
const MIDI_CHANNELS: usize = 16;

/// One percussion-channel exception: note -> sound macro, bypassing the
/// channel's normal program lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrumEntry {
    pub note: u8,
    pub obj_id: ObjectId,
}

/// A song-playing group: one program id per MIDI channel, plus drum-table
/// overrides for channels that map individual notes to distinct macros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongGroup {
    pub channel_programs: [Option<ObjectId>; MIDI_CHANNELS],
    pub drum_entries: Vec<DrumEntry>,
}

impl SongGroup {
    pub fn program_for_channel(&self, chan: u8) -> Option<ObjectId> {
        self.channel_programs.get(chan as usize).copied().flatten()
    }

    pub fn drum_entry(&self, note: u8) -> Option<ObjectId> {
        self.drum_entries
            .iter()
            .find(|e| e.note == note)
            .map(|e| e.obj_id)
    }
}

/// One entry in an SFX group: the default playback parameters for one
/// sound-effect id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfxEntry {
    pub obj_id: ObjectId,
    pub def_key: u8,
    pub def_vel: u8,
    pub pan: i8,
}

/// A sound-effect group: sfx-id -> default playback parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SfxGroup {
    pub entries: HashMap<u16, SfxEntry>,
}

/// Index over one group's project blob.
pub struct ProjectIndex {
    song_groups: HashMap<u16, SongGroup>,
    sfx_groups: HashMap<u16, SfxGroup>,
}

impl ProjectIndex {
    pub fn new(proj: &[u8], format: DataFormat) -> Self {
        let mut song_groups = HashMap::new();
        let mut sfx_groups = HashMap::new();

        if proj.len() < PROJ_HEADER_LEN {
            return Self {
                song_groups,
                sfx_groups,
            };
        }

        let song_off = read_u32(proj, 0, format).unwrap_or(0) as usize;
        let sfx_off = read_u32(proj, 4, format).unwrap_or(0) as usize;

        if song_off != 0 {
            Self::decode_song_groups(proj, song_off, format, &mut song_groups);
        }
        if sfx_off != 0 {
            Self::decode_sfx_groups(proj, sfx_off, format, &mut sfx_groups);
        }

        Self {
            song_groups,
            sfx_groups,
        }
    }

    fn decode_song_groups(
        proj: &[u8],
        start: usize,
        format: DataFormat,
        out: &mut HashMap<u16, SongGroup>,
    ) {
        let mut cur = start;
        loop {
            let Some(size) = read_u32(proj, cur, format) else {
                break;
            };
            if size == SENTINEL {
                break;
            }
            let size = size as usize;
            if size < 4 || cur + size > proj.len() {
                break;
            }
            let Some(group_id) = read_u16(proj, cur + 4, format) else {
                break;
            };
            let mut p = cur + 8;
            let mut channel_programs = [None; MIDI_CHANNELS];
            for slot in channel_programs.iter_mut() {
                let Some(raw) = read_u16(proj, p, format) else {
                    break;
                };
                if raw != 0xFFFF {
                    *slot = Some(ObjectId(raw));
                }
                p += 2;
            }
            let drum_count = read_u16(proj, p, format).unwrap_or(0);
            p += 4; // count + 2 pad bytes
            let mut drum_entries = Vec::with_capacity(drum_count as usize);
            for _ in 0..drum_count {
                if p + 4 > proj.len() {
                    break;
                }
                let note = proj[p];
                let obj_id = ObjectId(read_u16(proj, p + 2, format).unwrap_or(0));
                drum_entries.push(DrumEntry { note, obj_id });
                p += 4;
            }
            out.insert(
                group_id,
                SongGroup {
                    channel_programs,
                    drum_entries,
                },
            );
            cur += size;
        }
    }

    fn decode_sfx_groups(
        proj: &[u8],
        start: usize,
        format: DataFormat,
        out: &mut HashMap<u16, SfxGroup>,
    ) {
        let mut cur = start;
        loop {
            let Some(size) = read_u32(proj, cur, format) else {
                break;
            };
            if size == SENTINEL {
                break;
            }
            let size = size as usize;
            if size < 4 || cur + size > proj.len() {
                break;
            }
            let Some(group_id) = read_u16(proj, cur + 4, format) else {
                break;
            };
            let mut p = cur + 8;
            let Some(count) = read_i32(proj, p, format) else {
                break;
            };
            p += 4;
            let mut entries = HashMap::new();
            for _ in 0..count.max(0) {
                if p + 8 > proj.len() {
                    break;
                }
                let sfx_id = read_u16(proj, p, format).unwrap_or(0);
                let obj_id = ObjectId(read_u16(proj, p + 2, format).unwrap_or(0));
                let def_key = proj[p + 4];
                let def_vel = proj[p + 5];
                let pan = proj[p + 6] as i8;
                entries.insert(
                    sfx_id,
                    SfxEntry {
                        obj_id,
                        def_key,
                        def_vel,
                        pan,
                    },
                );
                p += 8;
            }
            out.insert(group_id, SfxGroup { entries });
            cur += size;
        }
    }

    pub fn song_group(&self, group_id: u16) -> Option<&SongGroup> {
        self.song_groups.get(&group_id)
    }

    pub fn sfx_group(&self, group_id: u16) -> Option<&SfxGroup> {
        self.sfx_groups.get(&group_id)
    }

    pub fn sfx_groups(&self) -> impl Iterator<Item = (u16, &SfxGroup)> {
        self.sfx_groups.iter().map(|(id, g)| (*id, g))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_proj() -> Vec<u8> {
        let mut proj = vec![0u8; PROJ_HEADER_LEN];

        let song_off = proj.len() as u32;
        {
            let mut rec = Vec::new();
            rec.extend_from_slice(&0u32.to_be_bytes()); // size placeholder
            rec.extend_from_slice(&7u16.to_be_bytes()); // group id
            rec.extend_from_slice(&[0, 0]);
            for chan in 0..16u16 {
                if chan == 0 {
                    rec.extend_from_slice(&42u16.to_be_bytes());
                } else {
                    rec.extend_from_slice(&0xFFFFu16.to_be_bytes());
                }
            }
            rec.extend_from_slice(&0u16.to_be_bytes()); // drum count
            rec.extend_from_slice(&[0, 0]);
            let size = rec.len() as u32;
            rec[0..4].copy_from_slice(&size.to_be_bytes());
            proj.extend_from_slice(&rec);
        }
        proj.extend_from_slice(&SENTINEL.to_be_bytes());

        let sfx_off = proj.len() as u32;
        {
            let mut rec = Vec::new();
            rec.extend_from_slice(&0u32.to_be_bytes());
            rec.extend_from_slice(&9u16.to_be_bytes());
            rec.extend_from_slice(&[0, 0]);
            rec.extend_from_slice(&1i32.to_be_bytes()); // count
            rec.extend_from_slice(&1u16.to_be_bytes()); // sfx id
            rec.extend_from_slice(&55u16.to_be_bytes()); // obj id
            rec.push(60); // def key
            rec.push(100); // def vel
            rec.push(0); // pan
            rec.push(0);
            let size = rec.len() as u32;
            rec[0..4].copy_from_slice(&size.to_be_bytes());
            proj.extend_from_slice(&rec);
        }
        proj.extend_from_slice(&SENTINEL.to_be_bytes());

        proj[0..4].copy_from_slice(&song_off.to_be_bytes());
        proj[4..8].copy_from_slice(&sfx_off.to_be_bytes());
        proj
    }

    #[test]
    fn decodes_song_group_channel_program() {
        let proj = build_proj();
        let index = ProjectIndex::new(&proj, DataFormat::Gcn);
        let group = index.song_group(7).unwrap();
        assert_eq!(group.program_for_channel(0), Some(ObjectId(42)));
        assert_eq!(group.program_for_channel(1), None);
    }

    #[test]
    fn decodes_sfx_group_entry() {
        let proj = build_proj();
        let index = ProjectIndex::new(&proj, DataFormat::Gcn);
        let group = index.sfx_group(9).unwrap();
        let entry = group.entries.get(&1).unwrap();
        assert_eq!(entry.obj_id, ObjectId(55));
        assert_eq!(entry.def_key, 60);
    }

    #[test]
    fn missing_group_is_none() {
        let proj = build_proj();
        let index = ProjectIndex::new(&proj, DataFormat::Gcn);
        assert!(index.song_group(123).is_none());
    }
}
