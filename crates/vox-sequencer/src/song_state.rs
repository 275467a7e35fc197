//! Stateful song playback: decodes a song blob once, then drives a
//! `SongDispatch` (normally a `Sequencer`) tick by tick.

use vox_format::{
    decode_continuous_event, decode_region_header, decode_track_regions, decode_v0_record,
    decode_v1_entry, detect_version, region_data_offset, SongEvent, SongHeader, SongVersion,
    TrackRegion,
};

const NO_NOTE: i32 = i32::MIN;
const TICKS_PER_QUARTER: f64 = 384.0;

/// Something a `SongState` can drive: channel voice messages plus tempo.
pub trait SongDispatch {
    fn key_on(&mut self, chan: u8, note: u8, vel: u8);
    fn key_off(&mut self, chan: u8, note: u8, vel: u8);
    fn set_ctrl_value(&mut self, chan: u8, ctrl: u8, val: u8);
    fn set_pitch_wheel(&mut self, chan: u8, norm: f64);
    fn set_chan_program(&mut self, chan: u8, prog: u16);
    fn set_tempo(&mut self, bpm: f64);
}

/// One track's playback cursor: current region, event stream position, and
/// the continuous pitch/modulation wheel cursors.
struct Track {
    channel: u8,
    regions: Vec<TrackRegion>,
    region_cursor: usize,
    data_pos: usize,
    region_end: u32,
    event_cum_tick: u32,
    pending: Option<(u32, SongEvent)>,
    note_lengths: [i32; 128],
    pitch_pos: usize,
    pitch_cum_tick: u32,
    mod_pos: usize,
    mod_cum_tick: u32,
    legacy_last_tick: i32,
    done: bool,
}

impl Track {
    fn new(regions: Vec<TrackRegion>, channel: u8) -> Self {
        Self {
            channel,
            regions,
            region_cursor: 0,
            data_pos: 0,
            region_end: 0,
            event_cum_tick: 0,
            pending: None,
            note_lengths: [NO_NOTE; 128],
            pitch_pos: 0,
            pitch_cum_tick: 0,
            mod_pos: 0,
            mod_cum_tick: 0,
            legacy_last_tick: 0,
            done: false,
        }
    }

    fn load_region(&mut self, song: &[u8], header: &SongHeader) -> bool {
        let Some(region) = self.regions.get(self.region_cursor) else {
            self.done = true;
            return false;
        };
        let Some(data_off) = region_data_offset(song, header, region.region_index) else {
            self.done = true;
            return false;
        };
        let Some(region_header) = decode_region_header(song, data_off, header.format) else {
            self.done = true;
            return false;
        };
        self.region_end = self
            .regions
            .get(self.region_cursor + 1)
            .and_then(|next| region_data_offset(song, header, next.region_index))
            .unwrap_or(song.len() as u32);
        self.data_pos = data_off as usize + 12;
        self.pitch_pos = data_off as usize + region_header.pitch_off as usize;
        self.mod_pos = data_off as usize + region_header.mod_off as usize;
        self.event_cum_tick = 0;
        self.pitch_cum_tick = 0;
        self.mod_cum_tick = 0;
        self.legacy_last_tick = region.start_tick;
        self.pending = None;
        true
    }

    fn decode_next_event(&mut self, song: &[u8], header: &SongHeader, version: SongVersion) {
        if self.pending.is_some() || self.done {
            return;
        }
        if self.data_pos as u32 >= self.region_end {
            self.pending = Some((self.event_cum_tick, SongEvent::EndOfRegion));
            return;
        }
        match version {
            SongVersion::Revised => {
                if let Some((delta, event)) = decode_v1_entry(song, &mut self.data_pos) {
                    self.event_cum_tick += delta;
                    self.pending = Some((self.event_cum_tick, event));
                } else {
                    self.pending = Some((self.event_cum_tick, SongEvent::EndOfRegion));
                }
            }
            SongVersion::Legacy => {
                if let Some((tick, event)) = decode_v0_record(song, &mut self.data_pos, header.format) {
                    let delta = (tick - self.legacy_last_tick).max(0) as u32;
                    self.legacy_last_tick = tick;
                    self.event_cum_tick += delta;
                    self.pending = Some((self.event_cum_tick, event));
                } else {
                    self.pending = Some((self.event_cum_tick, SongEvent::EndOfRegion));
                }
            }
        }
    }

    /// Advances this track by `ticks`, dispatching key-on/off, controller,
    /// and program events through `seq`. Returns `true` once no further
    /// valid regions remain.
    fn advance(
        &mut self,
        song: &[u8],
        header: &SongHeader,
        version: SongVersion,
        ticks: u32,
        seq: &mut dyn SongDispatch,
    ) -> bool {
        if self.done {
            return true;
        }
        if self.region_cursor == 0 && self.data_pos == 0 && !self.load_region(song, header) {
            return true;
        }

        // 1. Switch region if the next one starts inside this window.
        let window_start = self.legacy_window_tick();
        if let Some(next) = self.regions.get(self.region_cursor + 1) {
            if (next.start_tick as i64) <= (window_start as i64 + ticks as i64) {
                self.region_cursor += 1;
                if !self.load_region(song, header) {
                    return true;
                }
            }
        }

        // 2. Decrement already-active notes.
        for note in 0..128u8 {
            if self.note_lengths[note as usize] != NO_NOTE {
                self.note_lengths[note as usize] -= ticks as i32;
                if self.note_lengths[note as usize] <= 0 {
                    self.note_lengths[note as usize] = NO_NOTE;
                    seq.key_off(self.channel, note, 0);
                }
            }
        }

        // 3. Replay continuous pitch/modulation streams inside the window.
        while self.pitch_cum_tick <= ticks {
            let Some(ev) = decode_continuous_event(song, &mut self.pitch_pos) else {
                break;
            };
            self.pitch_cum_tick += ev.delta_tick;
            if self.pitch_cum_tick > ticks {
                break;
            }
            let norm = (ev.value as f64 / 32768.0).clamp(-1.0, 1.0);
            seq.set_pitch_wheel(self.channel, norm);
        }
        while self.mod_cum_tick <= ticks {
            let Some(ev) = decode_continuous_event(song, &mut self.mod_pos) else {
                break;
            };
            self.mod_cum_tick += ev.delta_tick;
            if self.mod_cum_tick > ticks {
                break;
            }
            let val = (ev.value as f64 * 128.0 / 16384.0).clamp(0.0, 127.0);
            seq.set_ctrl_value(self.channel, 1, val as u8);
        }

        // 4. Drain events whose cumulative wait falls inside the window.
        loop {
            self.decode_next_event(song, header, version);
            let Some((cum_tick, event)) = self.pending else {
                break;
            };
            if cum_tick > ticks {
                break;
            }
            self.pending = None;
            match event {
                SongEvent::EndOfRegion => {
                    self.data_pos = 0;
                    if self.region_cursor + 1 >= self.regions.len() {
                        self.done = true;
                        return true;
                    }
                    self.region_cursor += 1;
                    if !self.load_region(song, header) {
                        return true;
                    }
                }
                SongEvent::ControlChange { ctrl, val } => {
                    seq.set_ctrl_value(self.channel, ctrl, val);
                }
                SongEvent::ProgramChange { prog } => {
                    seq.set_chan_program(self.channel, prog as u16);
                }
                SongEvent::Note { note, vel, length } => {
                    seq.key_on(self.channel, note, vel);
                    let remaining_in_window = ticks.saturating_sub(cum_tick);
                    if (length as u32) <= remaining_in_window {
                        seq.key_off(self.channel, note, 0);
                    } else {
                        self.note_lengths[note as usize] =
                            length as i32 - remaining_in_window as i32;
                    }
                }
            }
        }

        false
    }

    fn legacy_window_tick(&self) -> i32 {
        self.regions
            .get(self.region_cursor)
            .map(|r| r.start_tick)
            .unwrap_or(0)
    }
}

/// One tempo-table entry: the song tick at which a tempo change takes effect.
#[derive(Debug, Clone, Copy)]
struct TempoChange {
    tick: u32,
    bpm: f64,
}

/// Decoded playback cursor over a song blob, driving up to 64 tracks.
pub struct SongState<'a> {
    song: &'a [u8],
    header: SongHeader,
    version: SongVersion,
    tracks: Vec<Track>,
    tempo_changes: Vec<TempoChange>,
    tempo_cursor: usize,
    cur_tick: u32,
    cur_dt: f64,
    tempo: f64,
    stopped: bool,
}

impl<'a> SongState<'a> {
    /// Decodes the header, detects the event-stream version, and builds a
    /// `Track` per present channel. Returns `None` if version detection fails.
    pub fn initialize(song: &'a [u8]) -> Option<Self> {
        let header = SongHeader::decode(song)?;
        let version = detect_version(song, &header)?;

        let mut tracks = Vec::new();
        for idx in 0..64 {
            let Some(offset) = header.track_offset(song, idx) else {
                continue;
            };
            let regions = decode_track_regions(song, offset, header.format);
            if regions.is_empty() {
                continue;
            }
            let channel = header.channel_for_track(song, idx).unwrap_or(idx as u8);
            tracks.push(Track::new(regions, channel));
        }

        let tempo_changes = decode_tempo_table(song, &header);

        Some(Self {
            song,
            header,
            version,
            tracks,
            tempo_changes,
            tempo_cursor: 0,
            cur_tick: 0,
            cur_dt: 0.0,
            tempo: header.initial_tempo as f64,
            stopped: false,
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Advances playback by `dt` seconds, dispatching events through `seq`.
    pub fn advance(&mut self, dt: f64, seq: &mut dyn SongDispatch) {
        if self.stopped {
            return;
        }
        self.cur_dt += dt;

        loop {
            let ticks_per_second = self.tempo * TICKS_PER_QUARTER / 60.0;
            if ticks_per_second <= 0.0 {
                self.cur_dt = 0.0;
                break;
            }
            let mut rem_ticks = (self.cur_dt * ticks_per_second).ceil() as u32;
            if rem_ticks == 0 {
                break;
            }

            if let Some(change) = self.tempo_changes.get(self.tempo_cursor) {
                if change.tick >= self.cur_tick && change.tick <= self.cur_tick + rem_ticks {
                    rem_ticks = change.tick - self.cur_tick;
                    if rem_ticks == 0 {
                        self.tempo = change.bpm;
                        seq.set_tempo(self.tempo);
                        self.tempo_cursor += 1;
                        continue;
                    }
                }
            }

            let mut done = true;
            for track in &mut self.tracks {
                let track_done =
                    track.advance(self.song, &self.header, self.version, rem_ticks, seq);
                done &= track_done;
            }

            self.cur_tick += rem_ticks;
            self.cur_dt -= rem_ticks as f64 / ticks_per_second;

            if done {
                self.stopped = true;
                break;
            }
            if self.cur_dt <= 0.0 {
                break;
            }
        }
    }
}

fn decode_tempo_table(song: &[u8], header: &SongHeader) -> Vec<TempoChange> {
    let mut changes = Vec::new();
    if header.tempo_table_offset == 0 {
        return changes;
    }
    let mut pos = header.tempo_table_offset as usize;
    while pos + 8 <= song.len() {
        let Some(tick) = vox_format::read_u32(song, pos, header.format) else {
            break;
        };
        if tick == 0xFFFF_FFFF {
            break;
        }
        let Some(bpm_raw) = vox_format::read_u32(song, pos + 4, header.format) else {
            break;
        };
        changes.push(TempoChange {
            tick,
            bpm: bpm_raw as f64,
        });
        pos += 8;
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        events: Vec<String>,
    }

    impl SongDispatch for Recorder {
        fn key_on(&mut self, chan: u8, note: u8, vel: u8) {
            self.events.push(format!("keyOn({chan},{note},{vel})"));
        }
        fn key_off(&mut self, chan: u8, note: u8, vel: u8) {
            self.events.push(format!("keyOff({chan},{note},{vel})"));
        }
        fn set_ctrl_value(&mut self, chan: u8, ctrl: u8, val: u8) {
            self.events.push(format!("ctrl({chan},{ctrl},{val})"));
        }
        fn set_pitch_wheel(&mut self, chan: u8, norm: f64) {
            self.events.push(format!("pitch({chan},{norm:.3})"));
        }
        fn set_chan_program(&mut self, chan: u8, prog: u16) {
            self.events.push(format!("prog({chan},{prog})"));
        }
        fn set_tempo(&mut self, bpm: f64) {
            self.events.push(format!("tempo({bpm})"));
        }
    }

    fn build_v1_song() -> Vec<u8> {
        // Header: 5 offsets + initial tempo, all big-endian (first byte 0).
        let mut song = vec![0u8; 24];
        let track_index_off = 24u32;
        let region_index_off = track_index_off + 64 * 4;
        let channel_map_off = region_index_off + 4 * 4;
        let tempo_table_off = 0u32; // absent
        let reserved_off = 0u32;
        let initial_tempo = 120u32;

        song[0..4].copy_from_slice(&track_index_off.to_be_bytes());
        song[4..8].copy_from_slice(&region_index_off.to_be_bytes());
        song[8..12].copy_from_slice(&channel_map_off.to_be_bytes());
        song[12..16].copy_from_slice(&tempo_table_off.to_be_bytes());
        song[16..20].copy_from_slice(&reserved_off.to_be_bytes());
        song[20..24].copy_from_slice(&initial_tempo.to_be_bytes());

        // Track index array: 64 u32 offsets, track 0 points to its region list.
        song.resize(region_index_off as usize, 0);
        let track0_regions_off = (song.len() + 4 * 4 + 64) as u32;
        song[track_index_off as usize..track_index_off as usize + 4]
            .copy_from_slice(&track0_regions_off.to_be_bytes());

        // Region index array: single entry pointing at the region data.
        let region_data_off = track0_regions_off + 16; // right after the track's TrackRegion array (2 entries)
        song.resize(channel_map_off as usize, 0);
        song[region_index_off as usize..region_index_off as usize + 4]
            .copy_from_slice(&region_data_off.to_be_bytes());

        // Channel map: 64 bytes, track 0 -> MIDI channel 0.
        song.resize(channel_map_off as usize + 64, 0);
        song[channel_map_off as usize] = 0;

        // Track 0's region array: one TrackRegion{startTick=0, regionIndex=0}
        // terminated by regionIndex=-1.
        song.resize(track0_regions_off as usize, 0);
        song.extend_from_slice(&0i32.to_be_bytes());
        song.extend_from_slice(&0i32.to_be_bytes());
        song.extend_from_slice(&0i32.to_be_bytes());
        song.extend_from_slice(&(-1i32).to_be_bytes());

        // Region data: 12-byte header (kind, pitchOff, modOff), then the v1
        // event stream, then the (empty) pitch/mod continuous streams.
        assert_eq!(song.len() as u32, region_data_off);
        let event_stream_len = 2 + 4 + 2 + 2; // delta, note, delta, eoc
        let pitch_off = 12 + event_stream_len;
        let mod_off = pitch_off + 4;
        song.extend_from_slice(&0u32.to_be_bytes()); // kind
        song.extend_from_slice(&(pitch_off as u32).to_be_bytes());
        song.extend_from_slice(&(mod_off as u32).to_be_bytes());

        // Event stream: delta=0 (TimeRLE word 0x0000), note(60,100,48);
        // delta=48 (TimeRLE word 0x0030), end-of-region.
        song.extend_from_slice(&0u16.to_be_bytes());
        song.push(60);
        song.push(100);
        song.extend_from_slice(&48u16.to_be_bytes());
        song.extend_from_slice(&48u16.to_be_bytes());
        song.push(0xFF);
        song.push(0xFF);

        // Pitch and modulation streams: immediate end-of-stream sentinel.
        song.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        song.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());

        song
    }

    #[test]
    fn revised_song_plays_note_and_stops() {
        let song = build_v1_song();
        let mut state = SongState::initialize(&song).expect("song should decode");
        let mut seq = Recorder { events: Vec::new() };

        state.advance(1.0, &mut seq);

        assert!(state.is_stopped());
        assert!(seq.events.contains(&"keyOn(0,60,100)".to_string()));
        assert!(seq.events.contains(&"keyOff(0,60,0)".to_string()));
        assert_eq!(
            seq.events.iter().filter(|e| e.starts_with("keyOn")).count(),
            1
        );
        assert_eq!(
            seq.events.iter().filter(|e| e.starts_with("keyOff")).count(),
            1
        );
    }
}
