//! Standard MIDI File reading into note tracks
//!
//! Note-on/note-off pairs become `NoteEvent`s in the file's own ticks. The
//! first tempo event in the file sets the nominal tempo (120 BPM without one).
//! The General MIDI percussion channel is skipped and tracks without notes
//! are dropped.

use std::collections::HashMap;
use std::path::Path;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use thiserror::Error;
use tracing::{debug, info};

use shawzin_core::{NoteEvent, ShawzinError, TimeBase, TrackInput};

/// Zero-based channel 10, percussion in General MIDI
const PERCUSSION_CHANNEL: u8 = 9;
const DEFAULT_TEMPO_US: u32 = 500_000;
/// Length given to notes that never receive a note-off, in seconds
const HANGING_NOTE_SECONDS: f64 = 0.1;

#[derive(Debug, Error)]
pub enum MidiReadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("MIDI parse error: {0}")]
    Parse(String),
    #[error("Unsupported MIDI timing: {0}")]
    Timing(String),
    #[error("Track error: {0}")]
    Track(#[from] ShawzinError),
}

pub fn read_midi_file(path: &Path) -> Result<Vec<TrackInput>, MidiReadError> {
    let bytes = std::fs::read(path)?;
    let tracks = read_midi_bytes(&bytes)?;
    info!("Read {} note track(s) from {}", tracks.len(), path.display());
    Ok(tracks)
}

pub fn read_midi_bytes(bytes: &[u8]) -> Result<Vec<TrackInput>, MidiReadError> {
    let smf = Smf::parse(bytes).map_err(|e| MidiReadError::Parse(e.to_string()))?;
    let time_base = time_base(&smf)?;
    debug!(
        "MIDI timing: {} ticks per beat at {:.2} BPM",
        time_base.ticks_per_beat, time_base.tempo_bpm
    );

    let mut tracks = Vec::new();
    for (index, track) in smf.tracks.iter().enumerate() {
        let mut name = None;
        let mut tick: u64 = 0;
        let mut open: HashMap<(u8, u8), (u64, u8)> = HashMap::new();
        let mut notes = Vec::new();

        for event in track {
            tick += event.delta.as_int() as u64;
            match event.kind {
                TrackEventKind::Meta(MetaMessage::TrackName(raw)) if name.is_none() => {
                    let text = String::from_utf8_lossy(raw).trim().to_string();
                    if !text.is_empty() {
                        name = Some(text);
                    }
                }
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    if channel == PERCUSSION_CHANNEL {
                        continue;
                    }
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            let slot = (channel, key.as_int());
                            // A retrigger closes the sounding note first
                            if let Some((start, velocity)) = open.insert(slot, (tick, vel.as_int())) {
                                push_note(&mut notes, slot, start, tick, velocity);
                            }
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            let slot = (channel, key.as_int());
                            if let Some((start, velocity)) = open.remove(&slot) {
                                push_note(&mut notes, slot, start, tick, velocity);
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        let hanging = (time_base.ticks_per_beat as f64 * time_base.tempo_bpm / 60.0
            * HANGING_NOTE_SECONDS)
            .round()
            .max(1.0) as u64;
        for (slot, (start, velocity)) in open {
            push_note(&mut notes, slot, start, start + hanging, velocity);
        }

        if notes.is_empty() {
            continue;
        }
        notes.sort_by_key(|n: &NoteEvent| (n.onset, n.pitch, n.channel));
        let name = name.unwrap_or_else(|| format!("Track {}", index + 1));
        debug!("Track {} '{}': {} notes", index, name, notes.len());
        tracks.push(TrackInput::new(name, notes, time_base));
    }
    Ok(tracks)
}

fn push_note(notes: &mut Vec<NoteEvent>, (channel, pitch): (u8, u8), start: u64, end: u64, velocity: u8) {
    match NoteEvent::new(pitch, start, end.saturating_sub(start), velocity) {
        Ok(note) => notes.push(NoteEvent { channel, ..note }),
        Err(_) => debug!("Skipping zero-length note {} at tick {}", pitch, start),
    }
}

fn time_base(smf: &Smf) -> Result<TimeBase, MidiReadError> {
    let tempo_us = smf
        .tracks
        .iter()
        .flatten()
        .find_map(|event| match event.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(us)) => Some(us.as_int()),
            _ => None,
        })
        .filter(|&us| us > 0)
        .unwrap_or(DEFAULT_TEMPO_US);

    match smf.header.timing {
        Timing::Metrical(tpb) => Ok(TimeBase::new(tpb.as_int(), 60_000_000.0 / tempo_us as f64)?),
        Timing::Timecode(fps, subframes) => {
            // One "beat" per second at 60 BPM
            let per_second = fps.as_int() as u32 * subframes as u32;
            let tpb = u16::try_from(per_second).map_err(|_| {
                MidiReadError::Timing(format!("{} ticks per second is too fine", per_second))
            })?;
            Ok(TimeBase::new(tpb, 60.0)?)
        }
    }
}

/// Index of the track most likely to carry the melody: many notes first,
/// then higher average pitch, then note density.
pub fn choose_melody_track(tracks: &[TrackInput]) -> Option<usize> {
    let score = |track: &TrackInput| {
        let count = track.notes.len() as f64;
        let avg_pitch = track.notes.iter().map(|n| n.pitch as f64).sum::<f64>() / count.max(1.0);
        let span = track.notes.iter().map(NoteEvent::end).max().unwrap_or(0);
        let seconds = track.time_base.ticks_to_seconds(span).max(1.0);
        count * 10.0 + avg_pitch * 0.1 + count / seconds
    };
    tracks
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.notes.is_empty())
        .max_by(|(ia, a), (ib, b)| score(a).total_cmp(&score(b)).then_with(|| ib.cmp(ia)))
        .map(|(i, _)| i)
}
