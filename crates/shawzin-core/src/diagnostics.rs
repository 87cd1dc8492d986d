//! Lossy decisions taken while fitting a track to the instrument

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::note::pitch_name;

/// One place where the output deliberately differs from the input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LossyDecision {
    /// A same-pitch note was folded into an earlier one after quantization
    MergedRetrigger {
        pitch: u8,
        onset: u64,
        kept: usize,
        merged: usize,
    },
    /// Melody mode kept one note of a chord
    ChordReduced {
        onset: u64,
        kept: u8,
        dropped: Vec<u8>,
    },
    /// An arpeggio had more notes than fit inside one grid unit
    ChordThinned {
        onset: u64,
        capacity: usize,
        dropped: Vec<u8>,
    },
    /// An off-scale pitch was moved onto a scale degree
    ChromaticSnap {
        source: usize,
        pitch: u8,
        snapped_to: u8,
    },
    /// A pitch outside the playable octaves was folded back into range
    OctaveClamp {
        source: usize,
        pitch: u8,
        clamped_to: u8,
    },
}

impl LossyDecision {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MergedRetrigger { .. } => "merged_retrigger",
            Self::ChordReduced { .. } => "chord_reduced",
            Self::ChordThinned { .. } => "chord_thinned",
            Self::ChromaticSnap { .. } => "chromatic_snap",
            Self::OctaveClamp { .. } => "octave_clamp",
        }
    }

    pub fn log(&self) {
        debug!(kind = self.kind(), "{}", self);
    }
}

fn pitch_list(pitches: &[u8]) -> String {
    pitches
        .iter()
        .map(|&p| pitch_name(p))
        .collect::<Vec<_>>()
        .join(" ")
}

impl fmt::Display for LossyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MergedRetrigger { pitch, onset, kept, merged } => write!(
                f,
                "merged {} (note #{}) into note #{} at tick {}",
                pitch_name(*pitch),
                merged,
                kept,
                onset
            ),
            Self::ChordReduced { onset, kept, dropped } => write!(
                f,
                "chord at tick {} reduced to {}, dropped [{}]",
                onset,
                pitch_name(*kept),
                pitch_list(dropped)
            ),
            Self::ChordThinned { onset, capacity, dropped } => write!(
                f,
                "chord at tick {} thinned to {} notes, dropped [{}]",
                onset,
                capacity,
                pitch_list(dropped)
            ),
            Self::ChromaticSnap { source, pitch, snapped_to } => write!(
                f,
                "note #{} {} snapped to {}",
                source,
                pitch_name(*pitch),
                pitch_name(*snapped_to)
            ),
            Self::OctaveClamp { source, pitch, clamped_to } => write!(
                f,
                "note #{} {} clamped to {}",
                source,
                pitch_name(*pitch),
                pitch_name(*clamped_to)
            ),
        }
    }
}
