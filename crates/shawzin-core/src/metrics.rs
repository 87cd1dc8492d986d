//! Conversion quality metrics

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chord::ChordMode;
use crate::mapper::SymbolEvent;
use crate::note::{NoteEvent, TimeBase};

/// How far the playable output strays from the input notes
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConversionMetrics {
    pub total_notes: usize,
    /// Input notes that reached the output
    pub mapped_notes: usize,
    pub dropped_notes: usize,
    /// mapped / total (0.0-1.0)
    pub mapped_ratio: f64,
    /// Average absolute semitone difference between input and played pitch
    pub avg_pitch_error: f64,
    pub max_pitch_error: u8,
    /// Root-mean-square onset difference in beats
    pub timing_rms: f64,
}

impl ConversionMetrics {
    /// Compare output events with the notes they came from (matched by `source`)
    pub fn compute(notes: &[NoteEvent], events: &[SymbolEvent], time_base: &TimeBase) -> Self {
        let total_notes = notes.len();
        if total_notes == 0 {
            return Self::default();
        }

        let mut sources = HashSet::new();
        let mut pitch_errors = Vec::with_capacity(events.len());
        let mut timing_sq = 0.0;

        for event in events {
            let Some(original) = notes.get(event.source) else {
                continue;
            };
            sources.insert(event.source);
            pitch_errors.push(event.mapped_pitch.abs_diff(original.pitch));
            let drift = time_base.ticks_to_beats(event.onset) - time_base.ticks_to_beats(original.onset);
            timing_sq += drift * drift;
        }

        let mapped_notes = sources.len();
        let matched = pitch_errors.len();
        Self {
            total_notes,
            mapped_notes,
            dropped_notes: total_notes - mapped_notes,
            mapped_ratio: mapped_notes as f64 / total_notes as f64,
            avg_pitch_error: if matched == 0 {
                0.0
            } else {
                pitch_errors.iter().map(|&e| e as f64).sum::<f64>() / matched as f64
            },
            max_pitch_error: pitch_errors.iter().copied().max().unwrap_or(0),
            timing_rms: if matched == 0 {
                0.0
            } else {
                (timing_sq / matched as f64).sqrt()
            },
        }
    }

    /// 0-10 score: mapped ratio 40%, pitch accuracy 40%, timing 20%.
    /// Arpeggiated conversions are held to a slightly lower ratio target.
    pub fn quality_score(&self, mode: ChordMode) -> f64 {
        let target = match mode {
            ChordMode::Melody => 0.95,
            ChordMode::Arpeggiate => 0.90,
        };
        let ratio_score = (self.mapped_ratio / target * 10.0).min(10.0);
        let pitch_score = (10.0 - self.avg_pitch_error * 5.0).max(0.0);
        let timing_score = (10.0 - self.timing_rms * 20.0).max(0.0);
        (ratio_score * 0.4 + pitch_score * 0.4 + timing_score * 0.2).clamp(0.0, 10.0)
    }

    /// Hints for settings that would likely improve the result
    pub fn suggestions(&self) -> Vec<&'static str> {
        let mut hints = Vec::new();
        if self.mapped_ratio < 0.8 {
            hints.push("many notes were dropped; try arpeggiation or a finer grid");
        }
        if self.avg_pitch_error > 2.0 {
            hints.push("large pitch errors; try another key or the chromatic scale");
        }
        if self.timing_rms > 0.5 {
            hints.push("poor timing accuracy; try a finer quantization grid");
        }
        hints
    }
}

impl fmt::Display for ConversionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} notes mapped ({:.1}%), pitch error avg {:.2} max {} st, timing RMS {:.3} beats",
            self.mapped_notes,
            self.total_notes,
            self.mapped_ratio * 100.0,
            self.avg_pitch_error,
            self.max_pitch_error,
            self.timing_rms
        )
    }
}
