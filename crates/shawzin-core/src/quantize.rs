//! Timing quantization onto a note-value grid

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::diagnostics::LossyDecision;
use crate::error::{Result, ShawzinError};
use crate::note::{NoteEvent, TimeBase};

const MAX_DIVISION: u16 = 128;

// ============================================================================
// Grid
// ============================================================================

/// Grid resolution as a fraction of a whole note (8 = eighth notes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GridDivision(u16);

impl Default for GridDivision {
    fn default() -> Self {
        Self(16)
    }
}

impl GridDivision {
    pub fn new(denominator: u16) -> Result<Self> {
        if denominator == 0 || denominator > MAX_DIVISION {
            return Err(ShawzinError::config(format!(
                "grid division 1/{} is out of range (1-{})",
                denominator, MAX_DIVISION
            )));
        }
        Ok(Self(denominator))
    }

    pub fn denominator(&self) -> u16 {
        self.0
    }

    /// Grid unit in ticks; the division must split a whole note evenly
    pub fn unit_ticks(&self, ticks_per_beat: u16) -> Result<u64> {
        let whole = ticks_per_beat as u64 * 4;
        let n = self.0 as u64;
        if whole % n != 0 || whole < n {
            return Err(ShawzinError::config(format!(
                "grid {} does not divide {} ticks per beat evenly",
                self, ticks_per_beat
            )));
        }
        Ok(whole / n)
    }
}

impl fmt::Display for GridDivision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "1/{}", self.0)
    }
}

impl FromStr for GridDivision {
    type Err = ShawzinError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let digits = s.strip_prefix("1/").unwrap_or(s);
        let n: u16 = digits
            .parse()
            .map_err(|_| ShawzinError::config(format!("invalid grid '{}', expected e.g. 1/16", s)))?;
        Self::new(n)
    }
}

impl TryFrom<String> for GridDivision {
    type Error = ShawzinError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<GridDivision> for String {
    fn from(grid: GridDivision) -> Self {
        grid.to_string()
    }
}

// ============================================================================
// Quantized notes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizedNote {
    pub pitch: u8,
    pub velocity: u8,
    /// Onset in ticks, a multiple of the grid unit
    pub onset: u64,
    /// Duration in ticks, a positive multiple of the grid unit
    pub duration: u64,
    /// Index of the originating NoteEvent
    pub source: usize,
}

impl QuantizedNote {
    pub fn end(&self) -> u64 {
        self.onset + self.duration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedTrack {
    pub grid: GridDivision,
    pub grid_ticks: u64,
    /// Sorted by onset; equal onsets keep input order
    pub notes: Vec<QuantizedNote>,
}

impl QuantizedTrack {
    /// Back to plain note events, e.g. to quantize a second time
    pub fn to_note_events(&self) -> Vec<NoteEvent> {
        self.notes
            .iter()
            .map(|n| NoteEvent {
                pitch: n.pitch,
                onset: n.onset,
                duration: n.duration,
                velocity: n.velocity,
                channel: 0,
            })
            .collect()
    }
}

// ============================================================================
// Quantizer
// ============================================================================

/// Round to the nearest multiple of `grid`; exact halves go to the earlier line
fn round_to_grid(ticks: u64, grid: u64) -> u64 {
    let q = ticks / grid;
    let r = ticks % grid;
    if r * 2 > grid {
        (q + 1) * grid
    } else {
        q * grid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Quantizer {
    pub grid: GridDivision,
    /// Onsets within this many ticks of a cluster's first onset count as simultaneous
    pub tolerance: u64,
}

impl Quantizer {
    pub fn new(grid: GridDivision) -> Self {
        Self { grid, tolerance: 0 }
    }

    pub fn with_tolerance(mut self, ticks: u64) -> Self {
        self.tolerance = ticks;
        self
    }

    /// Grid unit for this time base, checking the tolerance against it
    pub fn grid_ticks(&self, time_base: &TimeBase) -> Result<u64> {
        time_base.validate()?;
        let grid_ticks = self.grid.unit_ticks(time_base.ticks_per_beat)?;
        if self.tolerance * 2 >= grid_ticks {
            return Err(ShawzinError::config(format!(
                "simultaneity tolerance {} must be under half the grid unit ({} ticks)",
                self.tolerance, grid_ticks
            )));
        }
        Ok(grid_ticks)
    }

    pub fn quantize(
        &self,
        notes: &[NoteEvent],
        time_base: &TimeBase,
    ) -> Result<(QuantizedTrack, Vec<LossyDecision>)> {
        let grid_ticks = self.grid_ticks(time_base)?;

        let mut order: Vec<usize> = (0..notes.len()).collect();
        order.sort_by_key(|&i| notes[i].onset);

        let mut snapped = Vec::with_capacity(notes.len());
        let mut anchor: Option<u64> = None;
        for &idx in &order {
            let note = &notes[idx];
            let onset = match anchor {
                Some(a) if note.onset - a <= self.tolerance => a,
                _ => {
                    anchor = Some(note.onset);
                    note.onset
                }
            };
            let start = round_to_grid(onset, grid_ticks);
            let end = round_to_grid(note.end(), grid_ticks);
            snapped.push(QuantizedNote {
                pitch: note.pitch,
                velocity: note.velocity,
                onset: start,
                duration: end.saturating_sub(start).max(grid_ticks),
                source: idx,
            });
        }
        snapped.sort_by_key(|n| n.onset);

        let (notes, decisions) = merge_retriggers(snapped);
        Ok((
            QuantizedTrack {
                grid: self.grid,
                grid_ticks,
                notes,
            },
            decisions,
        ))
    }
}

/// Fold same-pitch notes that start together or sit inside an earlier note
fn merge_retriggers(snapped: Vec<QuantizedNote>) -> (Vec<QuantizedNote>, Vec<LossyDecision>) {
    let mut kept: Vec<QuantizedNote> = Vec::with_capacity(snapped.len());
    let mut decisions = Vec::new();
    // pitch -> (latest kept note, kept note reaching furthest)
    let mut by_pitch: HashMap<u8, (usize, usize)> = HashMap::new();

    for note in snapped {
        let target = by_pitch.get(&note.pitch).and_then(|&(latest, cover)| {
            if kept[latest].onset == note.onset {
                Some(latest)
            } else if note.end() <= kept[cover].end() {
                Some(cover)
            } else {
                None
            }
        });

        match target {
            Some(idx) => {
                let k = &mut kept[idx];
                k.duration = k.duration.max(note.duration);
                decisions.push(LossyDecision::MergedRetrigger {
                    pitch: note.pitch,
                    onset: note.onset,
                    kept: k.source,
                    merged: note.source,
                });
                if let Some(entry) = by_pitch.get_mut(&note.pitch) {
                    if kept[idx].end() > kept[entry.1].end() {
                        entry.1 = idx;
                    }
                }
            }
            None => {
                let idx = kept.len();
                let cover = match by_pitch.get(&note.pitch) {
                    Some(&(_, cover)) if kept[cover].end() >= note.end() => cover,
                    _ => idx,
                };
                by_pitch.insert(note.pitch, (idx, cover));
                kept.push(note);
            }
        }
    }
    (kept, decisions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: u8, onset: u64, duration: u64) -> NoteEvent {
        NoteEvent::new(pitch, onset, duration, 100).unwrap()
    }

    fn quarter() -> Quantizer {
        Quantizer::new(GridDivision::new(4).unwrap())
    }

    #[test]
    fn test_grid_parsing() {
        assert_eq!("1/8".parse::<GridDivision>().unwrap().denominator(), 8);
        assert_eq!("16".parse::<GridDivision>().unwrap().denominator(), 16);
        assert!("1/0".parse::<GridDivision>().is_err());
        assert!("eighth".parse::<GridDivision>().is_err());
        assert_eq!(GridDivision::new(8).unwrap().to_string(), "1/8");
    }

    #[test]
    fn test_grid_unit_must_divide() {
        assert_eq!(GridDivision::new(16).unwrap().unit_ticks(480).unwrap(), 120);
        assert!(GridDivision::new(7).unwrap().unit_ticks(480).is_err());
        assert!(GridDivision::new(128).unwrap().unit_ticks(24).is_err());
    }

    #[test]
    fn test_rounding_ties_go_earlier() {
        assert_eq!(round_to_grid(240, 480), 0);
        assert_eq!(round_to_grid(241, 480), 480);
        assert_eq!(round_to_grid(719, 480), 480);
        assert_eq!(round_to_grid(960, 480), 960);
    }

    #[test]
    fn test_quantize_snaps_and_clamps_duration() {
        let notes = vec![note(60, 10, 20), note(62, 470, 500)];
        let (track, decisions) = quarter().quantize(&notes, &TimeBase::default()).unwrap();
        assert!(decisions.is_empty());
        assert_eq!(track.grid_ticks, 480);
        assert_eq!((track.notes[0].onset, track.notes[0].duration), (0, 480));
        assert_eq!((track.notes[1].onset, track.notes[1].duration), (480, 480));
    }

    #[test]
    fn test_order_is_stable_for_equal_onsets() {
        let notes = vec![note(67, 0, 480), note(60, 5, 480), note(64, 0, 480)];
        let (track, _) = quarter().quantize(&notes, &TimeBase::default()).unwrap();
        let sources: Vec<usize> = track.notes.iter().map(|n| n.source).collect();
        assert_eq!(sources, vec![0, 2, 1]);
    }

    #[test]
    fn test_same_pitch_same_onset_merges() {
        let notes = vec![note(60, 0, 480), note(60, 30, 1400)];
        let (track, decisions) = quarter().quantize(&notes, &TimeBase::default()).unwrap();
        assert_eq!(track.notes.len(), 1);
        assert_eq!(track.notes[0].duration, 1440);
        assert_eq!(
            decisions,
            vec![LossyDecision::MergedRetrigger {
                pitch: 60,
                onset: 0,
                kept: 0,
                merged: 1,
            }]
        );
    }

    #[test]
    fn test_contained_note_is_absorbed() {
        let notes = vec![note(60, 0, 1920), note(60, 480, 480), note(60, 960, 1920)];
        let (track, decisions) = quarter().quantize(&notes, &TimeBase::default()).unwrap();
        assert_eq!(track.notes.len(), 2);
        assert_eq!(decisions.len(), 1);
        assert_eq!(track.notes[1].onset, 960);
    }

    #[test]
    fn test_tolerance_clusters_strummed_chord() {
        // 1/16 grid = 120 ticks; the strum crosses the 60-tick midpoint
        let notes = vec![note(60, 50, 400), note(64, 60, 400), note(67, 75, 400)];
        let sixteenth = Quantizer::new(GridDivision::new(16).unwrap());

        let (loose, _) = sixteenth.quantize(&notes, &TimeBase::default()).unwrap();
        let onsets: Vec<u64> = loose.notes.iter().map(|n| n.onset).collect();
        assert_eq!(onsets, vec![0, 0, 120]);

        let (tight, _) = sixteenth
            .with_tolerance(30)
            .quantize(&notes, &TimeBase::default())
            .unwrap();
        assert!(tight.notes.iter().all(|n| n.onset == 0));
    }

    #[test]
    fn test_tolerance_must_be_below_half_grid() {
        let q = quarter().with_tolerance(240);
        assert!(q.quantize(&[note(60, 0, 10)], &TimeBase::default()).is_err());
    }

    #[test]
    fn test_quantize_is_idempotent() {
        let notes = vec![
            note(60, 3, 200),
            note(64, 250, 90),
            note(64, 260, 700),
            note(67, 700, 1000),
            note(72, 1190, 15),
            note(60, 1200, 333),
        ];
        let q = Quantizer::new(GridDivision::new(8).unwrap()).with_tolerance(20);
        let tb = TimeBase::default();
        let (first, _) = q.quantize(&notes, &tb).unwrap();
        let (second, decisions) = q.quantize(&first.to_note_events(), &tb).unwrap();
        assert!(decisions.is_empty());

        let strip = |t: &QuantizedTrack| -> Vec<(u8, u64, u64)> {
            t.notes.iter().map(|n| (n.pitch, n.onset, n.duration)).collect()
        };
        assert_eq!(strip(&first), strip(&second));
    }
}
