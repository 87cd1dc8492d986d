//! Chord resolution: one voice per onset, by arpeggio or melody reduction

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::diagnostics::LossyDecision;
use crate::error::{Result, ShawzinError};
use crate::key_detect::KeyProfile;
use crate::note::TimeBase;
use crate::quantize::{QuantizedNote, QuantizedTrack};
use crate::tables::{ChordShape, ChordTable};

// ============================================================================
// Policy
// ============================================================================

/// Order in which arpeggiated chord members are played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArpOrder {
    #[default]
    Ascending,
    Descending,
    AsPlayed,
}

impl FromStr for ArpOrder {
    type Err = ShawzinError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "ascending" => Ok(Self::Ascending),
            "down" | "descending" => Ok(Self::Descending),
            "played" | "as-played" | "order" => Ok(Self::AsPlayed),
            other => Err(ShawzinError::config(format!(
                "unknown arpeggio order '{}' (up, down, played)",
                other
            ))),
        }
    }
}

impl fmt::Display for ArpOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ascending => "ascending",
            Self::Descending => "descending",
            Self::AsPlayed => "as-played",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChordMode {
    /// Keep the highest note of every chord
    #[default]
    Melody,
    /// Spread chord members across one grid unit
    Arpeggiate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChordPolicy {
    pub mode: ChordMode,
    pub order: ArpOrder,
}

impl ChordPolicy {
    pub fn arpeggiate(order: ArpOrder) -> Self {
        Self {
            mode: ChordMode::Arpeggiate,
            order,
        }
    }
}

// ============================================================================
// Chords and resolved events
// ============================================================================

/// Notes sharing one quantized onset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chord {
    pub onset: u64,
    /// Members in track order
    pub notes: Vec<QuantizedNote>,
    /// Name of the matching chord-table shape
    pub shape: Option<String>,
    /// Root pitch class of the matched shape
    pub root: Option<u8>,
}

impl Chord {
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

/// A single voice on the resolved timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEvent {
    pub pitch: u8,
    pub onset: u64,
    pub duration: u64,
    pub source: usize,
    /// Whole chord played as one table symbol
    pub chord_symbol: Option<char>,
}

impl ResolvedEvent {
    fn from_note(note: &QuantizedNote, onset: u64, duration: u64) -> Self {
        Self {
            pitch: note.pitch,
            onset,
            duration,
            source: note.source,
            chord_symbol: None,
        }
    }
}

/// Group a quantized track into chords by exact onset
pub fn group_chords(track: &QuantizedTrack, table: &ChordTable) -> Vec<Chord> {
    let mut chords: Vec<Chord> = Vec::new();
    for note in &track.notes {
        match chords.last_mut() {
            Some(chord) if chord.onset == note.onset => chord.notes.push(*note),
            _ => chords.push(Chord {
                onset: note.onset,
                notes: vec![*note],
                shape: None,
                root: None,
            }),
        }
    }
    for chord in &mut chords {
        if chord.len() > 1 {
            let pitches: Vec<u8> = chord.notes.iter().map(|n| n.pitch).collect();
            if let Some((shape, root)) = table.identify(&pitches) {
                chord.shape = Some(shape.name.clone());
                chord.root = Some(root);
            }
        }
    }
    chords
}

// ============================================================================
// Resolver
// ============================================================================

pub struct ChordResolver<'a> {
    pub policy: ChordPolicy,
    pub key: &'a KeyProfile,
    pub table: &'a ChordTable,
    pub time_base: &'a TimeBase,
}

impl<'a> ChordResolver<'a> {
    pub fn new(
        policy: ChordPolicy,
        key: &'a KeyProfile,
        table: &'a ChordTable,
        time_base: &'a TimeBase,
    ) -> Self {
        Self {
            policy,
            key,
            table,
            time_base,
        }
    }

    /// Most notes an arpeggio can hold inside one grid unit
    pub fn capacity(&self, grid_ticks: u64) -> usize {
        let spacing = self.time_base.min_code_unit_ticks();
        ((grid_ticks / spacing) as usize).max(1)
    }

    pub fn resolve(&self, track: &QuantizedTrack) -> (Vec<ResolvedEvent>, Vec<LossyDecision>) {
        let mut events = Vec::with_capacity(track.notes.len());
        let mut decisions = Vec::new();

        for chord in group_chords(track, self.table) {
            if chord.len() == 1 {
                let note = &chord.notes[0];
                events.push(ResolvedEvent::from_note(note, note.onset, note.duration));
                continue;
            }

            let shape = chord.shape.as_deref().and_then(|name| self.find_shape(name));
            if let Some(symbol) = shape.and_then(|s| s.symbol) {
                events.push(self.symbol_event(&chord, symbol));
                continue;
            }

            match self.policy.mode {
                ChordMode::Melody => {
                    self.reduce_to_melody(&chord, &mut events, &mut decisions);
                }
                ChordMode::Arpeggiate => {
                    let order = shape.and_then(|s| s.arpeggio).unwrap_or(self.policy.order);
                    self.arpeggiate(&chord, order, track.grid_ticks, &mut events, &mut decisions);
                }
            }
        }
        (events, decisions)
    }

    fn find_shape(&self, name: &str) -> Option<&'a ChordShape> {
        self.table.chords.iter().find(|s| s.name == name)
    }

    fn symbol_event(&self, chord: &Chord, symbol: char) -> ResolvedEvent {
        let lowest = chord.notes.iter().min_by_key(|n| n.pitch).unwrap_or(&chord.notes[0]);
        let duration = chord.notes.iter().map(|n| n.duration).max().unwrap_or(lowest.duration);
        ResolvedEvent {
            chord_symbol: Some(symbol),
            ..ResolvedEvent::from_note(lowest, chord.onset, duration)
        }
    }

    fn reduce_to_melody(
        &self,
        chord: &Chord,
        events: &mut Vec<ResolvedEvent>,
        decisions: &mut Vec<LossyDecision>,
    ) {
        let top = chord.notes.iter().max_by_key(|n| n.pitch).unwrap_or(&chord.notes[0]);
        events.push(ResolvedEvent::from_note(top, chord.onset, top.duration));
        decisions.push(LossyDecision::ChordReduced {
            onset: chord.onset,
            kept: top.pitch,
            dropped: chord
                .notes
                .iter()
                .filter(|n| n.source != top.source)
                .map(|n| n.pitch)
                .collect(),
        });
    }

    fn arpeggiate(
        &self,
        chord: &Chord,
        order: ArpOrder,
        grid_ticks: u64,
        events: &mut Vec<ResolvedEvent>,
        decisions: &mut Vec<LossyDecision>,
    ) {
        let capacity = self.capacity(grid_ticks);
        let (mut kept, dropped) = self.thin(&chord.notes, capacity);
        if !dropped.is_empty() {
            decisions.push(LossyDecision::ChordThinned {
                onset: chord.onset,
                capacity,
                dropped,
            });
        }

        match order {
            ArpOrder::Ascending => kept.sort_by_key(|n| n.pitch),
            ArpOrder::Descending => kept.sort_by_key(|n| std::cmp::Reverse(n.pitch)),
            ArpOrder::AsPlayed => {}
        }

        let spacing = grid_ticks / kept.len() as u64;
        for (i, note) in kept.iter().enumerate() {
            events.push(ResolvedEvent::from_note(
                note,
                chord.onset + i as u64 * spacing,
                note.duration.min(spacing),
            ));
        }
    }

    /// Keep at most `capacity` members. Bass and melody stay; middle notes go
    /// off-scale first, then nearest the centre of the pitch order.
    fn thin(&self, notes: &[QuantizedNote], capacity: usize) -> (Vec<QuantizedNote>, Vec<u8>) {
        if notes.len() <= capacity {
            return (notes.to_vec(), Vec::new());
        }

        let mut by_pitch: Vec<usize> = (0..notes.len()).collect();
        by_pitch.sort_by_key(|&i| notes[i].pitch);
        let last = by_pitch.len() - 1;

        let mut keep: Vec<usize> = if capacity == 1 {
            vec![by_pitch[last]]
        } else {
            let centre = last as f64 / 2.0;
            let mut middle: Vec<usize> = (1..last).collect();
            middle.sort_by(|&a, &b| {
                let in_scale = |rank: usize| self.key.contains_pitch(notes[by_pitch[rank]].pitch);
                in_scale(a)
                    .cmp(&in_scale(b))
                    .then_with(|| {
                        let da = (a as f64 - centre).abs();
                        let db = (b as f64 - centre).abs();
                        da.total_cmp(&db)
                    })
                    .then_with(|| b.cmp(&a))
            });
            let drop_count = notes.len() - capacity;
            let dropped_ranks = &middle[..drop_count];
            (0..=last)
                .filter(|rank| !dropped_ranks.contains(rank))
                .map(|rank| by_pitch[rank])
                .collect()
        };

        keep.sort_unstable();
        let kept = keep.iter().map(|&i| notes[i]).collect();
        let mut dropped: Vec<u8> = (0..notes.len())
            .filter(|i| !keep.contains(i))
            .map(|i| notes[i].pitch)
            .collect();
        dropped.sort_unstable();
        (kept, dropped)
    }
}

/// Resolve chords with a one-off resolver
pub fn resolve_chords(
    track: &QuantizedTrack,
    key: &KeyProfile,
    table: &ChordTable,
    time_base: &TimeBase,
    policy: ChordPolicy,
) -> (Vec<ResolvedEvent>, Vec<LossyDecision>) {
    ChordResolver::new(policy, key, table, time_base).resolve(track)
}
