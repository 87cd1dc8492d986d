//! Scale-degree mapping from resolved pitches to Shawzin symbols

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::chord::ResolvedEvent;
use crate::diagnostics::LossyDecision;
use crate::error::{Result, ShawzinError};
use crate::key_detect::KeyProfile;
use crate::note::pitch_name;
use crate::pattern::PatternElement;
use crate::tables::{ScaleDef, ScaleTable};

// ============================================================================
// Policies
// ============================================================================

/// Where an off-scale pitch goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChromaticPolicy {
    /// Nearest degree, ties to the lower one
    #[default]
    SnapFlat,
    /// Nearest degree, ties to the upper one
    SnapSharp,
}

/// Where the lowest playable tonic sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OctavePlacement {
    /// The octave whose playable span holds the most notes
    #[default]
    Auto,
    /// Tonic pinned at this MIDI octave (4 = the octave of middle C)
    Fixed(i8),
}

/// What happens to pitches outside the playable octaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RangePolicy {
    #[default]
    Clamp,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingPolicy {
    pub chromatic: ChromaticPolicy,
    pub octave: OctavePlacement,
    pub range: RangePolicy,
}

// ============================================================================
// Symbol events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolEvent {
    pub symbol: char,
    pub onset: u64,
    pub duration: u64,
    pub source: usize,
    /// Pitch before mapping
    pub source_pitch: u8,
    /// Pitch the instrument plays for `symbol`
    pub mapped_pitch: u8,
    /// Index into the scale's symbol list; None for chord symbols
    pub slot: Option<usize>,
}

impl PatternElement for SymbolEvent {
    type Key = char;

    fn key(&self) -> char {
        self.symbol
    }

    fn onset(&self) -> u64 {
        self.onset
    }

    fn duration(&self) -> u64 {
        self.duration
    }
}

// ============================================================================
// Mapper
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Placement {
    slot: usize,
    mapped_pitch: u8,
    snapped_to: Option<u8>,
    clamped: bool,
}

pub struct DegreeMapper<'a> {
    scale: &'a ScaleDef,
    policy: MappingPolicy,
    /// MIDI pitch of the lowest playable tonic
    base: i32,
}

impl<'a> DegreeMapper<'a> {
    /// Build a mapper for `key`, placing the octave from `events` when automatic
    pub fn new(
        key: &KeyProfile,
        scales: &'a ScaleTable,
        policy: MappingPolicy,
        events: &[ResolvedEvent],
    ) -> Result<Self> {
        let scale = scales.by_id(key.scale_id).ok_or_else(|| {
            ShawzinError::config(format!("key {} uses unknown scale id {}", key, key.scale_id))
        })?;
        let base = match policy.octave {
            OctavePlacement::Fixed(octave) => {
                if !(-1..=9).contains(&octave) {
                    return Err(ShawzinError::config(format!(
                        "base octave {} is outside MIDI octaves -1 to 9",
                        octave
                    )));
                }
                let tonic = tonic_pitch(key.root, octave);
                if tonic > 127 {
                    return Err(ShawzinError::config(format!(
                        "base octave {} puts the {} tonic above MIDI pitch 127",
                        octave,
                        key.root_name()
                    )));
                }
                tonic
            }
            OctavePlacement::Auto => auto_base(key.root, scale.octaves(), events),
        };
        Ok(Self {
            scale,
            policy,
            base,
        })
    }

    pub fn base_pitch(&self) -> i32 {
        self.base
    }

    fn place(&self, pitch: u8) -> Result<Placement> {
        let intervals = &self.scale.intervals;
        let degrees = intervals.len();
        let rel = pitch as i32 - self.base;
        let mut octave = rel.div_euclid(12);
        let pc = rel.rem_euclid(12) as u8;

        let mut snapped_to = None;
        let degree = match intervals.iter().position(|&i| i == pc) {
            Some(degree) => degree,
            None => {
                let below = intervals.iter().rposition(|&i| i < pc).unwrap_or(0);
                let above = intervals.iter().position(|&i| i > pc);
                let down = pc - intervals[below];
                let up = above.map_or(12 - pc, |a| intervals[a] - pc);
                let go_up = match self.policy.chromatic {
                    ChromaticPolicy::SnapFlat => up < down,
                    ChromaticPolicy::SnapSharp => up <= down,
                };
                let degree = match (go_up, above) {
                    (true, Some(a)) => a,
                    (true, None) => {
                        octave += 1;
                        0
                    }
                    (false, _) => below,
                };
                snapped_to = Some(self.pitch_at(octave, degree));
                degree
            }
        };

        let octaves = self.scale.octaves() as i32;
        let mut clamped = false;
        if !(0..octaves).contains(&octave) {
            if self.policy.range == RangePolicy::Strict {
                return Err(ShawzinError::UnsupportedRange(format!(
                    "{} lies outside the {} playable octave(s) above {}",
                    pitch_name(pitch),
                    octaves,
                    pitch_name(self.base.clamp(0, 127) as u8)
                )));
            }
            octave = octave.clamp(0, octaves - 1);
            clamped = true;
        }

        Ok(Placement {
            slot: octave as usize * degrees + degree,
            mapped_pitch: self.pitch_at(octave, degree),
            snapped_to,
            clamped,
        })
    }

    fn pitch_at(&self, octave: i32, degree: usize) -> u8 {
        (self.base + octave * 12 + self.scale.intervals[degree] as i32).clamp(0, 127) as u8
    }

    pub fn map(&self, events: &[ResolvedEvent]) -> Result<(Vec<SymbolEvent>, Vec<LossyDecision>)> {
        let mut cache: HashMap<u8, Placement> = HashMap::new();
        let mut symbols = Vec::with_capacity(events.len());
        let mut decisions = Vec::new();

        for event in events {
            if let Some(symbol) = event.chord_symbol {
                symbols.push(SymbolEvent {
                    symbol,
                    onset: event.onset,
                    duration: event.duration,
                    source: event.source,
                    source_pitch: event.pitch,
                    mapped_pitch: event.pitch,
                    slot: None,
                });
                continue;
            }

            let placement = match cache.get(&event.pitch) {
                Some(p) => *p,
                None => {
                    let p = self.place(event.pitch)?;
                    cache.insert(event.pitch, p);
                    p
                }
            };

            if let Some(snapped_to) = placement.snapped_to {
                decisions.push(LossyDecision::ChromaticSnap {
                    source: event.source,
                    pitch: event.pitch,
                    snapped_to,
                });
            }
            if placement.clamped {
                decisions.push(LossyDecision::OctaveClamp {
                    source: event.source,
                    pitch: event.pitch,
                    clamped_to: placement.mapped_pitch,
                });
            }

            symbols.push(SymbolEvent {
                symbol: self.scale.symbols[placement.slot],
                onset: event.onset,
                duration: event.duration,
                source: event.source,
                source_pitch: event.pitch,
                mapped_pitch: placement.mapped_pitch,
                slot: Some(placement.slot),
            });
        }
        Ok((symbols, decisions))
    }
}

fn tonic_pitch(root: u8, octave: i8) -> i32 {
    root as i32 + 12 * (octave as i32 + 1)
}

/// Tonic whose playable span covers the most notes; ties go to the tonic
/// nearest the lowest note, then the lower tonic
fn auto_base(root: u8, octaves: usize, events: &[ResolvedEvent]) -> i32 {
    let pitches: Vec<i32> = events
        .iter()
        .filter(|e| e.chord_symbol.is_none())
        .map(|e| e.pitch as i32)
        .collect();
    let Some(&lowest) = pitches.iter().min() else {
        return tonic_pitch(root, 4);
    };
    let span = 12 * octaves.max(1) as i32;

    (-1..=9i8)
        .map(|octave| tonic_pitch(root, octave))
        .filter(|&base| base <= 127)
        .max_by(|&a, &b| {
            let covered = |base: i32| pitches.iter().filter(|&&p| p >= base && p < base + span).count();
            covered(a)
                .cmp(&covered(b))
                .then_with(|| (b - lowest).abs().cmp(&(a - lowest).abs()))
                .then_with(|| b.cmp(&a))
        })
        .unwrap_or_else(|| tonic_pitch(root, 4))
}

/// Map resolved events to symbols in one call
pub fn map_degrees(
    events: &[ResolvedEvent],
    key: &KeyProfile,
    scales: &ScaleTable,
    policy: MappingPolicy,
) -> Result<(Vec<SymbolEvent>, Vec<LossyDecision>)> {
    DegreeMapper::new(key, scales, policy, events)?.map(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_detect::parse_key;

    fn ev(pitch: u8, onset: u64) -> ResolvedEvent {
        ResolvedEvent {
            pitch,
            onset,
            duration: 120,
            source: onset as usize,
            chord_symbol: None,
        }
    }

    fn key(name: &str) -> KeyProfile {
        parse_key(name, ScaleTable::builtin()).unwrap()
    }

    fn fixed(octave: i8) -> MappingPolicy {
        MappingPolicy {
            octave: OctavePlacement::Fixed(octave),
            ..Default::default()
        }
    }

    #[test]
    fn test_in_scale_degrees() {
        let events: Vec<ResolvedEvent> = [60, 62, 64, 65, 67, 69, 71, 72]
            .iter()
            .enumerate()
            .map(|(i, &p)| ev(p, i as u64))
            .collect();
        let (symbols, decisions) =
            map_degrees(&events, &key("C major"), ScaleTable::builtin(), fixed(4)).unwrap();
        assert!(decisions.is_empty());
        let text: String = symbols.iter().map(|s| s.symbol).collect();
        assert_eq!(text, "BCEJKMRS");
        assert_eq!(symbols[7].slot, Some(7));
        assert_eq!(symbols[7].mapped_pitch, 72);
    }

    #[test]
    fn test_chromatic_snaps_flat_by_default() {
        let table = ScaleTable::builtin();
        let c_major = key("C major");
        let (d, _) = map_degrees(&[ev(62, 0)], &c_major, table, MappingPolicy::default()).unwrap();
        for _ in 0..3 {
            let (d_sharp, decisions) =
                map_degrees(&[ev(63, 0)], &c_major, table, MappingPolicy::default()).unwrap();
            assert_eq!(d_sharp[0].symbol, d[0].symbol);
            assert_eq!(
                decisions,
                vec![LossyDecision::ChromaticSnap {
                    source: 0,
                    pitch: 63,
                    snapped_to: 62,
                }]
            );
        }
    }

    #[test]
    fn test_snap_sharp_goes_up() {
        let policy = MappingPolicy {
            chromatic: ChromaticPolicy::SnapSharp,
            ..fixed(4)
        };
        let (symbols, _) =
            map_degrees(&[ev(63, 0)], &key("C major"), ScaleTable::builtin(), policy).unwrap();
        assert_eq!(symbols[0].mapped_pitch, 64);
        assert_eq!(symbols[0].symbol, 'E');
    }

    #[test]
    fn test_snap_above_last_degree_wraps_to_tonic() {
        let policy = MappingPolicy {
            chromatic: ChromaticPolicy::SnapSharp,
            ..fixed(4)
        };
        let (symbols, _) = map_degrees(
            &[ev(71, 0)],
            &key("C pentatonic-minor"),
            ScaleTable::builtin(),
            policy,
        )
        .unwrap();
        assert_eq!(symbols[0].mapped_pitch, 72);
        assert_eq!(symbols[0].slot, Some(5));
        assert_eq!(symbols[0].symbol, 'M');
    }

    #[test]
    fn test_out_of_range_clamps() {
        let (symbols, decisions) = map_degrees(
            &[ev(48, 0), ev(96, 1)],
            &key("C major"),
            ScaleTable::builtin(),
            fixed(4),
        )
        .unwrap();
        assert_eq!((symbols[0].symbol, symbols[0].mapped_pitch), ('B', 60));
        assert_eq!((symbols[1].symbol, symbols[1].mapped_pitch), ('S', 72));
        assert!(decisions.iter().all(|d| matches!(d, LossyDecision::OctaveClamp { .. })));
        assert_eq!(decisions.len(), 2);
    }

    #[test]
    fn test_strict_range_fails() {
        let policy = MappingPolicy {
            range: RangePolicy::Strict,
            ..fixed(4)
        };
        let result = map_degrees(&[ev(96, 0)], &key("C major"), ScaleTable::builtin(), policy);
        assert!(matches!(result, Err(ShawzinError::UnsupportedRange(_))));
    }

    #[test]
    fn test_auto_octave_covers_most_notes() {
        let events: Vec<ResolvedEvent> = [50, 52, 53, 55, 57, 59, 60, 62]
            .iter()
            .enumerate()
            .map(|(i, &p)| ev(p, i as u64))
            .collect();
        let table = ScaleTable::builtin();
        let mapper = DegreeMapper::new(&key("C major"), table, MappingPolicy::default(), &events).unwrap();
        assert_eq!(mapper.base_pitch(), 48);
        let (_, decisions) = mapper.map(&events).unwrap();
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_chord_symbol_passes_through() {
        let event = ResolvedEvent {
            chord_symbol: Some('Z'),
            ..ev(48, 0)
        };
        let (symbols, decisions) =
            map_degrees(&[event], &key("C major"), ScaleTable::builtin(), fixed(4)).unwrap();
        assert!(decisions.is_empty());
        assert_eq!(symbols[0].symbol, 'Z');
        assert_eq!(symbols[0].slot, None);
    }

    #[test]
    fn test_fixed_octave_validated() {
        let result = DegreeMapper::new(&key("C major"), ScaleTable::builtin(), fixed(12), &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_fixed_octave_tonic_stays_in_midi_range() {
        // C9 is pitch 120, B9 would be 131
        assert!(DegreeMapper::new(&key("C major"), ScaleTable::builtin(), fixed(9), &[]).is_ok());
        match DegreeMapper::new(&key("B major"), ScaleTable::builtin(), fixed(9), &[]) {
            Err(err @ ShawzinError::InvalidConfiguration(_)) => {
                assert!(err.to_string().contains("above MIDI pitch 127"))
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("B9 tonic accepted"),
        }
    }
}
