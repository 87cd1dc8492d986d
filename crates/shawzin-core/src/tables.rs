//! Scale and chord tables (instrument data, validated before use)

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::chord::ArpOrder;
use crate::error::{Result, ShawzinError};

// ============================================================================
// Instrument alphabet
// ============================================================================

/// Base-64 alphabet shared by Shawzin note symbols and time tokens
pub const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Single-note symbols in ascending pitch order: strings 1-3 with no fret,
/// sky, earth, water, then the sky+earth and sky+water combinations.
pub const SHAWZIN_NOTE_SYMBOLS: [char; 16] = [
    'B', 'C', 'E', 'J', 'K', 'M', 'R', 'S', 'U', 'h', 'i', 'k', 'Z', 'a', 'c', 'p',
];

pub fn is_base64_char(c: char) -> bool {
    c.is_ascii() && BASE64_ALPHABET.contains(&(c as u8))
}

/// Lowercase, with spaces and underscores folded to dashes
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '_' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

fn canonical_mode_name(name: &str) -> String {
    let name = normalize_name(name);
    match name.as_str() {
        "ionian" | "heptatonic" => "major".to_string(),
        "aeolian" | "natural-minor" => "minor".to_string(),
        "pentatonic" | "minor-pentatonic" => "pentatonic-minor".to_string(),
        "major-pentatonic" | "pentatonic-major" => "yo".to_string(),
        "wholetone" => "whole-tone".to_string(),
        _ => name,
    }
}

// ============================================================================
// Scales
// ============================================================================

/// One Shawzin scale: intervals plus the symbols for each (degree, octave) slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleDef {
    /// Shawzin scale number written as the string header (1-9)
    pub id: u8,
    pub name: String,
    /// Semitones from the root, starting at 0
    pub intervals: Vec<u8>,
    /// Symbols from the lowest slot to the highest
    pub symbols: Vec<char>,
}

impl ScaleDef {
    fn with_default_symbols(id: u8, name: &str, intervals: &[u8], octaves: usize) -> Self {
        let slots = (intervals.len() * octaves).min(SHAWZIN_NOTE_SYMBOLS.len());
        Self {
            id,
            name: name.to_string(),
            intervals: intervals.to_vec(),
            symbols: SHAWZIN_NOTE_SYMBOLS[..slots].to_vec(),
        }
    }

    pub fn degree_count(&self) -> usize {
        self.intervals.len()
    }

    /// Number of whole octaves the symbol list spans
    pub fn octaves(&self) -> usize {
        self.symbols.len() / self.intervals.len().max(1)
    }

    pub fn contains_pitch_class(&self, root: u8, pitch_class: u8) -> bool {
        let rel = (pitch_class + 12 - root % 12) % 12;
        self.intervals.contains(&rel)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=9).contains(&self.id) {
            return Err(ShawzinError::config(format!(
                "scale '{}' has id {}, expected 1-9",
                self.name, self.id
            )));
        }
        validate_intervals(&self.name, &self.intervals, 1)?;
        if self.intervals.iter().any(|&i| i >= 12) {
            return Err(ShawzinError::config(format!(
                "scale '{}' intervals must stay within one octave",
                self.name
            )));
        }
        if self.symbols.is_empty() || self.symbols.len() % self.intervals.len() != 0 {
            return Err(ShawzinError::config(format!(
                "scale '{}' needs a whole number of octaves of symbols ({} degrees, {} symbols)",
                self.name,
                self.intervals.len(),
                self.symbols.len()
            )));
        }
        let mut seen = HashSet::new();
        for &symbol in &self.symbols {
            if !is_base64_char(symbol) {
                return Err(ShawzinError::config(format!(
                    "scale '{}' uses '{}', which is not a Shawzin symbol",
                    self.name, symbol
                )));
            }
            if !seen.insert(symbol) {
                return Err(ShawzinError::config(format!(
                    "scale '{}' repeats symbol '{}'",
                    self.name, symbol
                )));
            }
        }
        Ok(())
    }
}

fn validate_intervals(owner: &str, intervals: &[u8], min_len: usize) -> Result<()> {
    if intervals.len() < min_len {
        return Err(ShawzinError::config(format!(
            "'{}' needs at least {} interval(s)",
            owner, min_len
        )));
    }
    if intervals[0] != 0 {
        return Err(ShawzinError::config(format!(
            "'{}' intervals must start at 0",
            owner
        )));
    }
    if intervals.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ShawzinError::config(format!(
            "'{}' intervals must be strictly increasing",
            owner
        )));
    }
    Ok(())
}

/// Ordered set of scales the key detector and mapper may choose from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleTable {
    pub scales: Vec<ScaleDef>,
}

static DEFAULT_SCALES: LazyLock<ScaleTable> = LazyLock::new(|| ScaleTable {
    scales: vec![
        ScaleDef::with_default_symbols(1, "pentatonic-minor", &[0, 3, 5, 7, 10], 2),
        ScaleDef::with_default_symbols(2, "major", &[0, 2, 4, 5, 7, 9, 11], 2),
        ScaleDef::with_default_symbols(3, "chromatic", &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11], 1),
        ScaleDef::with_default_symbols(4, "minor", &[0, 2, 3, 5, 7, 8, 10], 2),
        ScaleDef::with_default_symbols(5, "dorian", &[0, 2, 3, 5, 7, 9, 10], 2),
        ScaleDef::with_default_symbols(6, "phrygian", &[0, 1, 3, 5, 7, 8, 10], 2),
        ScaleDef::with_default_symbols(7, "yo", &[0, 2, 4, 7, 9], 2),
        ScaleDef::with_default_symbols(8, "ritusen", &[0, 2, 5, 7, 9], 2),
        ScaleDef::with_default_symbols(9, "whole-tone", &[0, 2, 4, 6, 8, 10], 2),
    ],
});

impl Default for ScaleTable {
    fn default() -> Self {
        DEFAULT_SCALES.clone()
    }
}

impl ScaleTable {
    /// The built-in Shawzin scales, initialised once and never mutated
    pub fn builtin() -> &'static ScaleTable {
        &DEFAULT_SCALES
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let table: ScaleTable = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scales.is_empty() {
            return Err(ShawzinError::config("scale table is empty"));
        }
        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for scale in &self.scales {
            scale.validate()?;
            if !names.insert(canonical_mode_name(&scale.name)) {
                return Err(ShawzinError::config(format!(
                    "duplicate scale name '{}'",
                    scale.name
                )));
            }
            if !ids.insert(scale.id) {
                return Err(ShawzinError::config(format!("duplicate scale id {}", scale.id)));
            }
        }
        Ok(())
    }

    /// Look up a mode by name (case-insensitive, common aliases accepted)
    pub fn find(&self, name: &str) -> Option<&ScaleDef> {
        let wanted = canonical_mode_name(name);
        self.scales
            .iter()
            .find(|s| canonical_mode_name(&s.name) == wanted)
    }

    pub fn by_id(&self, id: u8) -> Option<&ScaleDef> {
        self.scales.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScaleDef> {
        self.scales.iter()
    }

    pub fn len(&self) -> usize {
        self.scales.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scales.is_empty()
    }
}

// ============================================================================
// Chords
// ============================================================================

/// A named chord shape with optional arpeggio order or direct symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordShape {
    pub name: String,
    /// Semitones from the chord root, starting at 0
    pub intervals: Vec<u8>,
    /// Overrides the configured arpeggio order for this shape
    #[serde(default)]
    pub arpeggio: Option<ArpOrder>,
    /// Plays the whole chord as this single symbol
    #[serde(default)]
    pub symbol: Option<char>,
}

impl ChordShape {
    fn new(name: &str, intervals: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            intervals: intervals.to_vec(),
            arpeggio: None,
            symbol: None,
        }
    }

    /// Sorted pitch-class set of this shape rooted at `root`
    pub fn pitch_classes(&self, root: u8) -> Vec<u8> {
        let mut pcs: Vec<u8> = self
            .intervals
            .iter()
            .map(|&i| (root as u16 + i as u16) as u8 % 12)
            .collect();
        pcs.sort_unstable();
        pcs.dedup();
        pcs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordTable {
    pub chords: Vec<ChordShape>,
}

static DEFAULT_CHORDS: LazyLock<ChordTable> = LazyLock::new(|| ChordTable {
    chords: vec![
        ChordShape::new("major", &[0, 4, 7]),
        ChordShape::new("minor", &[0, 3, 7]),
        ChordShape::new("diminished", &[0, 3, 6]),
        ChordShape::new("augmented", &[0, 4, 8]),
        ChordShape::new("sus2", &[0, 2, 7]),
        ChordShape::new("sus4", &[0, 5, 7]),
        ChordShape::new("major7", &[0, 4, 7, 11]),
        ChordShape::new("minor7", &[0, 3, 7, 10]),
        ChordShape::new("dominant7", &[0, 4, 7, 10]),
        ChordShape::new("diminished7", &[0, 3, 6, 9]),
        ChordShape::new("half-diminished7", &[0, 3, 6, 10]),
        ChordShape::new("power", &[0, 7]),
    ],
});

impl Default for ChordTable {
    fn default() -> Self {
        DEFAULT_CHORDS.clone()
    }
}

impl ChordTable {
    pub fn builtin() -> &'static ChordTable {
        &DEFAULT_CHORDS
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let table: ChordTable = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chords.is_empty() {
            return Err(ShawzinError::config("chord table is empty"));
        }
        let mut names = HashSet::new();
        for chord in &self.chords {
            validate_intervals(&chord.name, &chord.intervals, 2)?;
            if let Some(&last) = chord.intervals.last() {
                if last >= 24 {
                    return Err(ShawzinError::config(format!(
                        "chord '{}' spans more than two octaves",
                        chord.name
                    )));
                }
            }
            if let Some(symbol) = chord.symbol {
                if !is_base64_char(symbol) {
                    return Err(ShawzinError::config(format!(
                        "chord '{}' uses '{}', which is not a Shawzin symbol",
                        chord.name, symbol
                    )));
                }
            }
            if !names.insert(normalize_name(&chord.name)) {
                return Err(ShawzinError::config(format!(
                    "duplicate chord name '{}'",
                    chord.name
                )));
            }
        }
        Ok(())
    }

    /// Find the first shape whose pitch-class set equals `pitch_classes`
    /// when rooted on one of the chord's own pitch classes. Returns the shape
    /// and the root pitch class.
    pub fn identify(&self, pitch_classes: &[u8]) -> Option<(&ChordShape, u8)> {
        let mut pcs: Vec<u8> = pitch_classes.iter().map(|p| p % 12).collect();
        pcs.sort_unstable();
        pcs.dedup();
        if pcs.len() < 2 {
            return None;
        }
        self.chords.iter().find_map(|shape| {
            pcs.iter()
                .find(|&&root| shape.pitch_classes(root) == pcs)
                .map(|&root| (shape, root))
        })
    }
}

/// Scale and chord tables handed to the pipeline together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentTables {
    pub scales: ScaleTable,
    pub chords: ChordTable,
}

impl InstrumentTables {
    pub fn new(scales: ScaleTable, chords: ChordTable) -> Result<Self> {
        let tables = Self { scales, chords };
        tables.validate()?;
        Ok(tables)
    }

    pub fn validate(&self) -> Result<()> {
        self.scales.validate()?;
        self.chords.validate()
    }
}
