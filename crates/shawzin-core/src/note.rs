//! Note events and the track time base

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShawzinError};

/// Shawzin timing resolution: one code unit is 1/16 of a second.
pub const CODE_UNITS_PER_SECOND: f64 = 16.0;

pub const PITCH_CLASS_NAMES: [&str; 12] =
    ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// A single parsed note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// MIDI note number (0-127, 60 = middle C)
    pub pitch: u8,
    /// Start position in ticks
    pub onset: u64,
    /// Duration in ticks, always > 0
    pub duration: u64,
    /// Velocity (0-127), informational only
    pub velocity: u8,
    /// Source MIDI channel, informational only
    #[serde(default)]
    pub channel: u8,
}

impl NoteEvent {
    pub fn new(pitch: u8, onset: u64, duration: u64, velocity: u8) -> Result<Self> {
        if duration == 0 {
            return Err(ShawzinError::config(format!(
                "note {} at tick {} has zero duration",
                pitch_name(pitch),
                onset
            )));
        }
        Ok(Self {
            pitch,
            onset,
            duration,
            velocity,
            channel: 0,
        })
    }

    /// End tick (onset + duration)
    pub fn end(&self) -> u64 {
        self.onset + self.duration
    }

    pub fn pitch_class(&self) -> u8 {
        self.pitch % 12
    }
}

/// Ticks-per-beat resolution plus the nominal tempo of a track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeBase {
    pub ticks_per_beat: u16,
    pub tempo_bpm: f64,
}

impl Default for TimeBase {
    fn default() -> Self {
        Self {
            ticks_per_beat: 480,
            tempo_bpm: 120.0,
        }
    }
}

impl TimeBase {
    pub fn new(ticks_per_beat: u16, tempo_bpm: f64) -> Result<Self> {
        let time_base = Self {
            ticks_per_beat,
            tempo_bpm,
        };
        time_base.validate()?;
        Ok(time_base)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ticks_per_beat == 0 {
            return Err(ShawzinError::config("ticks per beat must be positive"));
        }
        if !(self.tempo_bpm.is_finite() && self.tempo_bpm > 0.0) {
            return Err(ShawzinError::config(format!(
                "tempo must be a positive number of BPM, got {}",
                self.tempo_bpm
            )));
        }
        Ok(())
    }

    pub fn ticks_to_beats(&self, ticks: u64) -> f64 {
        ticks as f64 / self.ticks_per_beat as f64
    }

    pub fn ticks_to_seconds(&self, ticks: u64) -> f64 {
        self.ticks_to_beats(ticks) * 60.0 / self.tempo_bpm
    }

    /// Length of one Shawzin code unit in ticks (fractional)
    pub fn code_unit_ticks(&self) -> f64 {
        self.ticks_per_beat as f64 * self.tempo_bpm / (60.0 * CODE_UNITS_PER_SECOND)
    }

    /// Smallest whole number of ticks that spans at least one code unit
    pub fn min_code_unit_ticks(&self) -> u64 {
        (self.code_unit_ticks().ceil() as u64).max(1)
    }

    /// Convert ticks to Shawzin code units, rounding to nearest
    pub fn ticks_to_code_units(&self, ticks: u64) -> u64 {
        (ticks as f64 / self.code_unit_ticks()).round() as u64
    }
}

/// One track of notes as handed over by a MIDI reader
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackInput {
    pub name: String,
    /// Notes sorted by onset
    pub notes: Vec<NoteEvent>,
    pub time_base: TimeBase,
}

impl TrackInput {
    pub fn new(name: impl Into<String>, notes: Vec<NoteEvent>, time_base: TimeBase) -> Self {
        Self {
            name: name.into(),
            notes,
            time_base,
        }
    }
}

/// "C4"-style name for a MIDI pitch
pub fn pitch_name(pitch: u8) -> String {
    let octave = pitch as i32 / 12 - 1;
    format!("{}{}", PITCH_CLASS_NAMES[(pitch % 12) as usize], octave)
}

/// Parse a pitch-class spelling such as "C", "F#", "Bb" or "e"
pub fn parse_pitch_class(name: &str) -> Option<u8> {
    let mut chars = name.trim().chars();
    let base: i32 = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let mut alter = 0;
    for c in chars {
        match c {
            '#' => alter += 1,
            'b' => alter -= 1,
            _ => return None,
        }
    }
    Some((base + alter).rem_euclid(12) as u8)
}
