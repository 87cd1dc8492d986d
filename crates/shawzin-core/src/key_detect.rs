//! Key and scale detection from a pitch-class histogram

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ShawzinError};
use crate::note::{parse_pitch_class, NoteEvent, PITCH_CLASS_NAMES};
use crate::tables::{ScaleDef, ScaleTable};

const TIE_EPSILON: f64 = 1e-9;

/// The key a track is mapped in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyProfile {
    /// Root pitch class (0-11)
    pub root: u8,
    /// Mode name as listed in the scale table
    pub mode: String,
    /// Shawzin scale number for the string header
    pub scale_id: u8,
    /// Semitone offsets from the root
    pub intervals: Vec<u8>,
    /// Similarity of the chosen candidate (1.0 when forced)
    pub score: f64,
}

impl KeyProfile {
    pub fn from_scale(root: u8, scale: &ScaleDef, score: f64) -> Self {
        Self {
            root: root % 12,
            mode: scale.name.clone(),
            scale_id: scale.id,
            intervals: scale.intervals.clone(),
            score,
        }
    }

    pub fn root_name(&self) -> &'static str {
        PITCH_CLASS_NAMES[self.root as usize]
    }

    pub fn contains_pitch(&self, pitch: u8) -> bool {
        let rel = (pitch % 12 + 12 - self.root) % 12;
        self.intervals.contains(&rel)
    }
}

impl fmt::Display for KeyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.root_name(), self.mode)
    }
}

/// How much each note contributes to the histogram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistogramWeighting {
    #[default]
    Duration,
    Count,
}

/// A scored (root, mode) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyCandidate {
    pub root: u8,
    pub mode: String,
    pub scale_id: u8,
    pub score: f64,
}

impl fmt::Display for KeyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({:.3})", PITCH_CLASS_NAMES[self.root as usize], self.mode, self.score)
    }
}

/// Key detection settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyDetector {
    pub weighting: HistogramWeighting,
    /// Forced key such as "C major"; bypasses scoring
    pub forced: Option<String>,
}

impl KeyDetector {
    pub fn forced(key: impl Into<String>) -> Self {
        Self {
            forced: Some(key.into()),
            ..Default::default()
        }
    }

    /// Check the forced key against the scale table without running detection
    pub fn validate(&self, scales: &ScaleTable) -> Result<()> {
        if let Some(key) = &self.forced {
            parse_key(key, scales)?;
        }
        Ok(())
    }

    /// Detect the best-fitting key. `previous` is the key used for the
    /// preceding track, if any, and only influences tie-breaking.
    pub fn detect(
        &self,
        notes: &[NoteEvent],
        scales: &ScaleTable,
        previous: Option<&KeyProfile>,
    ) -> Result<KeyProfile> {
        if let Some(key) = &self.forced {
            let profile = parse_key(key, scales)?;
            debug!("Using forced key {}", profile);
            return Ok(profile);
        }
        if notes.is_empty() {
            return Err(ShawzinError::InsufficientData);
        }

        let histogram = pitch_class_histogram(notes, self.weighting);
        let scored = score_all(&histogram, scales);
        let best = scored
            .iter()
            .map(|(_, _, score)| *score)
            .fold(f64::NEG_INFINITY, f64::max);

        let (scale_idx, root, score) = scored
            .iter()
            .filter(|(_, _, score)| best - score <= TIE_EPSILON)
            .min_by(|a, b| tie_break(a, b, scales, previous))
            .copied()
            .ok_or(ShawzinError::InsufficientData)?;

        let profile = KeyProfile::from_scale(root, &scales.scales[scale_idx], score);
        debug!("Detected key {} (score {:.4})", profile, score);
        Ok(profile)
    }

    /// All (root, mode) candidates, best first
    pub fn rank(&self, notes: &[NoteEvent], scales: &ScaleTable) -> Result<Vec<KeyCandidate>> {
        if notes.is_empty() {
            return Err(ShawzinError::InsufficientData);
        }
        let histogram = pitch_class_histogram(notes, self.weighting);
        let mut scored = score_all(&histogram, scales);
        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(Ordering::Equal)
                .then_with(|| tie_break(a, b, scales, None))
        });
        Ok(scored
            .into_iter()
            .map(|(idx, root, score)| {
                let scale = &scales.scales[idx];
                KeyCandidate {
                    root,
                    mode: scale.name.clone(),
                    scale_id: scale.id,
                    score,
                }
            })
            .collect())
    }
}

/// The `limit` best candidates for a note sequence
pub fn rank_keys(
    notes: &[NoteEvent],
    scales: &ScaleTable,
    weighting: HistogramWeighting,
    limit: usize,
) -> Result<Vec<KeyCandidate>> {
    let detector = KeyDetector {
        weighting,
        forced: None,
    };
    let mut ranked = detector.rank(notes, scales)?;
    ranked.truncate(limit);
    Ok(ranked)
}

/// Tie-break order: previous key, previous mode, major, lowest root, table order
fn tie_break(
    a: &(usize, u8, f64),
    b: &(usize, u8, f64),
    scales: &ScaleTable,
    previous: Option<&KeyProfile>,
) -> Ordering {
    let rank = |(idx, root, _): &(usize, u8, f64)| {
        let scale = &scales.scales[*idx];
        let (same_key, same_mode) = match previous {
            Some(prev) => {
                let same_mode = prev.mode == scale.name;
                (same_mode && prev.root == *root, same_mode)
            }
            None => (false, false),
        };
        (
            !same_key,
            !same_mode,
            scale.name != "major",
            *root,
            *idx,
        )
    };
    rank(a).cmp(&rank(b))
}

fn score_all(histogram: &[f64; 12], scales: &ScaleTable) -> Vec<(usize, u8, f64)> {
    let mut scored = Vec::with_capacity(scales.len() * 12);
    for (idx, scale) in scales.iter().enumerate() {
        let profile = reference_profile(&scale.intervals);
        for root in 0..12u8 {
            scored.push((idx, root, rotated_cosine(histogram, &profile, root)));
        }
    }
    scored
}

/// Weighted pitch-class histogram (unnormalised)
pub fn pitch_class_histogram(notes: &[NoteEvent], weighting: HistogramWeighting) -> [f64; 12] {
    let mut histogram = [0.0; 12];
    for note in notes {
        let weight = match weighting {
            HistogramWeighting::Duration => note.duration as f64,
            HistogramWeighting::Count => 1.0,
        };
        histogram[note.pitch_class() as usize] += weight;
    }
    histogram
}

/// Template for a mode rooted at C: tonic 2.0, fifth 1.5, other degrees 1.0
pub fn reference_profile(intervals: &[u8]) -> [f64; 12] {
    let mut profile = [0.0; 12];
    for &interval in intervals {
        profile[(interval % 12) as usize] = match interval {
            0 => 2.0,
            7 => 1.5,
            _ => 1.0,
        };
    }
    profile
}

/// Cosine similarity of the histogram with the profile transposed to `root`
fn rotated_cosine(histogram: &[f64; 12], profile: &[f64; 12], root: u8) -> f64 {
    let mut dot = 0.0;
    let mut norm_h = 0.0;
    let mut norm_p = 0.0;
    for pc in 0..12 {
        let p = profile[(pc + 12 - root as usize) % 12];
        dot += histogram[pc] * p;
        norm_h += histogram[pc] * histogram[pc];
        norm_p += p * p;
    }
    if norm_h == 0.0 || norm_p == 0.0 {
        return 0.0;
    }
    dot / (norm_h.sqrt() * norm_p.sqrt())
}

/// Parse "C major", "F# dorian" or just "Eb" (major) against the scale table
pub fn parse_key(text: &str, scales: &ScaleTable) -> Result<KeyProfile> {
    let text = text.trim();
    let (root_str, mode_str) = match text.split_once(char::is_whitespace) {
        Some((root, mode)) => (root, mode.trim()),
        None => (text, "major"),
    };
    let root = parse_pitch_class(root_str)
        .ok_or_else(|| ShawzinError::config(format!("unknown key root '{}'", root_str)))?;
    let scale = scales
        .find(mode_str)
        .ok_or_else(|| ShawzinError::config(format!("unsupported mode '{}'", mode_str)))?;
    Ok(KeyProfile::from_scale(root, scale, 1.0))
}
