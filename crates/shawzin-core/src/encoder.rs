//! Shawzin string encoding and decoding

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ShawzinError};
use crate::mapper::SymbolEvent;
use crate::note::{TimeBase, CODE_UNITS_PER_SECOND};
use crate::quantize::GridDivision;
use crate::tables::{is_base64_char, BASE64_ALPHABET};

/// Exclusive upper bound of a two-character time token
pub const MAX_TIME_UNITS: u32 = 64 * 64;

// ============================================================================
// Time tokens
// ============================================================================

fn base64_value(c: char) -> Option<u32> {
    if !c.is_ascii() {
        return None;
    }
    BASE64_ALPHABET
        .iter()
        .position(|&b| b == c as u8)
        .map(|i| i as u32)
}

/// Two base-64 characters, most significant first
pub fn encode_time(units: u32) -> Result<String> {
    if units >= MAX_TIME_UNITS {
        return Err(ShawzinError::UnsupportedRange(format!(
            "time {} does not fit a two-character token (max {})",
            units,
            MAX_TIME_UNITS - 1
        )));
    }
    let hi = BASE64_ALPHABET[(units / 64) as usize] as char;
    let lo = BASE64_ALPHABET[(units % 64) as usize] as char;
    Ok([hi, lo].iter().collect())
}

pub fn decode_time(token: &str) -> Result<u32> {
    let mut chars = token.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(hi), Some(lo), None) => match (base64_value(hi), base64_value(lo)) {
            (Some(hi), Some(lo)) => Ok(hi * 64 + lo),
            _ => Err(ShawzinError::InvalidEncoding(format!(
                "'{}' is not a base-64 time token",
                token
            ))),
        },
        _ => Err(ShawzinError::InvalidEncoding(format!(
            "time token '{}' must be exactly two characters",
            token
        ))),
    }
}

// ============================================================================
// Encoded tracks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedNote {
    pub symbol: char,
    /// Code units (1/16 s) from the start of the chunk
    pub time: u32,
}

/// Metadata that travels alongside the wire string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackHeader {
    pub key: String,
    pub grid: GridDivision,
    pub tempo_bpm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedTrack {
    /// Shawzin scale number, the first character on the wire
    pub scale_id: u8,
    /// None when decoded from a bare string
    pub header: Option<TrackHeader>,
    pub chunk_index: usize,
    /// Code units removed from every time in this chunk
    pub time_offset: u64,
    pub notes: Vec<EncodedNote>,
}

impl EncodedTrack {
    /// The string the game accepts: scale digit then 3-character note tokens.
    /// Times past the two-character range are `UnsupportedRange`.
    pub fn to_shawzin_string(&self) -> Result<String> {
        let mut out = String::with_capacity(1 + self.notes.len() * 3);
        out.push_str(&self.scale_id.to_string());
        for note in &self.notes {
            out.push(note.symbol);
            out.push_str(&encode_time(note.time)?);
        }
        Ok(out)
    }

    /// Decode a wire string back into notes
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let mut chars = text.chars();
        let scale_id = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .filter(|d| (1..=9).contains(d))
            .ok_or_else(|| {
                ShawzinError::InvalidEncoding("string must start with a scale digit 1-9".to_string())
            })? as u8;

        let body: Vec<char> = chars.collect();
        if body.len() % 3 != 0 {
            return Err(ShawzinError::InvalidEncoding(format!(
                "note data has {} characters, expected a multiple of 3",
                body.len()
            )));
        }

        let mut notes = Vec::with_capacity(body.len() / 3);
        for (i, token) in body.chunks(3).enumerate() {
            if !is_base64_char(token[0]) {
                return Err(ShawzinError::InvalidEncoding(format!(
                    "note {} has invalid symbol '{}'",
                    i, token[0]
                )));
            }
            let time: String = token[1..].iter().collect();
            notes.push(EncodedNote {
                symbol: token[0],
                time: decode_time(&time)?,
            });
        }

        Ok(Self {
            scale_id,
            header: None,
            chunk_index: 0,
            time_offset: 0,
            notes,
        })
    }

    /// Length of the chunk in code units (time of the last note)
    pub fn duration_units(&self) -> u32 {
        self.notes.last().map_or(0, |n| n.time)
    }
}

impl fmt::Display for EncodedTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scale {}", self.scale_id)?;
        if let Some(header) = &self.header {
            write!(f, ", {}, grid {}, {:.1} BPM", header.key, header.grid, header.tempo_bpm)?;
        }
        write!(
            f,
            ", part {}, {} notes, {:.2} s",
            self.chunk_index + 1,
            self.notes.len(),
            self.duration_units() as f64 / CODE_UNITS_PER_SECOND
        )
    }
}

// ============================================================================
// Encoder
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkLimits {
    /// Most notes per chunk (None = only the time range limits a chunk)
    pub max_notes: Option<usize>,
}

/// What to do when a track does not fit one string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Start a new chunk with times rebased to its first note
    #[default]
    Split,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Encoder {
    pub limits: ChunkLimits,
    pub overflow: OverflowPolicy,
}

impl Encoder {
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_notes == Some(0) {
            return Err(ShawzinError::config("max notes per chunk must be at least 1"));
        }
        Ok(())
    }

    /// Encode mapped events into one or more chunks. The first chunk keeps
    /// absolute times unless its first note is already out of range; later
    /// chunks start at their first note. No chunk is ever empty unless
    /// `events` is.
    pub fn encode(
        &self,
        events: &[SymbolEvent],
        time_base: &TimeBase,
        scale_id: u8,
        header: TrackHeader,
    ) -> Result<Vec<EncodedTrack>> {
        self.validate()?;
        time_base.validate()?;

        let new_chunk = |index: usize, offset: u64| EncodedTrack {
            scale_id,
            header: Some(header.clone()),
            chunk_index: index,
            time_offset: offset,
            notes: Vec::new(),
        };

        let mut chunks = vec![new_chunk(0, 0)];
        for event in events {
            let units = time_base.ticks_to_code_units(event.onset);
            let Some(chunk) = chunks.last() else { break };
            let full = self
                .limits
                .max_notes
                .is_some_and(|max| chunk.notes.len() >= max);
            let overflow = units.saturating_sub(chunk.time_offset) >= MAX_TIME_UNITS as u64;

            if full || overflow {
                if self.overflow == OverflowPolicy::Strict {
                    let reason = if overflow {
                        format!(
                            "note at {:.2} s exceeds the {:.0} s time range",
                            units as f64 / CODE_UNITS_PER_SECOND,
                            MAX_TIME_UNITS as f64 / CODE_UNITS_PER_SECOND
                        )
                    } else {
                        format!("track has more than {} notes", chunk.notes.len())
                    };
                    return Err(ShawzinError::UnsupportedRange(reason));
                }
                if chunk.notes.is_empty() {
                    // Nothing written yet: move this chunk's origin instead of leaving it empty
                    if let Some(chunk) = chunks.last_mut() {
                        chunk.time_offset = units;
                    }
                } else {
                    debug!("Starting chunk {} at {} code units", chunks.len() + 1, units);
                    chunks.push(new_chunk(chunks.len(), units));
                }
            }

            if let Some(chunk) = chunks.last_mut() {
                let time = units.saturating_sub(chunk.time_offset) as u32;
                chunk.notes.push(EncodedNote {
                    symbol: event.symbol,
                    time,
                });
            }
        }
        Ok(chunks)
    }
}
