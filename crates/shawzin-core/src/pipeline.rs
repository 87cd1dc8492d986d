//! End-to-end conversion of one track

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chord::{ChordPolicy, ChordResolver, ResolvedEvent};
use crate::diagnostics::LossyDecision;
use crate::encoder::{EncodedTrack, Encoder, TrackHeader};
use crate::error::Result;
use crate::key_detect::{KeyDetector, KeyProfile};
use crate::mapper::{DegreeMapper, MappingPolicy, SymbolEvent};
use crate::metrics::ConversionMetrics;
use crate::note::{TimeBase, TrackInput};
use crate::pattern::{detect_patterns, Pattern, PatternSettings, PatternSummary};
use crate::quantize::{GridDivision, QuantizedTrack, Quantizer};
use crate::tables::InstrumentTables;

/// Every setting a conversion needs, loadable from a settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub grid: GridDivision,
    /// Simultaneity tolerance in ticks
    pub tolerance: u64,
    pub chords: ChordPolicy,
    pub key: KeyDetector,
    pub mapping: MappingPolicy,
    pub patterns: PatternSettings,
    pub encoder: Encoder,
}

impl ConversionConfig {
    pub fn quantizer(&self) -> Quantizer {
        Quantizer::new(self.grid).with_tolerance(self.tolerance)
    }

    /// Reject bad settings before any note is touched
    pub fn validate(&self, tables: &InstrumentTables, time_base: &TimeBase) -> Result<()> {
        tables.validate()?;
        self.quantizer().grid_ticks(time_base)?;
        self.key.validate(&tables.scales)?;
        self.encoder.validate()
    }
}

/// All intermediate and final results for one track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    pub track_name: String,
    pub key: KeyProfile,
    pub quantized: QuantizedTrack,
    pub resolved: Vec<ResolvedEvent>,
    pub patterns: Vec<Pattern>,
    pub symbols: Vec<SymbolEvent>,
    pub chunks: Vec<EncodedTrack>,
    pub decisions: Vec<LossyDecision>,
    pub metrics: ConversionMetrics,
}

impl Conversion {
    pub fn pattern_summary(&self) -> PatternSummary {
        PatternSummary::new(&self.patterns, self.resolved.len())
    }

    /// Wire strings, one per chunk
    pub fn shawzin_strings(&self) -> Result<Vec<String>> {
        self.chunks.iter().map(EncodedTrack::to_shawzin_string).collect()
    }
}

/// Run key detection, quantization, chord resolution, pattern detection,
/// degree mapping and encoding over one track.
///
/// `previous_key` is the key chosen for the preceding track and only breaks
/// ties in key detection.
pub fn convert_track(
    input: &TrackInput,
    config: &ConversionConfig,
    tables: &InstrumentTables,
    previous_key: Option<&KeyProfile>,
) -> Result<Conversion> {
    let time_base = &input.time_base;
    config.validate(tables, time_base)?;

    let key = config.key.detect(&input.notes, &tables.scales, previous_key)?;
    let mut decisions = Vec::new();

    let (quantized, merged) = config.quantizer().quantize(&input.notes, time_base)?;
    decisions.extend(merged);

    let resolver = ChordResolver::new(config.chords, &key, &tables.chords, time_base);
    let (resolved, reduced) = resolver.resolve(&quantized);
    decisions.extend(reduced);

    let patterns = detect_patterns(&resolved, &config.patterns);

    let mapper = DegreeMapper::new(&key, &tables.scales, config.mapping, &resolved)?;
    let (symbols, mapped) = mapper.map(&resolved)?;
    decisions.extend(mapped);

    let header = TrackHeader {
        key: key.to_string(),
        grid: config.grid,
        tempo_bpm: time_base.tempo_bpm,
    };
    let chunks = config.encoder.encode(&symbols, time_base, key.scale_id, header)?;

    for decision in &decisions {
        decision.log();
    }
    let metrics = ConversionMetrics::compute(&input.notes, &symbols, time_base);

    let conversion = Conversion {
        track_name: input.name.clone(),
        key,
        quantized,
        resolved,
        patterns,
        symbols,
        chunks,
        decisions,
        metrics,
    };

    let summary = conversion.pattern_summary();
    debug!(
        "Track '{}': {} repeated run(s) covering {:.0}% of events",
        conversion.track_name,
        summary.count,
        summary.ratio * 100.0
    );
    if conversion.decisions.len() > conversion.metrics.total_notes / 2 && conversion.metrics.total_notes > 0 {
        warn!(
            "Track '{}': {} lossy decisions for {} notes",
            conversion.track_name,
            conversion.decisions.len(),
            conversion.metrics.total_notes
        );
    }
    info!(
        "Converted track '{}' in {} ({} notes -> {} symbols, {} chunk(s), quality {:.1}/10)",
        conversion.track_name,
        conversion.key,
        conversion.metrics.total_notes,
        conversion.symbols.len(),
        conversion.chunks.len(),
        conversion.metrics.quality_score(config.chords.mode)
    );

    Ok(conversion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::ArpOrder;
    use crate::error::ShawzinError;
    use crate::note::NoteEvent;

    fn track(notes: &[(u8, u64, u64)]) -> TrackInput {
        let notes = notes
            .iter()
            .map(|&(p, o, d)| NoteEvent::new(p, o, d, 100).unwrap())
            .collect();
        TrackInput::new("lead", notes, TimeBase::default())
    }

    #[test]
    fn test_forced_key_melody() {
        let input = track(&[(60, 0, 480), (62, 480, 480), (64, 960, 480), (63, 1440, 480)]);
        let config = ConversionConfig {
            key: KeyDetector::forced("C major"),
            grid: GridDivision::new(4).unwrap(),
            ..Default::default()
        };
        let conversion = convert_track(&input, &config, &InstrumentTables::default(), None).unwrap();
        assert_eq!(conversion.key.to_string(), "C major");
        // D#4 snaps to D4
        assert_eq!(conversion.shawzin_strings().unwrap(), vec!["2BAACAIEAQCAY".to_string()]);
        assert_eq!(conversion.decisions.len(), 1);
        assert_eq!(conversion.metrics.mapped_notes, 4);
    }

    #[test]
    fn test_arpeggiated_chord_end_to_end() {
        let input = track(&[(60, 0, 480), (64, 0, 480), (67, 0, 480), (72, 480, 480)]);
        let config = ConversionConfig {
            key: KeyDetector::forced("C major"),
            grid: GridDivision::new(4).unwrap(),
            chords: ChordPolicy::arpeggiate(ArpOrder::Ascending),
            ..Default::default()
        };
        let conversion = convert_track(&input, &config, &InstrumentTables::default(), None).unwrap();
        let onsets: Vec<u64> = conversion.resolved.iter().map(|e| e.onset).collect();
        assert_eq!(onsets, vec![0, 160, 320, 480]);
        assert!(conversion.decisions.is_empty());
        assert_eq!(conversion.metrics.mapped_ratio, 1.0);
    }

    #[test]
    fn test_bad_configuration_fails_early() {
        let input = track(&[(60, 0, 480)]);
        let config = ConversionConfig {
            key: KeyDetector::forced("C mixolydian"),
            ..Default::default()
        };
        let result = convert_track(&input, &config, &InstrumentTables::default(), None);
        assert!(matches!(result, Err(ShawzinError::InvalidConfiguration(_))));

        let config = ConversionConfig {
            grid: GridDivision::new(7).unwrap(),
            ..Default::default()
        };
        assert!(convert_track(&input, &config, &InstrumentTables::default(), None).is_err());
    }

    #[test]
    fn test_empty_track_needs_forced_key() {
        let input = track(&[]);
        let result = convert_track(&input, &ConversionConfig::default(), &InstrumentTables::default(), None);
        assert!(matches!(result, Err(ShawzinError::InsufficientData)));
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "grid": "1/8",
            "chords": {"mode": "arpeggiate", "order": "as-played"},
            "key": {"weighting": "count", "forced": "A minor"},
            "mapping": {"chromatic": "snap-sharp", "octave": {"fixed": 3}, "range": "strict"},
            "encoder": {"limits": {"max_notes": 100}, "overflow": "strict"}
        }"#;
        let config: ConversionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.grid.denominator(), 8);
        assert_eq!(config.chords.order, ArpOrder::AsPlayed);
        assert_eq!(config.mapping.octave, crate::mapper::OctavePlacement::Fixed(3));
        assert_eq!(config.encoder.limits.max_notes, Some(100));
        assert_eq!(config.patterns, PatternSettings::default());
    }
}
