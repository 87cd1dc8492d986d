//! shawzin-core: MIDI note sequences to Warframe Shawzin strings

pub mod chord;
mod diagnostics;
pub mod encoder;
mod error;
pub mod key_detect;
pub mod mapper;
mod metrics;
mod note;
pub mod pattern;
mod pipeline;
pub mod quantize;
pub mod tables;

pub use chord::{resolve_chords, ArpOrder, Chord, ChordMode, ChordPolicy, ChordResolver, ResolvedEvent};
pub use diagnostics::LossyDecision;
pub use encoder::{
    decode_time, encode_time, ChunkLimits, EncodedNote, EncodedTrack, Encoder, OverflowPolicy,
    TrackHeader,
};
pub use error::{Result, ShawzinError};
pub use key_detect::{
    parse_key, pitch_class_histogram, rank_keys, HistogramWeighting, KeyCandidate, KeyDetector,
    KeyProfile,
};
pub use mapper::{
    map_degrees, ChromaticPolicy, DegreeMapper, MappingPolicy, OctavePlacement, RangePolicy,
    SymbolEvent,
};
pub use metrics::ConversionMetrics;
pub use note::{pitch_name, NoteEvent, TimeBase, TrackInput};
pub use pattern::{detect_patterns, Pattern, PatternSettings, PatternSummary};
pub use pipeline::{convert_track, Conversion, ConversionConfig};
pub use quantize::{GridDivision, QuantizedNote, QuantizedTrack, Quantizer};
pub use tables::{ChordShape, ChordTable, InstrumentTables, ScaleDef, ScaleTable};
